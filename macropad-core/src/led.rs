//! LED ring animations.
//!
//! Every animation runs on its own short-lived thread. Requesting a new one
//! bumps a shared generation counter; a running animation compares its
//! captured generation with the live one before each sleep and, under the
//! transport's write lock, before each write. Once a newer animation has
//! been requested, the older one can no longer reach the wire.

use crate::error::PanelError;
use crate::frame::{Command, MAX_LEVEL, Rgb};
use crate::transport::Transport;
use log::{debug, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

// =============================================================================
// Patterns
// =============================================================================

const WHITE: Rgb = Rgb::new(255, 255, 255);
const RED: Rgb = Rgb::new(220, 60, 60);
const AMBER: Rgb = Rgb::new(255, 180, 0);
const SLEEP_BLUE: Rgb = Rgb::new(102, 153, 204);
const WARM_WHITE: Rgb = Rgb::new(255, 220, 150);

/// One animation step: optional color change, brightness, then a hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedStep {
    /// New ring color, or `None` to keep the current one.
    pub color: Option<Rgb>,
    /// Ring brightness (0-100). Zero turns the ring off.
    pub brightness: u8,
    /// How long to hold before the next step.
    pub hold: Duration,
}

impl LedStep {
    /// Paint `color` at `brightness` and hold.
    pub fn new(color: Rgb, brightness: u8, hold: Duration) -> Self {
        Self {
            color: Some(color),
            brightness: brightness.min(MAX_LEVEL),
            hold,
        }
    }

    /// Change brightness only.
    pub fn dim(brightness: u8, hold: Duration) -> Self {
        Self {
            color: None,
            brightness: brightness.min(MAX_LEVEL),
            hold,
        }
    }

    /// Turn the ring off.
    pub fn off() -> Self {
        Self::dim(0, Duration::ZERO)
    }

    /// Turn the ring off and hold.
    pub fn off_for(hold: Duration) -> Self {
        Self::dim(0, hold)
    }
}

/// Which success color to flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Green.
    Feeding,
    /// Ochre.
    Diaper,
    /// Grey, shorter and dimmer.
    Note,
    /// Bright green, used when queued actions are flushed.
    Sync,
}

impl Category {
    fn flash(self) -> (Rgb, u8, Duration) {
        match self {
            Category::Feeding => (Rgb::new(102, 204, 102), 65, Duration::from_millis(600)),
            Category::Diaper => (Rgb::new(204, 170, 68), 65, Duration::from_millis(600)),
            Category::Note => (Rgb::new(153, 153, 153), 50, Duration::from_millis(400)),
            Category::Sync => (Rgb::new(0, 255, 0), 50, Duration::from_millis(300)),
        }
    }
}

/// A named sequence of steps, optionally continuing into another pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedPattern {
    name: &'static str,
    steps: Vec<LedStep>,
    then: Option<Box<LedPattern>>,
}

impl LedPattern {
    /// A custom pattern.
    pub fn new(name: &'static str, steps: Vec<LedStep>) -> Self {
        Self {
            name,
            steps,
            then: None,
        }
    }

    /// Continue into `next` instead of stopping after the last step.
    pub fn then(mut self, next: LedPattern) -> Self {
        self.then = Some(Box::new(next));
        self
    }

    /// Pattern name, for logging.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Steps of this pattern, not including any continuation.
    pub fn steps(&self) -> &[LedStep] {
        &self.steps
    }

    /// The pattern this one continues into.
    pub fn next(&self) -> Option<&LedPattern> {
        self.then.as_deref()
    }

    /// Brief neutral flash shown on every accepted press.
    pub fn acknowledge() -> Self {
        Self::single("acknowledge", WHITE, 60, Duration::from_millis(150))
    }

    /// Category-colored flash after a logged action.
    pub fn success(category: Category) -> Self {
        let (color, brightness, hold) = category.flash();
        Self::single("success", color, brightness, hold)
    }

    /// Fast red triple flash.
    pub fn error() -> Self {
        Self::repeat(
            "error",
            LedStep::new(RED, 80, Duration::from_millis(200)),
            Duration::from_millis(100),
            3,
        )
    }

    /// Slow amber triple beat for actions queued offline.
    pub fn queued() -> Self {
        Self::repeat(
            "queued",
            LedStep::new(AMBER, 55, Duration::from_millis(500)),
            Duration::from_millis(300),
            3,
        )
    }

    /// White flash after an undo.
    pub fn undo() -> Self {
        Self::single("undo", WHITE, 65, Duration::from_millis(300))
    }

    /// Blue triple pulse that settles into [`sleep_ambient`](Self::sleep_ambient).
    pub fn sleep_start() -> Self {
        Self::repeat(
            "sleep_start",
            LedStep::new(SLEEP_BLUE, 50, Duration::from_millis(300)),
            Duration::from_millis(200),
            3,
        )
        .then(Self::sleep_ambient())
    }

    /// Static dim blue held while sleep mode is active.
    pub fn sleep_ambient() -> Self {
        Self::new(
            "sleep_ambient",
            vec![LedStep::new(SLEEP_BLUE, 10, Duration::ZERO)],
        )
    }

    /// Warm full-brightness burst that fades out.
    pub fn wake() -> Self {
        let mut steps = vec![LedStep::new(WARM_WHITE, 100, Duration::from_millis(400))];
        steps.extend(
            [80, 60, 40, 20]
                .into_iter()
                .map(|level| LedStep::dim(level, Duration::from_millis(120))),
        );
        steps.push(LedStep::off());
        Self::new("wake", steps)
    }

    fn single(name: &'static str, color: Rgb, brightness: u8, hold: Duration) -> Self {
        Self::new(
            name,
            vec![LedStep::new(color, brightness, hold), LedStep::off()],
        )
    }

    fn repeat(name: &'static str, on: LedStep, off_hold: Duration, times: usize) -> Self {
        let steps = (0..times)
            .flat_map(|_| [on, LedStep::off_for(off_hold)])
            .collect();
        Self::new(name, steps)
    }
}

// =============================================================================
// Controller
// =============================================================================

/// How an animation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOutcome {
    /// Every step was written.
    Completed,
    /// A newer request took over.
    Superseded,
    /// A write failed and the animation gave up.
    Failed,
}

/// Handle to a requested animation. Dropping it detaches the thread.
pub struct LedAnimation {
    generation: u64,
    handle: Option<JoinHandle<FlashOutcome>>,
}

impl LedAnimation {
    /// Generation captured by this request.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Block until the animation thread finishes.
    pub fn wait(self) -> FlashOutcome {
        match self.handle {
            Some(handle) => handle.join().unwrap_or(FlashOutcome::Failed),
            None => FlashOutcome::Failed,
        }
    }
}

/// Drives the LED ring.
#[derive(Clone)]
pub struct LedController {
    transport: Arc<Transport>,
    generation: Arc<AtomicU64>,
}

impl LedController {
    /// A controller at generation zero.
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            transport,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The live generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Start `pattern`, superseding whatever is running.
    pub fn request(&self, pattern: LedPattern) -> LedAnimation {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("LED {} (generation {})", pattern.name(), generation);

        let controller = self.clone();
        let handle = thread::Builder::new()
            .name("led-flash".into())
            .spawn(move || controller.flash(&pattern, generation));
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Could not start LED animation: {}", e);
                None
            }
        };
        LedAnimation { generation, handle }
    }

    /// Cancel any running animation and turn the ring off now.
    pub fn clear(&self) -> Result<(), PanelError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.transport.send_command(&Command::LedBrightness(0))
    }

    /// Play `pattern` on the calling thread for as long as `generation` is live.
    pub fn flash(&self, pattern: &LedPattern, generation: u64) -> FlashOutcome {
        match self.play(pattern, generation) {
            Ok(true) => FlashOutcome::Completed,
            Ok(false) => {
                trace!("LED {} superseded", pattern.name());
                FlashOutcome::Superseded
            }
            Err(e) => {
                warn!("LED {} failed: {}", pattern.name(), e);
                FlashOutcome::Failed
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// `Ok(false)` as soon as the generation goes stale.
    fn play(&self, pattern: &LedPattern, generation: u64) -> Result<bool, PanelError> {
        let mut current = Some(pattern);
        while let Some(pattern) = current {
            for step in pattern.steps() {
                if !self.write_step(step, generation)? {
                    return Ok(false);
                }
                if !step.hold.is_zero() {
                    if !self.is_current(generation) {
                        return Ok(false);
                    }
                    thread::sleep(step.hold);
                }
            }
            current = pattern.next();
        }
        Ok(true)
    }

    fn write_step(&self, step: &LedStep, generation: u64) -> Result<bool, PanelError> {
        let live = || self.is_current(generation);
        if let Some(color) = step.color
            && !self
                .transport
                .send_command_while(&Command::led_uniform(color), live)?
        {
            return Ok(false);
        }
        self.transport
            .send_command_while(&Command::LedBrightness(step.brightness), live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLink;

    fn controller() -> (Arc<MockLink>, LedController) {
        let link = Arc::new(MockLink::new());
        let transport = Arc::new(Transport::new(link.clone()));
        (link, LedController::new(transport))
    }

    #[test]
    fn test_builtin_shapes() {
        assert_eq!(LedPattern::acknowledge().steps().len(), 2);
        assert_eq!(LedPattern::error().steps().len(), 6);
        assert_eq!(LedPattern::queued().steps().len(), 6);
        assert_eq!(
            LedPattern::sleep_start().next().map(LedPattern::name),
            Some("sleep_ambient")
        );

        let wake = LedPattern::wake();
        assert_eq!(wake.steps().first().map(|s| s.brightness), Some(100));
        assert_eq!(wake.steps().last(), Some(&LedStep::off()));

        // Every finite pattern ends dark.
        for pattern in [
            LedPattern::acknowledge(),
            LedPattern::success(Category::Feeding),
            LedPattern::error(),
            LedPattern::queued(),
            LedPattern::undo(),
        ] {
            assert_eq!(pattern.steps().last().map(|s| s.brightness), Some(0));
        }
    }

    #[test]
    fn test_flash_writes_color_then_brightness() {
        let (link, led) = controller();
        let pattern = LedPattern::new(
            "test",
            vec![
                LedStep::new(Rgb::new(1, 2, 3), 40, Duration::ZERO),
                LedStep::off(),
            ],
        );
        assert_eq!(led.request(pattern).wait(), FlashOutcome::Completed);
        assert_eq!(
            link.written_commands(),
            vec![
                Command::led_uniform(Rgb::new(1, 2, 3)),
                Command::LedBrightness(40),
                Command::LedBrightness(0),
            ]
        );
    }

    #[test]
    fn test_continuation_runs() {
        let (link, led) = controller();
        let pattern = LedPattern::new("a", vec![LedStep::dim(5, Duration::ZERO)])
            .then(LedPattern::new("b", vec![LedStep::dim(6, Duration::ZERO)]));
        assert_eq!(led.request(pattern).wait(), FlashOutcome::Completed);
        assert_eq!(
            link.written_commands(),
            vec![Command::LedBrightness(5), Command::LedBrightness(6)]
        );
    }

    #[test]
    fn test_newer_request_supersedes() {
        let (link, led) = controller();
        link.set_write_delay(Duration::from_millis(30));

        let slow = LedPattern::new("slow", vec![LedStep::dim(11, Duration::ZERO); 20]);
        let first = led.request(slow);
        thread::sleep(Duration::from_millis(45));

        let second = led.request(LedPattern::new(
            "fast",
            vec![LedStep::dim(22, Duration::ZERO)],
        ));
        assert_eq!(second.generation(), first.generation() + 1);

        assert_eq!(first.wait(), FlashOutcome::Superseded);
        assert_eq!(second.wait(), FlashOutcome::Completed);

        let written = link.written_commands();
        let newer = written
            .iter()
            .position(|c| *c == Command::LedBrightness(22))
            .unwrap();
        assert!(written[newer..]
            .iter()
            .all(|c| *c != Command::LedBrightness(11)));
        assert!(written.len() < 21);
    }

    #[test]
    fn test_superseded_during_hold() {
        let (link, led) = controller();
        let animation = led.request(LedPattern::queued());
        thread::sleep(Duration::from_millis(50));
        led.clear().unwrap();

        assert_eq!(animation.wait(), FlashOutcome::Superseded);
        assert_eq!(
            link.written_commands(),
            vec![
                Command::led_uniform(AMBER),
                Command::LedBrightness(55),
                Command::LedBrightness(0),
            ]
        );
    }

    #[test]
    fn test_clear_bumps_generation() {
        let (link, led) = controller();
        assert_eq!(led.generation(), 0);
        led.clear().unwrap();
        assert_eq!(led.generation(), 1);
        assert_eq!(link.written_commands(), vec![Command::LedBrightness(0)]);
    }

    #[test]
    fn test_write_failure_ends_animation() {
        let (link, led) = controller();
        link.fail_next_writes(1);
        assert_eq!(
            led.request(LedPattern::undo()).wait(),
            FlashOutcome::Failed
        );
        assert!(link.written_commands().is_empty());
    }
}
