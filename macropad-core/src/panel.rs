//! Startup sequencing and ownership of the running panel.

use crate::config::PanelConfig;
use crate::display::StateMachine;
use crate::error::PanelError;
use crate::frame::{Command, gamma_corrected};
use crate::health::LinkHealth;
use crate::heartbeat::{Heartbeat, HeartbeatStats};
use crate::input::{InputFence, InputReader, KeyPress};
use crate::led::LedController;
use crate::link::Link;
use crate::shutdown::{Shutdown, ShutdownListener};
use crate::transport::Transport;
use crossbeam_channel::{Receiver, select, unbounded};
use log::{info, warn};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A panel that has been initialised and has its loops running.
///
/// Dropping it stops the loops at their next wake, like
/// [`shutdown`](Self::shutdown) minus the join and the LED clear.
pub struct Panel {
    transport: Arc<Transport>,
    state: Arc<StateMachine>,
    led: LedController,
    events: Receiver<KeyPress>,
    fence: InputFence,
    tick_interval: Duration,
    heartbeat: Arc<HeartbeatStats>,
    shutdown: Shutdown,
    threads: Vec<JoinHandle<()>>,
}

impl Panel {
    /// Open the configured device and start it.
    #[cfg(target_os = "linux")]
    pub fn open(config: &PanelConfig, initial_image: &[u8]) -> Result<Self, PanelError> {
        let link = crate::link::HidrawLink::open(config.vendor_id, config.product_id)?;
        Self::start(Arc::new(link), config, initial_image)
    }

    /// Bring up a panel on an open link.
    ///
    /// Order: wake the screen, set brightness, one liveness frame, the
    /// initial image, then the heartbeat and input loops. Any failure before
    /// the loops start is returned as is.
    pub fn start(
        link: Arc<dyn Link>,
        config: &PanelConfig,
        initial_image: &[u8],
    ) -> Result<Self, PanelError> {
        let transport = Arc::new(Transport::new(link));

        transport.send_command(&Command::WakeScreen)?;
        transport.send_command(&screen_brightness(config.brightness)?)?;
        transport.send_command(&Command::Connect)?;
        transport.send_screen_image(initial_image)?;
        info!("Panel initialised (brightness {})", config.brightness);

        let shutdown = Shutdown::new();
        let heartbeat = Heartbeat::new(transport.clone(), config.heartbeat_interval);
        let heartbeat_stats = heartbeat.stats();
        let (tx, events) = unbounded();
        let reader = InputReader::new(transport.clone(), config.debounce, config.read_poll, tx);
        let fence = reader.fence();

        let mut threads = Vec::with_capacity(2);
        let started = heartbeat
            .spawn(shutdown.listener())
            .and_then(|handle| {
                threads.push(handle);
                reader.spawn(shutdown.listener())
            })
            .map(|handle| threads.push(handle));
        if let Err(e) = started {
            shutdown.trigger();
            return Err(e);
        }

        Ok(Self {
            led: LedController::new(transport.clone()),
            state: Arc::new(StateMachine::new(config.timers, config.layout.clone())),
            transport,
            events,
            fence,
            tick_interval: config.tick_interval,
            heartbeat: heartbeat_stats,
            shutdown,
            threads,
        })
    }

    /// Accepted presses, in order, each stamped with its arrival.
    ///
    /// Prefer [`inputs`](Self::inputs) when ticks are driven too.
    pub fn events(&self) -> &Receiver<KeyPress> {
        &self.events
    }

    /// Presses and ticks merged in an order safe to feed the state machine.
    pub fn inputs(&self) -> PanelInputs {
        PanelInputs::new(
            self.events.clone(),
            self.ticks(),
            self.shutdown.listener(),
            self.fence.clone(),
        )
    }

    /// A fresh tick channel firing every configured tick interval.
    pub fn ticks(&self) -> Receiver<Instant> {
        crossbeam_channel::tick(self.tick_interval)
    }

    /// The display state machine.
    pub fn state(&self) -> &Arc<StateMachine> {
        &self.state
    }

    /// The LED ring.
    pub fn led(&self) -> &LedController {
        &self.led
    }

    /// The frame transport, for callers that need raw commands.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// A listener for the stop signal, for `select!` loops.
    pub fn shutdown_listener(&self) -> ShutdownListener {
        self.shutdown.listener()
    }

    /// Set screen brightness on the 0-100 scale.
    pub fn set_brightness(&self, level: u8) -> Result<(), PanelError> {
        self.transport.send_command(&screen_brightness(level)?)
    }

    /// Replace the whole screen.
    pub fn show_image(&self, data: &[u8]) -> Result<(), PanelError> {
        self.transport.send_screen_image(data)
    }

    /// Link counters.
    pub fn health(&self) -> LinkHealth {
        self.transport.health()
    }

    /// Heartbeat counters.
    pub fn heartbeat_stats(&self) -> &HeartbeatStats {
        &self.heartbeat
    }

    /// Stop the loops, wait for them, and turn the LED ring off.
    pub fn shutdown(self) {
        self.shutdown.trigger();
        for handle in self.threads {
            if handle.join().is_err() {
                warn!("A panel thread panicked");
            }
        }
        if let Err(e) = self.led.clear() {
            warn!("Could not clear LEDs on shutdown: {}", e);
        }
        info!("Panel stopped");
    }
}

/// One thing for the controller to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelInput {
    /// An accepted press.
    Press(KeyPress),
    /// A tick scheduled at this instant.
    Tick(Instant),
}

/// Merges accepted presses with the tick driver.
///
/// A tick is only handed out once every press stamped before it has been:
/// on a tick it waits for the reader to finish any press in transit and
/// drains the press channel first. A press therefore never reaches the
/// state machine after a tick that could have expired its screen.
pub struct PanelInputs {
    presses: Receiver<KeyPress>,
    ticks: Receiver<Instant>,
    shutdown: ShutdownListener,
    fence: InputFence,
    pending_tick: Option<Instant>,
}

impl PanelInputs {
    /// Merge `presses` and `ticks` until `shutdown` fires.
    pub fn new(
        presses: Receiver<KeyPress>,
        ticks: Receiver<Instant>,
        shutdown: ShutdownListener,
        fence: InputFence,
    ) -> Self {
        Self {
            presses,
            ticks,
            shutdown,
            fence,
            pending_tick: None,
        }
    }
}

impl Iterator for PanelInputs {
    type Item = PanelInput;

    /// Block for the next input. `None` once shutdown fires or the reader
    /// has stopped.
    fn next(&mut self) -> Option<PanelInput> {
        loop {
            if let Ok(press) = self.presses.try_recv() {
                return Some(PanelInput::Press(press));
            }
            if let Some(at) = self.pending_tick.take() {
                return Some(PanelInput::Tick(at));
            }
            select! {
                recv(self.presses) -> press => return press.ok().map(PanelInput::Press),
                recv(self.ticks) -> tick => {
                    let Ok(at) = tick else { return None };
                    self.fence.wait();
                    self.pending_tick = Some(at);
                }
                recv(self.shutdown.receiver()) -> _ => return None,
            }
        }
    }
}

/// Validate a human-scale level and gamma correct it for the wire.
fn screen_brightness(level: u8) -> Result<Command, PanelError> {
    Command::brightness(level).map(|_| Command::Brightness(gamma_corrected(level)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{Outcome, StateMachine, Transition};
    use crate::frame::{ButtonEvent, ImageTarget, decode_command};
    use crate::mock::MockLink;
    use std::thread;

    fn config() -> PanelConfig {
        PanelConfig::default()
            .with_heartbeat_interval(Duration::from_millis(20))
            .with_read_poll(Duration::from_millis(10))
    }

    #[test]
    fn test_init_order() {
        let link = Arc::new(MockLink::new());
        let panel = Panel::start(link.clone(), &PanelConfig::default(), &[7u8; 1500]).unwrap();

        let frames = link.written();
        let first: Vec<_> = frames[..4]
            .iter()
            .map(|f| decode_command(f).ok())
            .collect();
        assert_eq!(
            first,
            vec![
                Some(Command::WakeScreen),
                Some(Command::Brightness(gamma_corrected(80))),
                Some(Command::Connect),
                Some(Command::ImageHeader {
                    target: ImageTarget::SCREEN,
                    size: 1500
                }),
            ]
        );
        // Two chunks, then the commit.
        assert!(!frames[4].is_command());
        assert!(!frames[5].is_command());
        assert_eq!(decode_command(&frames[6]).unwrap(), Command::Commit);

        panel.shutdown();
    }

    #[test]
    fn test_start_fails_on_empty_image() {
        let link = Arc::new(MockLink::new());
        let result = Panel::start(link, &config(), &[]);
        assert!(matches!(result, Err(PanelError::EmptyImage)));
    }

    #[test]
    fn test_start_fails_on_closed_link() {
        let link = Arc::new(MockLink::new());
        link.close();
        let result = Panel::start(link.clone(), &config(), &[1]);
        assert!(matches!(result, Err(PanelError::LinkClosed)));
        assert_eq!(link.write_count(), 0);
    }

    #[test]
    fn test_invalid_brightness() {
        let link = Arc::new(MockLink::new());
        let result = Panel::start(link, &config().with_brightness(101), &[1]);
        assert!(matches!(
            result,
            Err(PanelError::InvalidLevel { value: 101, .. })
        ));
    }

    #[test]
    fn test_queued_press_goes_before_ready_tick() {
        let shutdown = Shutdown::new();
        let (press_tx, presses) = unbounded();
        let (tick_tx, ticks) = unbounded();
        let mut inputs =
            PanelInputs::new(presses, ticks, shutdown.listener(), InputFence::default());

        let machine = StateMachine::default();
        let t0 = Instant::now();
        machine.handle_key(12, t0);

        // Both ready: the tick fired at 7 s, the press arrived at 6.9 s.
        tick_tx.send(t0 + Duration::from_secs(7)).unwrap();
        press_tx
            .send(KeyPress {
                key: 11,
                at: t0 + Duration::from_millis(6900),
            })
            .unwrap();

        let Some(PanelInput::Press(press)) = inputs.next() else {
            panic!("press must come first");
        };
        let outcome = machine.handle_key(press.key, press.at);
        assert!(matches!(
            outcome.transition,
            Transition::Confirmed {
                outcome: Outcome::Action { option: Some(0), auto: false, .. },
                ..
            }
        ));

        let Some(PanelInput::Tick(at)) = inputs.next() else {
            panic!("tick expected");
        };
        assert!(machine.tick(at).is_empty());

        shutdown.trigger();
        assert_eq!(inputs.next(), None);
    }

    #[test]
    fn test_tick_waits_for_press_in_transit() {
        let shutdown = Shutdown::new();
        let (press_tx, presses) = unbounded();
        let (tick_tx, ticks) = unbounded();
        let fence = InputFence::default();
        let mut inputs = PanelInputs::new(presses, ticks, shutdown.listener(), fence.clone());
        let t0 = Instant::now();

        // Stands in for the reader: stamps under the fence, sends late.
        let (held_tx, held_rx) = unbounded();
        let reader = thread::spawn(move || {
            let _guard = fence.hold();
            held_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            press_tx.send(KeyPress { key: 11, at: t0 }).unwrap();
        });
        held_rx.recv().unwrap();
        tick_tx.send(t0 + Duration::from_millis(1)).unwrap();

        assert_eq!(
            inputs.next(),
            Some(PanelInput::Press(KeyPress { key: 11, at: t0 }))
        );
        assert_eq!(
            inputs.next(),
            Some(PanelInput::Tick(t0 + Duration::from_millis(1)))
        );
        reader.join().unwrap();
    }

    #[test]
    fn test_events_flow_and_shutdown_clears_leds() {
        let link = Arc::new(MockLink::new());
        let panel = Panel::start(link.clone(), &config(), &[1]).unwrap();

        link.push_button(ButtonEvent::pressed(12));
        link.push_echo();
        let event = panel
            .events()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(event.key, 12);

        let deadline = Instant::now() + Duration::from_secs(5);
        while panel.heartbeat_stats().sent() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(panel.heartbeat_stats().sent() >= 1);

        panel.set_brightness(50).unwrap();
        panel.shutdown();
        let commands = link.written_commands();
        assert!(commands.contains(&Command::Brightness(gamma_corrected(50))));
        assert_eq!(commands.last(), Some(&Command::LedBrightness(0)));
    }
}
