use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{Local, Timelike};
use log::{debug, error, info, warn};
use macropad_core::{
    BrightnessSchedule, Category, KeyOutcome, KeyPress, LedPattern, Outcome, Panel, PanelConfig,
    PanelError, PanelInput, ResourceRef, ScreenMode, Transition,
};

const MODES: [ScreenMode; 6] = [
    ScreenMode::HomeGrid,
    ScreenMode::Detail,
    ScreenMode::Confirmation,
    ScreenMode::SleepMode,
    ScreenMode::NotesSubmenu,
    ScreenMode::Settings,
];

/// Detail timer values cycled by the first settings item.
const DETAIL_TIMERS: [u64; 4] = [5, 7, 10, 15];

/// Screen brightness while sleep mode is idle.
const SLEEP_BRIGHTNESS: u8 = 10;

pub fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("images"));

    if let Err(e) = run(&dir) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(dir: &Path) -> Result<(), PanelError> {
    let images = load_images(dir)?;
    let home = images.get(&ScreenMode::HomeGrid).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no home_grid.jpg in {}", dir.display()),
        )
    })?;

    let config = PanelConfig::default().with_brightness_schedule(BrightnessSchedule::default());
    let panel = open(&config, home)?;
    info!("Panel ready, images from {}", dir.display());

    let mut app = App::new(panel, images, &config);
    app.run();
    app.panel.shutdown();
    Ok(())
}

#[cfg(target_os = "linux")]
fn open(config: &PanelConfig, home: &[u8]) -> Result<Panel, PanelError> {
    Panel::open(config, home)
}

#[cfg(not(target_os = "linux"))]
fn open(_config: &PanelConfig, _home: &[u8]) -> Result<Panel, PanelError> {
    Err(PanelError::LinkUnavailable(
        "hidraw is only available on Linux".into(),
    ))
}

fn load_images(dir: &Path) -> Result<HashMap<ScreenMode, Vec<u8>>, PanelError> {
    let mut images = HashMap::new();
    for mode in MODES {
        let path = dir.join(format!("{}.jpg", mode.as_str()));
        match std::fs::read(&path) {
            Ok(bytes) => {
                images.insert(mode, bytes);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("{} missing, {} will not be redrawn", path.display(), mode);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(images)
}

struct App {
    panel: Panel,
    images: HashMap<ScreenMode, Vec<u8>>,
    shown: ScreenMode,
    brightness: u8,
    schedule: Option<BrightnessSchedule>,
    // Last level the schedule asked for
    scheduled: Option<u8>,

    // Stand-ins for backend record ids
    next_record: u64,
    next_sleep: u64,
}

impl App {
    fn new(panel: Panel, images: HashMap<ScreenMode, Vec<u8>>, config: &PanelConfig) -> Self {
        Self {
            panel,
            images,
            shown: ScreenMode::HomeGrid,
            brightness: config.brightness,
            schedule: config.brightness_schedule,
            scheduled: None,
            next_record: 0,
            next_sleep: 0,
        }
    }

    fn run(&mut self) {
        let shutdown = self.panel.shutdown_listener();
        for input in self.panel.inputs() {
            match input {
                PanelInput::Press(press) => self.on_key(press),
                PanelInput::Tick(at) => self.on_tick(at),
            }
        }
        if !shutdown.is_triggered() {
            error!("Input stopped, panel link lost");
        }
    }

    fn on_key(&mut self, press: KeyPress) {
        // Acknowledge first, before any other side effect.
        self.panel.led().request(LedPattern::acknowledge());

        let KeyOutcome {
            expired,
            transition,
            ..
        } = self.panel.state().handle_key(press.key, press.at);
        for fired in expired {
            self.apply(fired);
        }
        self.apply(transition);
        self.redraw();
    }

    fn on_tick(&mut self, now: Instant) {
        for fired in self.panel.state().tick(now) {
            self.apply(fired);
        }
        self.redraw();
        if self.shown == ScreenMode::HomeGrid {
            self.check_schedule();
        }
    }

    /// Follow the schedule on day and night changes only, so a manual
    /// setting holds until the next one.
    fn check_schedule(&mut self) {
        let Some(schedule) = self.schedule else {
            return;
        };
        let now = Local::now();
        let minute = (now.hour() * 60 + now.minute()) as u16;
        let level = schedule.level_at(minute);
        if self.scheduled == Some(level) {
            return;
        }
        debug!("Scheduled brightness {} at {}", level, now.format("%H:%M"));
        self.scheduled = Some(level);
        self.brightness = level;
        self.set_brightness(level);
    }

    fn apply(&mut self, transition: Transition) {
        match transition {
            Transition::Confirmed { id, outcome } => self.confirmed(id, outcome),
            Transition::SleepStarted => {
                self.next_sleep += 1;
                let sleep_id = format!("sleep-{}", self.next_sleep);
                info!("Start sleep {}", sleep_id);
                self.panel.state().attach_sleep(sleep_id);
                self.panel.led().request(LedPattern::sleep_start());
            }
            Transition::SleepActivity => {
                self.set_brightness(self.brightness);
            }
            Transition::SleepIdle => {
                self.set_brightness(SLEEP_BRIGHTNESS);
            }
            Transition::Undo { resource } => {
                info!("Delete {}", resource);
                self.panel.led().request(LedPattern::undo());
            }
            Transition::EnteredDetail { action } => info!("Choosing {}", action),
            Transition::Cancelled | Transition::Back | Transition::ConfirmationExpired => {}
            Transition::OpenedNotes | Transition::OpenedSettings => {}
            Transition::Refresh(_) | Transition::Ignored => {}
        }
    }

    fn confirmed(&mut self, id: u64, outcome: Outcome) {
        match outcome {
            Outcome::Action {
                action,
                option,
                auto,
            } => {
                info!(
                    "Log {} (option {:?}{})",
                    action,
                    option,
                    if auto { ", auto" } else { "" }
                );
                self.record(id, &action);
                self.panel
                    .led()
                    .request(LedPattern::success(category(&action)));
            }
            Outcome::Note(item) => {
                info!("Log note {}", item);
                self.record(id, "notes");
                self.panel.led().request(LedPattern::success(Category::Note));
            }
            Outcome::Setting(item) => self.setting(item),
            Outcome::Wake { sleep_id, slept } => {
                info!("End sleep {:?} after {:?}", sleep_id, slept);
                self.set_brightness(self.brightness);
                self.panel.led().request(LedPattern::wake());
            }
        }
    }

    fn record(&mut self, id: u64, kind: &str) {
        self.next_record += 1;
        let resource = ResourceRef::new(kind, self.next_record.to_string());
        if !self.panel.state().attach_resource(id, resource) {
            info!("Confirmation {} already gone, no undo offered", id);
        }
    }

    fn setting(&mut self, item: usize) {
        let state = self.panel.state();
        match item {
            0 => {
                let current = state.timers().detail.as_secs();
                let next = DETAIL_TIMERS
                    .iter()
                    .copied()
                    .find(|&secs| secs > current)
                    .unwrap_or(DETAIL_TIMERS[0]);
                state.set_detail_timer(Duration::from_secs(next));
            }
            1 => {
                let enabled = !state.quick_log();
                state.set_quick_log(enabled);
                info!("Quick log {}", if enabled { "on" } else { "off" });
            }
            2 => {
                self.brightness = if self.brightness >= 100 {
                    20
                } else {
                    self.brightness + 20
                };
                self.set_brightness(self.brightness);
            }
            3 => match state.recent_actions().first() {
                Some(resource) => {
                    info!("Delete {}", resource);
                    state.remove_recent_action(resource);
                    self.panel.led().request(LedPattern::undo());
                }
                None => info!("Nothing to undo"),
            },
            _ => {
                if let Err(e) = self.panel.led().clear() {
                    warn!("LED clear failed: {}", e);
                }
                return;
            }
        }
        self.panel.led().request(LedPattern::success(Category::Sync));
    }

    fn set_brightness(&self, level: u8) {
        if let Err(e) = self.panel.set_brightness(level) {
            warn!("Brightness change failed: {}", e);
        }
    }

    fn redraw(&mut self) {
        let mode = self.panel.state().mode();
        if mode == self.shown {
            return;
        }
        self.shown = mode;
        let Some(image) = self.images.get(&mode) else {
            return;
        };
        if let Err(e) = self.panel.show_image(image) {
            warn!("Could not draw {}: {}", mode, e);
        }
    }
}

fn category(action: &str) -> Category {
    match action {
        "pee" | "poop" | "pee_and_poop" => Category::Diaper,
        _ => Category::Feeding,
    }
}
