//! Display state machine.
//!
//! The panel shows exactly one screen mode at a time. All mode data lives in
//! one tagged [`DisplayState`] behind one re-entrant lock, and both drivers,
//! key presses and the periodic tick, go through [`StateMachine`].
//!
//! A key press first applies any timer expiry due at its own timestamp and
//! only then looks up the mode, inside the same lock acquisition. A press is
//! therefore always evaluated against the mode that was current at the
//! instant of the press, never one the tick replaces a moment later.
//!
//! The machine never blocks on the outside world. Confirmations are entered
//! immediately and carry an id; the controller calls
//! [`StateMachine::attach_resource`] once its backend call returns.

use crate::layout::{HomeKey, KeyLayout};
use log::{debug, info};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Default detail countdown before the highlighted option is committed.
pub const DETAIL_TIMER: Duration = Duration::from_secs(7);

/// Default time a confirmation stays up (and undo stays available).
pub const CONFIRMATION_DURATION: Duration = Duration::from_secs(5);

/// Default time without a press before sleep mode reports idle.
pub const SLEEP_IDLE: Duration = Duration::from_secs(60);

/// Number of attached resources kept for the undo list.
pub const RECENT_ACTIONS_MAX: usize = 5;

/// Timer durations used by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timers {
    /// Detail countdown. Zero, or a value too large to schedule, disables
    /// auto-commit.
    pub detail: Duration,
    /// Confirmation lifetime.
    pub confirmation: Duration,
    /// Sleep-mode idle timeout.
    pub sleep_idle: Duration,
}

impl Default for Timers {
    fn default() -> Self {
        Self {
            detail: DETAIL_TIMER,
            confirmation: CONFIRMATION_DURATION,
            sleep_idle: SLEEP_IDLE,
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Screen mode without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScreenMode {
    /// Main grid of actions.
    HomeGrid,
    /// Option picker with a countdown.
    Detail,
    /// Result screen with an undo window.
    Confirmation,
    /// Dimmed sleep screen.
    SleepMode,
    /// Notes categories.
    NotesSubmenu,
    /// Settings menu.
    Settings,
}

impl ScreenMode {
    /// Short name, for logs and image file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenMode::HomeGrid => "home_grid",
            ScreenMode::Detail => "detail",
            ScreenMode::Confirmation => "confirmation",
            ScreenMode::SleepMode => "sleep_mode",
            ScreenMode::NotesSubmenu => "notes_submenu",
            ScreenMode::Settings => "settings",
        }
    }
}

impl fmt::Display for ScreenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend record that an undo would delete.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Collection the record lives in.
    pub kind: String,
    /// Record id.
    pub id: String,
}

impl ResourceRef {
    /// Reference `id` in `kind`.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// What a confirmation screen confirms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A home-grid action.
    Action {
        /// Action name from the layout.
        action: String,
        /// Detail option, if the action had a detail step.
        option: Option<usize>,
        /// Whether the detail timer chose the option.
        auto: bool,
    },
    /// A notes submenu item.
    Note(usize),
    /// A settings item.
    Setting(usize),
    /// Sleep ended. Never undoable.
    Wake {
        /// Id of the sleep that ended, if known.
        sleep_id: Option<String>,
        /// Time spent in sleep mode, if it was entered on this panel.
        slept: Option<Duration>,
    },
}

impl Outcome {
    fn undoable(&self) -> bool {
        matches!(self, Outcome::Action { .. } | Outcome::Note(_))
    }
}

/// Data of the detail screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailScreen {
    /// Action being parameterized.
    pub action: String,
    /// Number of options on screen.
    pub option_count: usize,
    /// Highlighted option, committed on expiry.
    pub selected: usize,
    /// Auto-commit instant, `None` if the timer is disabled.
    pub expires: Option<Instant>,
}

/// Data of the confirmation screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationScreen {
    /// Id used to attach the backend resource later.
    pub id: u64,
    /// What was confirmed.
    pub outcome: Outcome,
    /// Backend record for undo, once attached.
    pub resource: Option<ResourceRef>,
    /// Return-home instant, `None` if the duration is out of range.
    pub expires: Option<Instant>,
}

/// Data of sleep mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepScreen {
    /// When sleep mode was entered.
    pub started: Instant,
    /// Backend sleep id, once attached.
    pub sleep_id: Option<String>,
    /// Last key press inside sleep mode.
    pub last_activity: Instant,
    /// Whether idle was already reported since the last press.
    pub idle: bool,
}

/// The panel's screen state. Exactly one mode is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayState {
    /// Main grid.
    HomeGrid,
    /// Option picker.
    Detail(DetailScreen),
    /// Result screen.
    Confirmation(ConfirmationScreen),
    /// Sleep screen.
    SleepMode(SleepScreen),
    /// Notes categories.
    NotesSubmenu,
    /// Settings menu.
    Settings,
}

impl DisplayState {
    /// The active mode.
    pub fn mode(&self) -> ScreenMode {
        match self {
            DisplayState::HomeGrid => ScreenMode::HomeGrid,
            DisplayState::Detail(_) => ScreenMode::Detail,
            DisplayState::Confirmation(_) => ScreenMode::Confirmation,
            DisplayState::SleepMode(_) => ScreenMode::SleepMode,
            DisplayState::NotesSubmenu => ScreenMode::NotesSubmenu,
            DisplayState::Settings => ScreenMode::Settings,
        }
    }

    /// When the active mode times out on its own, if it does.
    pub fn deadline(&self) -> Option<Instant> {
        match self {
            DisplayState::Detail(detail) => detail.expires,
            DisplayState::Confirmation(confirmation) => confirmation.expires,
            _ => None,
        }
    }
}

// =============================================================================
// Transitions
// =============================================================================

/// What a key press or tick did. The controller acts on these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing is defined for this event in this mode.
    Ignored,
    /// Home grid to detail.
    EnteredDetail {
        /// Action being parameterized.
        action: String,
    },
    /// A confirmation screen was entered. The controller performs the
    /// external call and attaches the result with `id`.
    Confirmed {
        /// Confirmation id.
        id: u64,
        /// What was confirmed.
        outcome: Outcome,
    },
    /// Home grid to sleep mode.
    SleepStarted,
    /// A non-wake key in sleep mode: wake the backlight, stay asleep.
    SleepActivity,
    /// No key pressed in sleep mode for the idle timeout.
    SleepIdle,
    /// Home grid to the notes submenu.
    OpenedNotes,
    /// Home grid to settings.
    OpenedSettings,
    /// Detail cancelled.
    Cancelled,
    /// Back out of a submenu.
    Back,
    /// Undo pressed in time. The controller deletes `resource`.
    Undo {
        /// Record to delete.
        resource: ResourceRef,
    },
    /// Confirmation timed out.
    ConfirmationExpired,
    /// Nothing changed but the screen shows a timer and should be redrawn.
    Refresh(ScreenMode),
}

/// Result of one key press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOutcome {
    /// Logical time the press was evaluated at.
    pub at: Instant,
    /// Timer transitions applied before the press was evaluated.
    pub expired: Vec<Transition>,
    /// Mode the press was evaluated against.
    pub mode: ScreenMode,
    /// That mode's deadline at evaluation time.
    pub deadline: Option<Instant>,
    /// What the press did.
    pub transition: Transition,
    /// Mode after the press.
    pub entered: ScreenMode,
}

enum Expiry {
    Commit(Outcome, Instant),
    ReturnHome,
    Idle,
}

struct Inner {
    state: DisplayState,
    clock: Option<Instant>,
    timers: Timers,
    layout: KeyLayout,
    quick_log: bool,
    active_sleep: Option<String>,
    recent: VecDeque<ResourceRef>,
    next_id: u64,
}

impl Inner {
    /// Logical time never runs backwards, whatever order callers arrive in.
    fn stamp(&mut self, now: Instant) -> Instant {
        let at = match self.clock {
            Some(last) if last > now => last,
            _ => now,
        };
        self.clock = Some(at);
        at
    }

    fn due(&self, now: Instant) -> Option<Expiry> {
        match &self.state {
            DisplayState::Detail(detail) => match detail.expires {
                Some(expires) if now >= expires => Some(Expiry::Commit(
                    Outcome::Action {
                        action: detail.action.clone(),
                        option: Some(detail.selected),
                        auto: true,
                    },
                    expires,
                )),
                _ => None,
            },
            DisplayState::Confirmation(ConfirmationScreen {
                expires: Some(expires),
                ..
            }) if now >= *expires => Some(Expiry::ReturnHome),
            DisplayState::SleepMode(sleep)
                if !sleep.idle
                    && now.saturating_duration_since(sleep.last_activity)
                        >= self.timers.sleep_idle =>
            {
                Some(Expiry::Idle)
            }
            _ => None,
        }
    }

    /// Apply every time-based transition due at `now`, in order.
    fn advance(&mut self, now: Instant) -> Vec<Transition> {
        let mut fired = Vec::new();
        while let Some(expiry) = self.due(now) {
            match expiry {
                // The confirmation starts when the detail expired, not now.
                Expiry::Commit(outcome, at) => {
                    let transition = self.confirm(outcome, at);
                    fired.push(transition);
                }
                Expiry::ReturnHome => {
                    self.state = DisplayState::HomeGrid;
                    fired.push(Transition::ConfirmationExpired);
                }
                Expiry::Idle => {
                    if let DisplayState::SleepMode(sleep) = &mut self.state {
                        sleep.idle = true;
                    }
                    fired.push(Transition::SleepIdle);
                }
            }
        }
        fired
    }

    fn confirm(&mut self, outcome: Outcome, at: Instant) -> Transition {
        self.next_id += 1;
        let id = self.next_id;
        self.state = DisplayState::Confirmation(ConfirmationScreen {
            id,
            outcome: outcome.clone(),
            resource: None,
            expires: at.checked_add(self.timers.confirmation),
        });
        Transition::Confirmed { id, outcome }
    }

    fn press(&mut self, key: u8, at: Instant) -> Transition {
        match &self.state {
            DisplayState::HomeGrid => self.press_home(key, at),

            DisplayState::Detail(detail) => {
                if key == self.layout.cancel_key {
                    self.state = DisplayState::HomeGrid;
                    return Transition::Cancelled;
                }
                match self.layout.option_index(key) {
                    Some(option) if option < detail.option_count => {
                        let outcome = Outcome::Action {
                            action: detail.action.clone(),
                            option: Some(option),
                            auto: false,
                        };
                        self.confirm(outcome, at)
                    }
                    _ => Transition::Ignored,
                }
            }

            DisplayState::Confirmation(confirmation) => {
                let resource = match &confirmation.resource {
                    Some(resource) if key == self.layout.undo_key => resource.clone(),
                    _ => return Transition::Ignored,
                };
                self.recent.retain(|r| *r != resource);
                self.state = DisplayState::HomeGrid;
                Transition::Undo { resource }
            }

            DisplayState::SleepMode(sleep) => {
                if key == self.layout.wake_key {
                    let outcome = Outcome::Wake {
                        sleep_id: sleep.sleep_id.clone(),
                        slept: Some(at.saturating_duration_since(sleep.started)),
                    };
                    self.active_sleep = None;
                    return self.confirm(outcome, at);
                }
                if let DisplayState::SleepMode(sleep) = &mut self.state {
                    sleep.last_activity = at;
                    sleep.idle = false;
                }
                Transition::SleepActivity
            }

            DisplayState::NotesSubmenu => {
                if key == self.layout.back_key {
                    self.state = DisplayState::HomeGrid;
                    return Transition::Back;
                }
                match self.layout.note_index(key) {
                    Some(item) => self.confirm(Outcome::Note(item), at),
                    None => Transition::Ignored,
                }
            }

            DisplayState::Settings => {
                if key == self.layout.back_key {
                    self.state = DisplayState::HomeGrid;
                    return Transition::Back;
                }
                match self.layout.setting_index(key) {
                    Some(item) => self.confirm(Outcome::Setting(item), at),
                    None => Transition::Ignored,
                }
            }
        }
    }

    fn press_home(&mut self, key: u8, at: Instant) -> Transition {
        let Some(action) = self.layout.home.get(&key).cloned() else {
            return Transition::Ignored;
        };
        match action {
            HomeKey::Detail(spec) if spec.option_count == 0 => self.confirm(
                Outcome::Action {
                    action: spec.action,
                    option: None,
                    auto: false,
                },
                at,
            ),
            HomeKey::Detail(spec) if self.quick_log && spec.skippable => {
                let option = spec.default_option();
                self.confirm(
                    Outcome::Action {
                        action: spec.action,
                        option: Some(option),
                        auto: false,
                    },
                    at,
                )
            }
            HomeKey::Detail(spec) => {
                let expires = if self.timers.detail.is_zero() {
                    None
                } else {
                    at.checked_add(self.timers.detail)
                };
                self.state = DisplayState::Detail(DetailScreen {
                    action: spec.action.clone(),
                    option_count: spec.option_count,
                    selected: spec.default_option(),
                    expires,
                });
                Transition::EnteredDetail {
                    action: spec.action,
                }
            }
            HomeKey::Instant(action) => self.confirm(
                Outcome::Action {
                    action,
                    option: None,
                    auto: false,
                },
                at,
            ),
            HomeKey::SleepToggle => match self.active_sleep.take() {
                Some(sleep_id) => self.confirm(
                    Outcome::Wake {
                        sleep_id: Some(sleep_id),
                        slept: None,
                    },
                    at,
                ),
                None => {
                    self.state = DisplayState::SleepMode(SleepScreen {
                        started: at,
                        sleep_id: None,
                        last_activity: at,
                        idle: false,
                    });
                    Transition::SleepStarted
                }
            },
            HomeKey::Notes => {
                self.state = DisplayState::NotesSubmenu;
                Transition::OpenedNotes
            }
            HomeKey::Settings => {
                self.state = DisplayState::Settings;
                Transition::OpenedSettings
            }
        }
    }

    fn push_recent(&mut self, resource: ResourceRef) {
        self.recent.retain(|r| *r != resource);
        self.recent.push_front(resource);
        self.recent.truncate(RECENT_ACTIONS_MAX);
    }
}

// =============================================================================
// State machine
// =============================================================================

/// Thread-safe owner of the [`DisplayState`].
///
/// Every method is one atomic step under the same re-entrant lock.
/// [`transaction`](Self::transaction) extends that step over several calls.
///
/// # Example
///
/// ```
/// use macropad_core::{KeyLayout, ScreenMode, StateMachine, Timers, Transition};
/// use std::time::{Duration, Instant};
///
/// let machine = StateMachine::new(Timers::default(), KeyLayout::default());
/// let t0 = Instant::now();
///
/// // Poop: four consistency options, "formed" preselected.
/// let press = machine.handle_key(12, t0);
/// assert_eq!(press.entered, ScreenMode::Detail);
///
/// // Nobody picks an option; the tick commits the default.
/// let fired = machine.tick(t0 + Duration::from_secs(7));
/// assert!(matches!(fired[0], Transition::Confirmed { .. }));
/// assert_eq!(machine.mode(), ScreenMode::Confirmation);
/// ```
pub struct StateMachine {
    inner: ReentrantMutex<RefCell<Inner>>,
}

impl StateMachine {
    /// A machine on the home grid.
    pub fn new(timers: Timers, layout: KeyLayout) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(Inner {
                state: DisplayState::HomeGrid,
                clock: None,
                timers,
                layout,
                quick_log: false,
                active_sleep: None,
                recent: VecDeque::new(),
                next_id: 0,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        f(&mut inner)
    }

    /// Run `f` with the lock held across every call it makes on `self`.
    ///
    /// Nothing else can observe or change the state until `f` returns.
    pub fn transaction<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let _guard = self.inner.lock();
        f(self)
    }

    /// Evaluate a key press at `now`, the instant the press arrived.
    ///
    /// Timer expiries due at `now` are applied first, in the same step.
    /// Presses must be handled before any tick later than their own
    /// instant; [`PanelInputs`](crate::PanelInputs) delivers them in that
    /// order.
    pub fn handle_key(&self, key: u8, now: Instant) -> KeyOutcome {
        self.with(|inner| {
            let at = inner.stamp(now);
            let expired = inner.advance(at);
            let mode = inner.state.mode();
            let deadline = inner.state.deadline();
            let transition = inner.press(key, at);
            let entered = inner.state.mode();
            debug!("Key {} on {}: {:?} -> {}", key, mode, transition, entered);
            KeyOutcome {
                at,
                expired,
                mode,
                deadline,
                transition,
                entered,
            }
        })
    }

    /// Apply the time-based transitions due at `now`.
    ///
    /// If none fired and the screen shows a running timer, reports a
    /// [`Transition::Refresh`].
    pub fn tick(&self, now: Instant) -> Vec<Transition> {
        self.with(|inner| {
            let at = inner.stamp(now);
            let mut fired = inner.advance(at);
            for transition in &fired {
                debug!("Tick: {:?}", transition);
            }
            if fired.is_empty() {
                let mode = inner.state.mode();
                if matches!(mode, ScreenMode::Detail | ScreenMode::SleepMode) {
                    fired.push(Transition::Refresh(mode));
                }
            }
            fired
        })
    }

    /// Attach the backend record to confirmation `id`.
    ///
    /// Refused if that confirmation is no longer on screen, already has a
    /// record, or confirms something that cannot be undone.
    pub fn attach_resource(&self, id: u64, resource: ResourceRef) -> bool {
        self.with(|inner| {
            let DisplayState::Confirmation(confirmation) = &mut inner.state else {
                return false;
            };
            if confirmation.id != id
                || confirmation.resource.is_some()
                || !confirmation.outcome.undoable()
            {
                return false;
            }
            confirmation.resource = Some(resource.clone());
            inner.push_recent(resource);
            true
        })
    }

    /// Record the backend id of the sleep shown in sleep mode.
    pub fn attach_sleep(&self, sleep_id: impl Into<String>) -> bool {
        self.with(|inner| match &mut inner.state {
            DisplayState::SleepMode(sleep) => {
                sleep.sleep_id = Some(sleep_id.into());
                true
            }
            _ => false,
        })
    }

    /// Record a sleep started elsewhere. Ignored while in sleep mode.
    pub fn set_active_sleep(&self, sleep_id: Option<String>) -> bool {
        self.with(|inner| {
            if inner.state.mode() == ScreenMode::SleepMode {
                return false;
            }
            inner.active_sleep = sleep_id;
            true
        })
    }

    /// Sleep started elsewhere and not yet ended here.
    pub fn active_sleep(&self) -> Option<String> {
        self.with(|inner| inner.active_sleep.clone())
    }

    /// Change the detail countdown for screens entered from now on.
    /// Zero disables auto-commit.
    pub fn set_detail_timer(&self, duration: Duration) {
        self.with(|inner| inner.timers.detail = duration);
        info!("Detail timer set to {:?}", duration);
    }

    /// Skip the detail screen for skippable actions.
    pub fn set_quick_log(&self, enabled: bool) {
        self.with(|inner| inner.quick_log = enabled);
    }

    /// Whether quick log is on.
    pub fn quick_log(&self) -> bool {
        self.with(|inner| inner.quick_log)
    }

    /// Current timer durations.
    pub fn timers(&self) -> Timers {
        self.with(|inner| inner.timers)
    }

    /// Add a record to the recent list without a confirmation.
    pub fn push_recent_action(&self, resource: ResourceRef) {
        self.with(|inner| inner.push_recent(resource));
    }

    /// Drop a record from the recent list.
    pub fn remove_recent_action(&self, resource: &ResourceRef) -> bool {
        self.with(|inner| {
            let before = inner.recent.len();
            inner.recent.retain(|r| r != resource);
            inner.recent.len() != before
        })
    }

    /// Recent records, newest first.
    pub fn recent_actions(&self) -> Vec<ResourceRef> {
        self.with(|inner| inner.recent.iter().cloned().collect())
    }

    /// Go straight to the home grid.
    pub fn return_home(&self) {
        self.with(|inner| inner.state = DisplayState::HomeGrid);
    }

    /// The active mode.
    pub fn mode(&self) -> ScreenMode {
        self.with(|inner| inner.state.mode())
    }

    /// A copy of the whole state.
    pub fn snapshot(&self) -> DisplayState {
        self.with(|inner| inner.state.clone())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new(Timers::default(), KeyLayout::default())
    }
}
