//! Construction-time settings.
//!
//! Plain values only. Reading them from a file or the command line is the
//! caller's job.

use crate::display::Timers;
use crate::heartbeat::HEARTBEAT_INTERVAL;
use crate::input::{DEFAULT_DEBOUNCE, READ_POLL_INTERVAL};
use crate::layout::KeyLayout;
use crate::link::{DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID};
use std::time::Duration;

/// Default screen brightness on the 0-100 scale.
pub const DEFAULT_BRIGHTNESS: u8 = 80;

/// Default spacing of state machine ticks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Day and night screen brightness by local time of day.
///
/// Night runs from `night_start` up to, not including, `night_end` and may
/// wrap past midnight. Times are minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrightnessSchedule {
    /// Start of the night range.
    pub night_start: u16,
    /// End of the night range.
    pub night_end: u16,
    /// Level outside the night range, 0-100.
    pub day: u8,
    /// Level inside the night range, 0-100.
    pub night: u8,
}

impl Default for BrightnessSchedule {
    /// 21:00 to 07:00 at 20, otherwise 80.
    fn default() -> Self {
        Self {
            night_start: 21 * 60,
            night_end: 7 * 60,
            day: DEFAULT_BRIGHTNESS,
            night: 20,
        }
    }
}

impl BrightnessSchedule {
    /// A schedule from `(hour, minute)` pairs. Out of range times wrap.
    pub fn new(night_start: (u8, u8), night_end: (u8, u8), day: u8, night: u8) -> Self {
        let minutes = |(hour, minute): (u8, u8)| {
            (u16::from(hour) * 60 + u16::from(minute)) % MINUTES_PER_DAY
        };
        Self {
            night_start: minutes(night_start),
            night_end: minutes(night_end),
            day,
            night,
        }
    }

    /// Whether `minute_of_day` falls in the night range.
    pub fn is_night(&self, minute_of_day: u16) -> bool {
        let now = minute_of_day % MINUTES_PER_DAY;
        if self.night_start <= self.night_end {
            self.night_start <= now && now < self.night_end
        } else {
            now >= self.night_start || now < self.night_end
        }
    }

    /// The level to show at `minute_of_day`.
    pub fn level_at(&self, minute_of_day: u16) -> u8 {
        if self.is_night(minute_of_day) {
            self.night
        } else {
            self.day
        }
    }
}

/// Everything [`Panel`](crate::Panel) needs at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelConfig {
    /// USB vendor id of the panel.
    pub vendor_id: u16,
    /// USB product id of the panel.
    pub product_id: u16,
    /// Initial screen brightness, 0-100 before gamma correction.
    pub brightness: u8,
    /// Per-key debounce window.
    pub debounce: Duration,
    /// Bound on each input read wait.
    pub read_poll: Duration,
    /// Spacing of liveness frames.
    pub heartbeat_interval: Duration,
    /// Spacing of state machine ticks.
    pub tick_interval: Duration,
    /// State machine timers.
    pub timers: Timers,
    /// Key assignments.
    pub layout: KeyLayout,
    /// Time-of-day brightness, applied by the controller while home. Off
    /// when `None`.
    pub brightness_schedule: Option<BrightnessSchedule>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            brightness: DEFAULT_BRIGHTNESS,
            debounce: DEFAULT_DEBOUNCE,
            read_poll: READ_POLL_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            tick_interval: TICK_INTERVAL,
            timers: Timers::default(),
            layout: KeyLayout::default(),
            brightness_schedule: None,
        }
    }
}

impl PanelConfig {
    /// Target a different USB device.
    pub fn with_device(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    /// Set the initial screen brightness.
    pub fn with_brightness(mut self, brightness: u8) -> Self {
        self.brightness = brightness;
        self
    }

    /// Set the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the input read wait.
    pub fn with_read_poll(mut self, read_poll: Duration) -> Self {
        self.read_poll = read_poll;
        self
    }

    /// Set the heartbeat spacing.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the tick spacing.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the state machine timers.
    pub fn with_timers(mut self, timers: Timers) -> Self {
        self.timers = timers;
        self
    }

    /// Set the key layout.
    pub fn with_layout(mut self, layout: KeyLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Enable a day and night brightness schedule.
    pub fn with_brightness_schedule(mut self, schedule: BrightnessSchedule) -> Self {
        self.brightness_schedule = Some(schedule);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PanelConfig::default();
        assert_eq!(config.vendor_id, 0x5548);
        assert_eq!(config.product_id, 0x1000);
        assert_eq!(config.brightness, 80);
        assert_eq!(config.debounce, Duration::from_millis(150));
        assert_eq!(config.read_poll, Duration::from_millis(100));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.timers.detail, Duration::from_secs(7));
        assert_eq!(config.timers.confirmation, Duration::from_secs(5));
        assert_eq!(config.brightness_schedule, None);
    }

    #[test]
    fn test_builders() {
        let config = PanelConfig::default()
            .with_device(1, 2)
            .with_brightness(40)
            .with_debounce(Duration::from_millis(90))
            .with_tick_interval(Duration::from_millis(250));
        assert_eq!((config.vendor_id, config.product_id), (1, 2));
        assert_eq!(config.brightness, 40);
        assert_eq!(config.debounce, Duration::from_millis(90));
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.heartbeat_interval, HEARTBEAT_INTERVAL);
    }

    #[test]
    fn test_schedule_wraps_midnight() {
        let schedule = BrightnessSchedule::new((21, 0), (7, 0), 80, 20);
        assert_eq!(schedule.level_at(20 * 60 + 59), 80);
        assert_eq!(schedule.level_at(21 * 60), 20);
        assert_eq!(schedule.level_at(23 * 60 + 30), 20);
        assert_eq!(schedule.level_at(0), 20);
        assert_eq!(schedule.level_at(6 * 60 + 59), 20);
        assert_eq!(schedule.level_at(7 * 60), 80);
        assert_eq!(schedule.level_at(12 * 60), 80);
        assert_eq!(schedule, BrightnessSchedule::default());
    }

    #[test]
    fn test_schedule_within_one_day() {
        let schedule = BrightnessSchedule::new((13, 0), (15, 30), 70, 30);
        assert!(!schedule.is_night(12 * 60 + 59));
        assert!(schedule.is_night(13 * 60));
        assert!(schedule.is_night(15 * 60 + 29));
        assert!(!schedule.is_night(15 * 60 + 30));

        // An empty range is never night.
        let never = BrightnessSchedule::new((9, 0), (9, 0), 70, 30);
        assert!((0..MINUTES_PER_DAY).all(|minute| never.level_at(minute) == 70));
    }

    #[test]
    fn test_schedule_builder() {
        let config = PanelConfig::default().with_brightness_schedule(BrightnessSchedule::default());
        assert_eq!(
            config.brightness_schedule.map(|s| (s.night_start, s.night_end)),
            Some((21 * 60, 7 * 60))
        );
        assert_eq!(BrightnessSchedule::new((24, 30), (7, 0), 80, 20).night_start, 30);
    }
}
