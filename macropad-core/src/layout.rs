//! Key layout: which physical key does what on each screen.
//!
//! Key ids are the ones the device reports. The 15 display keys form a
//! 5x3 grid numbered bottom row 1-5, middle row 6-10, top row 11-15.

use std::collections::HashMap;

/// Escape key on every screen: undo on confirmations, cancel on detail,
/// back on submenus. Bottom-left.
pub const UNDO_KEY: u8 = 1;

/// Ends sleep mode. Sits where the sleep toggle is on the home grid.
pub const WAKE_KEY: u8 = 13;

const TOP_ROW: [u8; 5] = [11, 12, 13, 14, 15];

/// A home-grid action that takes one parameter from a detail screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailSpec {
    /// Action name handed back to the controller.
    pub action: String,
    /// Number of options shown, mapped onto the option keys in order.
    pub option_count: usize,
    /// Option committed when the detail timer runs out.
    pub default_index: usize,
    /// Whether quick-log mode may skip the detail screen.
    pub skippable: bool,
}

impl DetailSpec {
    /// A detail action with `option_count` options.
    pub fn new(action: impl Into<String>, option_count: usize, default_index: usize) -> Self {
        Self {
            action: action.into(),
            option_count,
            default_index,
            skippable: false,
        }
    }

    /// Allow quick-log mode to commit the default straight away.
    pub fn skippable(mut self) -> Self {
        self.skippable = true;
        self
    }

    /// The default option, clamped into range.
    pub fn default_option(&self) -> usize {
        self.default_index.min(self.option_count.saturating_sub(1))
    }
}

/// What a home-grid key does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HomeKey {
    /// Open a detail screen.
    Detail(DetailSpec),
    /// Log immediately and confirm.
    Instant(String),
    /// Start sleep mode, or end an externally active sleep.
    SleepToggle,
    /// Open the notes submenu.
    Notes,
    /// Open settings.
    Settings,
}

/// Physical key assignments for every screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    /// Home-grid key map. Unmapped keys are ignored.
    pub home: HashMap<u8, HomeKey>,
    /// Undo key on confirmation screens.
    pub undo_key: u8,
    /// Cancel key on detail screens.
    pub cancel_key: u8,
    /// Back key on the notes submenu and settings.
    pub back_key: u8,
    /// Wake key in sleep mode.
    pub wake_key: u8,
    /// Detail option keys; option `i` is `option_keys[i]`.
    pub option_keys: Vec<u8>,
    /// Notes item keys; item `i` is `notes_keys[i]`.
    pub notes_keys: Vec<u8>,
    /// Settings item keys; item `i` is `settings_keys[i]`.
    pub settings_keys: Vec<u8>,
}

impl KeyLayout {
    /// Designated keys only, with nothing on the home grid.
    pub fn empty() -> Self {
        Self {
            home: HashMap::new(),
            undo_key: UNDO_KEY,
            cancel_key: UNDO_KEY,
            back_key: UNDO_KEY,
            wake_key: WAKE_KEY,
            option_keys: TOP_ROW[..4].to_vec(),
            // Top row, then middle, then bottom, skipping the back key.
            notes_keys: vec![11, 12, 13, 14, 15, 6, 7, 8, 9, 10, 2, 3, 4, 5],
            settings_keys: TOP_ROW.to_vec(),
        }
    }

    /// Map a home-grid key.
    pub fn with_home(mut self, key: u8, action: HomeKey) -> Self {
        self.home.insert(key, action);
        self
    }

    /// Keep only as many notes keys as there are items.
    pub fn with_notes_items(mut self, count: usize) -> Self {
        self.notes_keys.truncate(count);
        self
    }

    /// Keep only as many settings keys as there are items.
    pub fn with_settings_items(mut self, count: usize) -> Self {
        self.settings_keys.truncate(count);
        self
    }

    /// Detail option index for `key`.
    pub fn option_index(&self, key: u8) -> Option<usize> {
        self.option_keys.iter().position(|&k| k == key)
    }

    /// Notes item index for `key`.
    pub fn note_index(&self, key: u8) -> Option<usize> {
        self.notes_keys.iter().position(|&k| k == key)
    }

    /// Settings item index for `key`.
    pub fn setting_index(&self, key: u8) -> Option<usize> {
        self.settings_keys.iter().position(|&k| k == key)
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::empty()
            .with_home(11, HomeKey::Detail(DetailSpec::new("breast_left", 2, 0).skippable()))
            .with_home(6, HomeKey::Detail(DetailSpec::new("breast_right", 2, 0).skippable()))
            .with_home(9, HomeKey::Detail(DetailSpec::new("bottle", 3, 0)))
            .with_home(12, HomeKey::Detail(DetailSpec::new("poop", 4, 2)))
            .with_home(2, HomeKey::Detail(DetailSpec::new("pee_and_poop", 4, 2)))
            .with_home(7, HomeKey::Instant("pee".into()))
            .with_home(3, HomeKey::Instant("pump".into()))
            .with_home(13, HomeKey::SleepToggle)
            .with_home(8, HomeKey::Notes)
            .with_home(15, HomeKey::Settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_designated_keys() {
        let layout = KeyLayout::default();
        assert_eq!(layout.undo_key, 1);
        assert_eq!(layout.cancel_key, 1);
        assert_eq!(layout.back_key, 1);
        assert_eq!(layout.wake_key, 13);
        assert_eq!(layout.home.get(&13), Some(&HomeKey::SleepToggle));
        assert!(!layout.home.contains_key(&layout.undo_key));
    }

    #[test]
    fn test_item_indices() {
        let layout = KeyLayout::default();
        assert_eq!(layout.option_index(11), Some(0));
        assert_eq!(layout.option_index(14), Some(3));
        assert_eq!(layout.option_index(15), None);
        assert_eq!(layout.note_index(6), Some(5));
        assert_eq!(layout.note_index(1), None);
        assert_eq!(layout.setting_index(15), Some(4));
    }

    #[test]
    fn test_item_truncation() {
        let layout = KeyLayout::empty().with_notes_items(3).with_settings_items(2);
        assert_eq!(layout.notes_keys, vec![11, 12, 13]);
        assert_eq!(layout.note_index(14), None);
        assert_eq!(layout.settings_keys, vec![11, 12]);
    }

    #[test]
    fn test_default_option_clamped() {
        assert_eq!(DetailSpec::new("x", 4, 2).default_option(), 2);
        assert_eq!(DetailSpec::new("x", 2, 9).default_option(), 1);
        assert_eq!(DetailSpec::new("x", 0, 0).default_option(), 0);
    }
}
