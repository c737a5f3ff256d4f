//! Driver core for the Stream Dock M18 control panel.
//!
//! The panel is a 480x272 LCD behind a 5x3 grid of see-through keys, with a
//! 24-LED ring, attached over USB HID. It speaks the vendor's "CRT" command
//! set in fixed 1025-byte frames. This crate covers everything between the
//! raw HID node and an application's business logic:
//!
//! - [`Frame`] encoding and decoding for commands, images and button reports
//! - a [`Transport`] that serializes writes and keeps image transfers atomic
//! - the [`Heartbeat`] that keeps the firmware out of its demo mode
//! - the [`InputReader`] that filters echoes and debounces presses
//! - the [`LedController`] with supersession of running animations
//! - the [`StateMachine`] for screen modes and their timers
//!
//! # Requirements
//!
//! - Linux with hidraw, and read/write access to the panel's `/dev/hidrawN`
//!   (usually a udev rule for vendor `5548`, product `1000`)
//!
//! # Example
//!
//! ```no_run
//! use macropad_core::{LedPattern, Panel, PanelConfig, PanelError, PanelInput};
//!
//! fn main() -> Result<(), PanelError> {
//!     let config = PanelConfig::default();
//!     let home = std::fs::read("images/home_grid.jpg")?;
//!     let panel = Panel::open(&config, &home)?;
//!
//!     for input in panel.inputs() {
//!         match input {
//!             PanelInput::Press(press) => {
//!                 panel.led().request(LedPattern::acknowledge());
//!                 let outcome = panel.state().handle_key(press.key, press.at);
//!                 println!("{:?} -> {}", outcome.transition, outcome.entered);
//!             }
//!             PanelInput::Tick(at) => {
//!                 for fired in panel.state().tick(at) {
//!                     println!("{:?}", fired);
//!                 }
//!             }
//!         }
//!     }
//!
//!     panel.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! Use [`MockLink`] to run the whole core without hardware:
//!
//! ```
//! use macropad_core::{ButtonEvent, MockLink, Panel, PanelConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let link = Arc::new(MockLink::new());
//! let panel = Panel::start(link.clone(), &PanelConfig::default(), &[0u8; 64]).unwrap();
//!
//! link.push_button(ButtonEvent::pressed(7));
//! let event = panel.events().recv_timeout(Duration::from_secs(5)).unwrap();
//! assert_eq!(event.key, 7);
//! panel.shutdown();
//! ```

#![warn(missing_docs)]

mod config;
mod display;
mod error;
mod frame;
mod health;
mod heartbeat;
mod input;
mod layout;
mod led;
mod link;
mod mock;
mod panel;
mod shutdown;
mod transport;

// Re-export public API
pub use config::{BrightnessSchedule, DEFAULT_BRIGHTNESS, PanelConfig, TICK_INTERVAL};
pub use display::{
    CONFIRMATION_DURATION, ConfirmationScreen, DETAIL_TIMER, DetailScreen, DisplayState,
    KeyOutcome, Outcome, RECENT_ACTIONS_MAX, ResourceRef, SLEEP_IDLE, ScreenMode, SleepScreen,
    StateMachine, Timers, Transition,
};
pub use error::PanelError;
pub use frame::{
    ButtonEvent, Command, ECHO_KEY, FRAME_SIZE, Frame, ImageTarget, ImageTransfer, KeyState,
    LED_COUNT, PACKET_SIZE, Rgb, decode_button, decode_command, encode_button, encode_chunk,
    encode_command, gamma_corrected,
};
pub use health::LinkHealth;
pub use heartbeat::{HEARTBEAT_INTERVAL, Heartbeat, HeartbeatStats};
pub use input::{
    DEFAULT_DEBOUNCE, Debouncer, InputFence, InputReader, KeyPress, READ_POLL_INTERVAL,
};
pub use layout::{DetailSpec, HomeKey, KeyLayout, UNDO_KEY, WAKE_KEY};
pub use led::{Category, FlashOutcome, LedAnimation, LedController, LedPattern, LedStep};
pub use link::{DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID, Link};
#[cfg(target_os = "linux")]
pub use link::{HidrawLink, find_hidraw};
pub use mock::MockLink;
pub use panel::{Panel, PanelInput, PanelInputs};
pub use shutdown::{Shutdown, ShutdownListener};
pub use transport::Transport;
