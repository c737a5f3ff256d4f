//! Error types for the panel driver.

/// Errors that can occur when driving the panel.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    /// The device could not be opened (not present, or permission denied).
    #[error("Link unavailable: {0}")]
    LinkUnavailable(String),

    /// A read or write failed after the link was open.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    /// A buffer handed to the codec is not a whole frame.
    #[error("Malformed frame: expected {expected} bytes, got {len}")]
    MalformedFrame {
        /// Length of the offending buffer.
        len: usize,
        /// Length the codec requires.
        expected: usize,
    },

    /// A frame does not carry a recognised CRT command.
    #[error("Unknown command frame")]
    UnknownCommand,

    /// A brightness level was outside the valid range.
    #[error("Invalid level {value} for {target} (expected 0-{max})")]
    InvalidLevel {
        /// What the level was meant for.
        target: &'static str,
        /// The invalid value provided.
        value: u8,
        /// Maximum allowed value.
        max: u8,
    },

    /// A payload does not fit the command it was given to.
    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge {
        /// Length of the payload.
        len: usize,
        /// Maximum length accepted.
        max: usize,
    },

    /// An image transfer was requested with no image data.
    #[error("Image data is empty")]
    EmptyImage,

    /// The link was closed or the device went away.
    #[error("Link closed")]
    LinkClosed,
}

impl PanelError {
    /// Whether this error means the link is gone for good.
    ///
    /// Background loops keep running through anything that is not fatal;
    /// a fatal error is left to an external supervisor to recover from.
    pub fn is_fatal(&self) -> bool {
        match self {
            PanelError::LinkClosed | PanelError::LinkUnavailable(_) => true,
            PanelError::IoFailure(err) => {
                if err.kind() == std::io::ErrorKind::BrokenPipe {
                    return true;
                }
                device_gone(err)
            }
            _ => false,
        }
    }
}

#[cfg(target_os = "linux")]
fn device_gone(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENODEV)
}

#[cfg(not(target_os = "linux"))]
fn device_gone(_err: &std::io::Error) -> bool {
    false
}
