//! Link health snapshot.

/// Counters describing how the link has behaved since startup.
///
/// The core never resets the device itself. A supervisor reads this
/// snapshot through [`Transport::health`](crate::Transport::health) and
/// decides when a run of failures warrants a hardware reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkHealth {
    /// Frames written successfully.
    pub frames_written: u64,
    /// Writes that failed.
    pub write_failures: u64,
    /// Writes that failed since the last successful one.
    pub consecutive_write_failures: u64,
    /// Reads that returned an error.
    pub read_failures: u64,
}

impl LinkHealth {
    /// Whether the last `threshold` writes all failed.
    pub fn is_degraded(&self, threshold: u64) -> bool {
        threshold > 0 && self.consecutive_write_failures >= threshold
    }
}
