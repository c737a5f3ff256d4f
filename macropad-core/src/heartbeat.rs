//! Liveness loop.
//!
//! The firmware falls back to its demo animation after roughly 30-60 s
//! without a `CONNECT` frame. The loop stays well inside that window.

use crate::error::PanelError;
use crate::frame::Command;
use crate::shutdown::ShutdownListener;
use crate::transport::Transport;
use log::{error, info, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default spacing between liveness frames.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Counters kept by the heartbeat loop.
#[derive(Debug, Default)]
pub struct HeartbeatStats {
    sent: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
}

impl HeartbeatStats {
    /// Liveness frames delivered.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Liveness frames that failed.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Failures since the last delivered frame.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// Periodic `CONNECT` sender.
pub struct Heartbeat {
    transport: Arc<Transport>,
    interval: Duration,
    stats: Arc<HeartbeatStats>,
}

impl Heartbeat {
    /// A heartbeat over `transport` firing every `interval`.
    pub fn new(transport: Arc<Transport>, interval: Duration) -> Self {
        Self {
            transport,
            interval,
            stats: Arc::new(HeartbeatStats::default()),
        }
    }

    /// Shared handle to the counters.
    pub fn stats(&self) -> Arc<HeartbeatStats> {
        self.stats.clone()
    }

    /// Send one liveness frame and update the counters.
    pub fn beat(&self) -> Result<(), PanelError> {
        match self.transport.send_command(&Command::Connect) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                self.stats.consecutive_failures.store(0, Ordering::Relaxed);
                trace!("Heartbeat sent");
                Ok(())
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .consecutive_failures
                    .fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Run the loop on a named thread.
    pub fn spawn(self, shutdown: ShutdownListener) -> Result<JoinHandle<()>, PanelError> {
        let handle = thread::Builder::new()
            .name("panel-heartbeat".into())
            .spawn(move || self.run(shutdown))?;
        Ok(handle)
    }

    /// Beat every interval until shutdown or a fatal link error.
    ///
    /// Transient failures are logged and the next beat is tried on schedule.
    pub fn run(&self, shutdown: ShutdownListener) {
        info!("Heartbeat started (every {:?})", self.interval);
        while !shutdown.wait(self.interval) {
            if let Err(e) = self.beat() {
                if e.is_fatal() {
                    error!("Heartbeat stopped: {}", e);
                    return;
                }
                warn!(
                    "Heartbeat missed ({} in a row): {}",
                    self.stats.consecutive_failures(),
                    e
                );
            }
        }
        info!("Heartbeat stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockLink;
    use crate::shutdown::Shutdown;
    use std::time::Instant;

    fn heartbeat(interval: Duration) -> (Arc<MockLink>, Heartbeat) {
        let link = Arc::new(MockLink::new());
        let transport = Arc::new(Transport::new(link.clone()));
        (link, Heartbeat::new(transport, interval))
    }

    #[test]
    fn test_beat_counts() {
        let (link, heartbeat) = heartbeat(HEARTBEAT_INTERVAL);
        heartbeat.beat().unwrap();
        link.fail_next_writes(1);
        assert!(heartbeat.beat().is_err());

        let stats = heartbeat.stats();
        assert_eq!(stats.sent(), 1);
        assert_eq!(stats.failures(), 1);
        assert_eq!(stats.consecutive_failures(), 1);
        assert_eq!(link.written_commands(), vec![Command::Connect]);
    }

    #[test]
    fn test_survives_transient_failures() {
        let (link, heartbeat) = heartbeat(Duration::from_millis(10));
        let stats = heartbeat.stats();
        let shutdown = Shutdown::new();
        link.fail_next_writes(3);

        let handle = heartbeat.spawn(shutdown.listener()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while stats.sent() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        shutdown.trigger();
        handle.join().unwrap();

        assert!(stats.sent() >= 2);
        assert_eq!(stats.failures(), 3);
        assert_eq!(stats.consecutive_failures(), 0);
    }

    #[test]
    fn test_stops_on_fatal_error() {
        let (link, heartbeat) = heartbeat(Duration::from_millis(5));
        let stats = heartbeat.stats();
        let shutdown = Shutdown::new();
        link.close();

        // Returns without the shutdown signal.
        let handle = heartbeat.spawn(shutdown.listener()).unwrap();
        handle.join().unwrap();
        assert_eq!(stats.failures(), 1);
        assert!(!shutdown.is_triggered());
    }
}
