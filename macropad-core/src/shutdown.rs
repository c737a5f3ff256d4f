//! Stop signal shared by the background loops.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use log::info;
use parking_lot::Mutex;
use std::time::Duration;

/// Owner side of the stop signal.
///
/// Triggering drops the only sender, which wakes every listener at once.
pub struct Shutdown {
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl Shutdown {
    /// A signal that has not fired.
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    /// A handle for a loop to observe the signal.
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.receiver.clone(),
        }
    }

    /// Fire the signal. Later calls do nothing.
    pub fn trigger(&self) {
        if self.sender.lock().take().is_some() {
            info!("Shutdown requested");
        }
    }

    /// Whether [`trigger`](Self::trigger) was called.
    pub fn is_triggered(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener side of the stop signal.
#[derive(Clone)]
pub struct ShutdownListener {
    receiver: Receiver<()>,
}

impl ShutdownListener {
    /// Sleep up to `timeout`, returning early with `true` if the signal fires.
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(
            self.receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        )
    }

    /// Whether the signal has fired.
    pub fn is_triggered(&self) -> bool {
        matches!(self.receiver.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// The underlying channel, for use in `select!`. It never yields a
    /// message; it disconnects when the signal fires.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_times_out() {
        let shutdown = Shutdown::new();
        let listener = shutdown.listener();
        assert!(!listener.wait(Duration::from_millis(10)));
        assert!(!listener.is_triggered());
    }

    #[test]
    fn test_trigger_wakes_waiters() {
        let shutdown = Shutdown::new();
        let listener = shutdown.listener();
        let waiter = thread::spawn(move || {
            let start = Instant::now();
            let fired = listener.wait(Duration::from_secs(10));
            (fired, start.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        shutdown.trigger();

        let (fired, elapsed) = waiter.join().unwrap();
        assert!(fired);
        assert!(elapsed < Duration::from_secs(5));
        assert!(shutdown.is_triggered());
        assert!(shutdown.listener().is_triggered());
    }
}
