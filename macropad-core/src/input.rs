//! Button input loop and debouncing.
//!
//! The firmware reports a dozen or more raw events per physical press,
//! some less than 10 ms apart, and echoes every write we make. The reader
//! turns that into one event per press.

use crate::error::PanelError;
use crate::frame::{Frame, decode_button};
use crate::shutdown::ShutdownListener;
use crate::transport::Transport;
use crossbeam_channel::Sender;
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default minimum spacing between accepted events for one key.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

/// Default bound on each read wait, which is also how quickly shutdown is seen.
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-key debounce window.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_accepted: HashMap<u8, Instant>,
}

impl Debouncer {
    /// A debouncer with nothing accepted yet.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: HashMap::new(),
        }
    }

    /// The configured window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether an event for `key` at `now` should be forwarded.
    ///
    /// Rejected events do not extend the window.
    pub fn accept(&mut self, key: u8, now: Instant) -> bool {
        if let Some(&last) = self.last_accepted.get(&key)
            && now.saturating_duration_since(last) < self.window
        {
            return false;
        }
        self.last_accepted.insert(key, now);
        true
    }
}

/// An accepted press and the instant its report arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    /// Key id as reported by the device.
    pub key: u8,
    /// When the report was read off the link.
    pub at: Instant,
}

/// Hand-off point between the reader and whoever applies ticks.
///
/// The reader holds the fence from the moment it stamps a press until the
/// press is in the channel. Once [`wait`](Self::wait) returns, every press
/// stamped before the call is receivable.
#[derive(Debug, Clone, Default)]
pub struct InputFence(Arc<Mutex<()>>);

impl InputFence {
    /// Block until no stamped press is in transit.
    pub fn wait(&self) {
        drop(self.0.lock());
    }

    pub(crate) fn hold(&self) -> MutexGuard<'_, ()> {
        self.0.lock()
    }
}

/// Reads reports from the transport and forwards accepted presses.
pub struct InputReader {
    transport: Arc<Transport>,
    debouncer: Debouncer,
    poll: Duration,
    events: Sender<KeyPress>,
    fence: InputFence,
}

impl InputReader {
    /// A reader forwarding into `events`.
    pub fn new(
        transport: Arc<Transport>,
        debounce: Duration,
        poll: Duration,
        events: Sender<KeyPress>,
    ) -> Self {
        Self {
            transport,
            debouncer: Debouncer::new(debounce),
            poll,
            events,
            fence: InputFence::default(),
        }
    }

    /// The fence this reader holds while a press is in transit.
    pub fn fence(&self) -> InputFence {
        self.fence.clone()
    }

    /// Decode, filter and debounce one inbound report that arrived at `now`.
    ///
    /// Echoes, releases, undecodable reports and bounces yield `None`.
    pub fn process(&mut self, frame: &Frame, now: Instant) -> Option<KeyPress> {
        let event = match decode_button(frame.as_bytes()) {
            Ok(Some(event)) => event,
            Ok(None) => {
                trace!("Echo discarded");
                return None;
            }
            Err(e) => {
                warn!("Dropping inbound report: {}", e);
                return None;
            }
        };
        if !event.is_pressed() {
            trace!("Key {} released", event.key);
            return None;
        }
        if !self.debouncer.accept(event.key, now) {
            trace!("Key {} bounce suppressed", event.key);
            return None;
        }
        debug!("Key {} pressed", event.key);
        Some(KeyPress {
            key: event.key,
            at: now,
        })
    }

    /// Run the loop on a named thread.
    pub fn spawn(self, shutdown: ShutdownListener) -> Result<JoinHandle<()>, PanelError> {
        let handle = thread::Builder::new()
            .name("panel-input".into())
            .spawn(move || self.run(shutdown))?;
        Ok(handle)
    }

    /// Read until shutdown, a fatal link error, or the receiver going away.
    pub fn run(mut self, shutdown: ShutdownListener) {
        info!("Input reader started");
        while !shutdown.is_triggered() {
            match self.transport.read_frame(self.poll) {
                Ok(Some(frame)) => {
                    let fence = self.fence.clone();
                    let _in_transit = fence.hold();
                    let Some(press) = self.process(&frame, Instant::now()) else {
                        continue;
                    };
                    if self.events.send(press).is_err() {
                        info!("Event receiver dropped, input reader stopping");
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    error!("Input reader stopped: {}", e);
                    return;
                }
                Err(e) => {
                    warn!("Read failed: {}", e);
                    if shutdown.wait(self.poll) {
                        break;
                    }
                }
            }
        }
        info!("Input reader stopped");
    }
}
