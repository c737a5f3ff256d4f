//! In-memory link for testing.

use crate::error::PanelError;
use crate::frame::{ButtonEvent, Command, ECHO_KEY, Frame, decode_command, encode_button};
use crate::link::Link;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// A mock link that records writes and replays queued reports.
///
/// This allows driving a whole [`Panel`](crate::Panel) without hardware.
///
/// # Example
///
/// ```
/// use macropad_core::{Command, MockLink, Transport};
/// use std::sync::Arc;
///
/// let link = Arc::new(MockLink::new());
/// let transport = Transport::new(link.clone());
/// transport.send_command(&Command::Connect).unwrap();
/// assert_eq!(link.written_commands(), vec![Command::Connect]);
/// ```
pub struct MockLink {
    written: Mutex<Vec<Frame>>,
    inbound: Mutex<VecDeque<Frame>>,
    inbound_ready: Condvar,
    write_delay: Mutex<Duration>,
    failing_writes: AtomicUsize,
    closed: AtomicBool,
}

impl MockLink {
    /// Create an open link with nothing queued.
    pub fn new() -> Self {
        Self {
            written: Mutex::new(Vec::new()),
            inbound: Mutex::new(VecDeque::new()),
            inbound_ready: Condvar::new(),
            write_delay: Mutex::new(Duration::ZERO),
            failing_writes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a raw inbound report.
    pub fn push_inbound(&self, frame: Frame) {
        self.inbound.lock().push_back(frame);
        self.inbound_ready.notify_all();
    }

    /// Queue a button report as the device would send it.
    pub fn push_button(&self, event: ButtonEvent) {
        self.push_inbound(encode_button(event));
    }

    /// Queue a write acknowledgement.
    pub fn push_echo(&self) {
        self.push_button(ButtonEvent::pressed(ECHO_KEY));
    }

    /// Every frame written so far.
    pub fn written(&self) -> Vec<Frame> {
        self.written.lock().clone()
    }

    /// Drain the written frames.
    pub fn take_written(&self) -> Vec<Frame> {
        std::mem::take(&mut *self.written.lock())
    }

    /// Written frames that decode as commands, in order. Image chunks are skipped.
    pub fn written_commands(&self) -> Vec<Command> {
        self.written
            .lock()
            .iter()
            .filter_map(|frame| decode_command(frame).ok())
            .collect()
    }

    /// Number of frames written so far.
    pub fn write_count(&self) -> usize {
        self.written.lock().len()
    }

    /// Make every write take at least `delay`.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock() = delay;
    }

    /// Fail the next `count` writes with a transient I/O error.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Simulate the device going away. All later operations fail with
    /// [`PanelError::LinkClosed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _queue = self.inbound.lock();
        self.inbound_ready.notify_all();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Link for MockLink {
    fn write_frame(&self, frame: &Frame) -> Result<(), PanelError> {
        let delay = *self.write_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if self.is_closed() {
            return Err(PanelError::LinkClosed);
        }
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(io::Error::other("injected write failure").into());
        }
        self.written.lock().push(frame.clone());
        Ok(())
    }

    fn read_frame(&self, timeout: Duration) -> Result<Option<Frame>, PanelError> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inbound.lock();
        loop {
            if let Some(frame) = queue.pop_front() {
                return Ok(Some(frame));
            }
            if self.is_closed() {
                return Err(PanelError::LinkClosed);
            }
            if self
                .inbound_ready
                .wait_until(&mut queue, deadline)
                .timed_out()
            {
                return Ok(queue.pop_front());
            }
        }
    }
}
