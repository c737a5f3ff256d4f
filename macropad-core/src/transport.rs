//! Serialized frame transport.

use crate::error::PanelError;
use crate::frame::{Command, Frame, ImageTransfer, encode_command};
use crate::health::LinkHealth;
use crate::link::Link;
use log::{debug, trace};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Owns the link and the single write lock.
///
/// Every write goes through one exclusive lock, so frames from different
/// threads interleave only at whole-frame boundaries and an image transfer
/// is never split. Reads do not take the lock.
pub struct Transport {
    link: Arc<dyn Link>,
    write_lock: Mutex<()>,
    frames_written: AtomicU64,
    write_failures: AtomicU64,
    consecutive_write_failures: AtomicU64,
    read_failures: AtomicU64,
}

impl Transport {
    /// Wrap an open link.
    pub fn new(link: Arc<dyn Link>) -> Self {
        Self {
            link,
            write_lock: Mutex::new(()),
            frames_written: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            consecutive_write_failures: AtomicU64::new(0),
            read_failures: AtomicU64::new(0),
        }
    }

    /// Send one single-frame command.
    ///
    /// # Errors
    /// Surfaces the link's write error unchanged.
    pub fn send_command(&self, cmd: &Command) -> Result<(), PanelError> {
        let frame = encode_command(cmd);
        let _guard = self.write_lock.lock();
        trace!("-> {}", cmd.mnemonic());
        self.write(&frame)
    }

    /// Send `cmd` only if `still_current` holds once the write lock is held.
    ///
    /// Returns `Ok(false)` without writing if the check fails. No other
    /// writer can run between the check and the write.
    pub fn send_command_while(
        &self,
        cmd: &Command,
        still_current: impl Fn() -> bool,
    ) -> Result<bool, PanelError> {
        let frame = encode_command(cmd);
        let _guard = self.write_lock.lock();
        if !still_current() {
            return Ok(false);
        }
        trace!("-> {}", cmd.mnemonic());
        self.write(&frame)?;
        Ok(true)
    }

    /// Send a whole image transfer under one lock acquisition.
    ///
    /// A failed write releases the lock and returns the error; the partial
    /// transfer is never committed. Retrying means sending the whole
    /// transfer again.
    pub fn send_image(&self, transfer: &ImageTransfer) -> Result<(), PanelError> {
        let _guard = self.write_lock.lock();
        for frame in transfer.frames() {
            self.write(frame)?;
        }
        debug!(
            "Image sent to {:?} ({} frames)",
            transfer.target(),
            transfer.frame_count()
        );
        Ok(())
    }

    /// Paint the full screen.
    pub fn send_screen_image(&self, data: &[u8]) -> Result<(), PanelError> {
        self.send_image(&ImageTransfer::screen(data)?)
    }

    /// Paint a single key.
    pub fn send_key_image(&self, key: u8, data: &[u8]) -> Result<(), PanelError> {
        self.send_image(&ImageTransfer::key(key, data)?)
    }

    /// Wait up to `timeout` for one inbound report. Does not take the write lock.
    pub fn read_frame(&self, timeout: Duration) -> Result<Option<Frame>, PanelError> {
        self.link.read_frame(timeout).inspect_err(|_| {
            self.read_failures.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Snapshot of the link counters.
    pub fn health(&self) -> LinkHealth {
        LinkHealth {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            consecutive_write_failures: self.consecutive_write_failures.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
        }
    }

    /// Caller holds the write lock.
    fn write(&self, frame: &Frame) -> Result<(), PanelError> {
        match self.link.write_frame(frame) {
            Ok(()) => {
                self.frames_written.fetch_add(1, Ordering::Relaxed);
                self.consecutive_write_failures.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                self.consecutive_write_failures
                    .fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ImageTarget, PACKET_SIZE, decode_command};
    use crate::mock::MockLink;
    use std::thread;

    fn transport() -> (Arc<MockLink>, Arc<Transport>) {
        let link = Arc::new(MockLink::new());
        let transport = Arc::new(Transport::new(link.clone()));
        (link, transport)
    }

    #[test]
    fn test_send_command_in_order() {
        let (link, transport) = transport();
        transport.send_command(&Command::WakeScreen).unwrap();
        transport.send_command(&Command::Brightness(85)).unwrap();
        transport.send_command(&Command::Connect).unwrap();
        assert_eq!(
            link.written_commands(),
            vec![Command::WakeScreen, Command::Brightness(85), Command::Connect]
        );
    }

    #[test]
    fn test_send_key_image() {
        let (link, transport) = transport();
        transport.send_key_image(4, &[1, 2, 3]).unwrap();
        let written = link.written();
        assert_eq!(written.len(), 3);
        assert_eq!(
            decode_command(&written[0]).unwrap(),
            Command::ImageHeader {
                target: ImageTarget::Key(4),
                size: 3
            }
        );
        assert_eq!(decode_command(&written[2]).unwrap(), Command::Commit);
    }

    /// Accepts a fixed number of writes, then fails every write.
    struct FlakyLink {
        inner: MockLink,
        budget: AtomicU64,
    }

    impl Link for FlakyLink {
        fn write_frame(&self, frame: &Frame) -> Result<(), PanelError> {
            let allowed = self
                .budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !allowed {
                return Err(std::io::Error::other("unplugged mid transfer").into());
            }
            self.inner.write_frame(frame)
        }

        fn read_frame(&self, timeout: Duration) -> Result<Option<Frame>, PanelError> {
            self.inner.read_frame(timeout)
        }
    }

    #[test]
    fn test_image_failure_mid_transfer() {
        let link = Arc::new(FlakyLink {
            inner: MockLink::new(),
            budget: AtomicU64::new(2),
        });
        let transport = Transport::new(link.clone());
        let data = vec![7u8; PACKET_SIZE * 3];

        // Header and first chunk go out, the second chunk fails.
        assert!(transport.send_screen_image(&data).is_err());
        assert_eq!(link.inner.write_count(), 2);
        assert!(!link.inner.written_commands().contains(&Command::Commit));
        assert_eq!(transport.health().consecutive_write_failures, 1);

        // The lock was released: the next command goes through.
        link.budget.store(1, Ordering::SeqCst);
        transport.send_command(&Command::Connect).unwrap();
        assert_eq!(
            link.inner.written_commands().last(),
            Some(&Command::Connect)
        );
    }

    #[test]
    fn test_image_atomic_under_command_storm() {
        let (link, transport) = transport();
        let data = vec![0xAA; PACKET_SIZE * 8];
        let transfer = ImageTransfer::screen(&data).unwrap();

        let storm: Vec<_> = (0..4)
            .map(|_| {
                let transport = transport.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        transport.send_command(&Command::Connect).unwrap();
                    }
                })
            })
            .collect();
        for _ in 0..5 {
            transport.send_image(&transfer).unwrap();
        }
        for handle in storm {
            handle.join().unwrap();
        }

        let written = link.written();
        assert_eq!(written.len(), 200 + 5 * transfer.frame_count());

        let mut i = 0;
        let mut images = 0;
        while i < written.len() {
            if let Ok(Command::ImageHeader { .. }) = decode_command(&written[i]) {
                for (offset, chunk) in transfer.chunks().iter().enumerate() {
                    assert_eq!(&written[i + 1 + offset], chunk);
                }
                let commit = i + 1 + transfer.chunks().len();
                assert_eq!(decode_command(&written[commit]).unwrap(), Command::Commit);
                images += 1;
                i = commit + 1;
            } else {
                assert_eq!(decode_command(&written[i]).unwrap(), Command::Connect);
                i += 1;
            }
        }
        assert_eq!(images, 5);
    }

    #[test]
    fn test_send_command_while() {
        let (link, transport) = transport();
        assert!(!transport
            .send_command_while(&Command::LedReset, || false)
            .unwrap());
        assert!(transport
            .send_command_while(&Command::LedReset, || true)
            .unwrap());
        assert_eq!(link.written_commands(), vec![Command::LedReset]);
    }

    #[test]
    fn test_health_counters() {
        let (link, transport) = transport();
        transport.send_command(&Command::Connect).unwrap();
        link.fail_next_writes(2);
        assert!(transport.send_command(&Command::Connect).is_err());
        assert!(transport.send_command(&Command::Connect).is_err());

        let health = transport.health();
        assert_eq!(health.frames_written, 1);
        assert_eq!(health.write_failures, 2);
        assert_eq!(health.consecutive_write_failures, 2);

        transport.send_command(&Command::Connect).unwrap();
        assert_eq!(transport.health().consecutive_write_failures, 0);

        link.close();
        assert!(transport.read_frame(Duration::from_millis(1)).is_err());
        assert_eq!(transport.health().read_failures, 1);
    }
}
