//! Byte links to the device.

use crate::error::PanelError;
use crate::frame::Frame;
use std::time::Duration;

/// USB vendor id of the Stream Dock M18.
pub const DEFAULT_VENDOR_ID: u16 = 0x5548;

/// USB product id of the Stream Dock M18.
pub const DEFAULT_PRODUCT_ID: u16 = 0x1000;

/// A bidirectional frame link to the panel.
///
/// Implementations must tolerate one writer and one reader running on
/// different threads at the same time. Writes are serialized above this
/// layer by [`Transport`](crate::Transport).
pub trait Link: Send + Sync {
    /// Write one whole frame.
    fn write_frame(&self, frame: &Frame) -> Result<(), PanelError>;

    /// Wait up to `timeout` for one inbound report.
    ///
    /// Returns `Ok(None)` if nothing arrived in time.
    fn read_frame(&self, timeout: Duration) -> Result<Option<Frame>, PanelError>;
}

#[cfg(target_os = "linux")]
pub use hidraw::{HidrawLink, find_hidraw};

#[cfg(target_os = "linux")]
mod hidraw {
    use super::Link;
    use crate::error::PanelError;
    use crate::frame::{FRAME_SIZE, Frame};
    use log::{debug, info, warn};
    use std::fs::{File, OpenOptions};
    use std::io::{self, Read, Write};
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    const SYSFS_HIDRAW: &str = "/sys/class/hidraw";
    const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

    /// Find the hidraw node of the control interface for a device.
    ///
    /// The panel exposes two interfaces; interface 0 carries CRT commands and
    /// button reports. Falls back to the first match if no `input0` node is
    /// found.
    pub fn find_hidraw(vendor_id: u16, product_id: u16) -> Option<PathBuf> {
        let target = format!("0003:{:08X}:{:08X}", vendor_id, product_id);

        let entries = match std::fs::read_dir(SYSFS_HIDRAW) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot read {}: {}", SYSFS_HIDRAW, e);
                return None;
            }
        };

        let mut candidates: Vec<(PathBuf, bool)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(uevent) = std::fs::read_to_string(path.join("device/uevent")) else {
                continue;
            };
            if !uevent.to_uppercase().contains(&target) {
                continue;
            }
            if let Some(name) = path.file_name() {
                candidates.push((Path::new("/dev").join(name), uevent.contains("input0")));
            }
        }
        candidates.sort();

        let found = candidates
            .iter()
            .find(|(_, is_control)| *is_control)
            .or_else(|| candidates.first())
            .map(|(path, _)| path.clone());
        if let Some(path) = &found {
            debug!("Found {} at {}", target, path.display());
        }
        found
    }

    /// A link over a Linux hidraw node.
    pub struct HidrawLink {
        file: File,
        path: PathBuf,
    }

    impl HidrawLink {
        /// Locate and open the panel by USB ids.
        ///
        /// # Errors
        /// Returns [`PanelError::LinkUnavailable`] if no matching node exists
        /// or it cannot be opened.
        pub fn open(vendor_id: u16, product_id: u16) -> Result<Self, PanelError> {
            let path = find_hidraw(vendor_id, product_id).ok_or_else(|| {
                PanelError::LinkUnavailable(format!(
                    "no hidraw device for {:04x}:{:04x}",
                    vendor_id, product_id
                ))
            })?;
            Self::open_path(&path)
        }

        /// Open a specific hidraw node.
        pub fn open_path(path: &Path) -> Result<Self, PanelError> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(path)
                .map_err(|e| match e.kind() {
                    io::ErrorKind::PermissionDenied => {
                        warn!("Permission denied opening {}. Check udev rules.", path.display());
                        PanelError::LinkUnavailable(format!(
                            "permission denied opening {} (add a udev rule for the device)",
                            path.display()
                        ))
                    }
                    io::ErrorKind::NotFound => {
                        PanelError::LinkUnavailable(format!("{} not found", path.display()))
                    }
                    _ => PanelError::IoFailure(e),
                })?;

            info!("Opened {}", path.display());
            Ok(Self {
                file,
                path: path.to_path_buf(),
            })
        }

        /// The hidraw node this link is bound to.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Wait until the node is ready for `events`. `Ok(false)` on timeout.
        fn wait(&self, events: libc::c_short, timeout: Duration) -> Result<bool, PanelError> {
            let mut pfd = libc::pollfd {
                fd: self.file.as_raw_fd(),
                events,
                revents: 0,
            };
            let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

            // SAFETY: pfd is a single valid pollfd that outlives the call.
            let ret = unsafe { libc::poll(&mut pfd, 1, millis) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(false);
                }
                return Err(err.into());
            }
            if ret == 0 {
                return Ok(false);
            }
            if pfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
                return Err(PanelError::LinkClosed);
            }
            Ok(pfd.revents & events != 0)
        }
    }

    impl Link for HidrawLink {
        fn write_frame(&self, frame: &Frame) -> Result<(), PanelError> {
            let bytes = frame.as_bytes();
            loop {
                // One write call is one report on hidraw.
                match (&self.file).write(bytes) {
                    Ok(n) if n == bytes.len() => return Ok(()),
                    Ok(n) => {
                        return Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            format!("short write: {} of {} bytes", n, bytes.len()),
                        )
                        .into());
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        if !self.wait(libc::POLLOUT, WRITE_TIMEOUT)? {
                            return Err(io::Error::from(io::ErrorKind::TimedOut).into());
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        fn read_frame(&self, timeout: Duration) -> Result<Option<Frame>, PanelError> {
            if !self.wait(libc::POLLIN, timeout)? {
                return Ok(None);
            }
            let mut buf = [0u8; FRAME_SIZE];
            match (&self.file).read(&mut buf) {
                Ok(0) => Err(PanelError::LinkClosed),
                Ok(n) => Frame::from_report(&buf[..n]).map(Some),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    Ok(None)
                }
                Err(e) => Err(e.into()),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_open_missing_node() {
            let result = HidrawLink::open_path(Path::new("/dev/hidraw-does-not-exist"));
            assert!(matches!(result, Err(PanelError::LinkUnavailable(_))));
        }

        #[test]
        fn test_find_unknown_device() {
            assert_eq!(find_hidraw(0xDEAD, 0xBEEF), None);
        }
    }
}
