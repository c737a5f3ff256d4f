//! CRT frame codec.
//!
//! Every exchange with the panel is a fixed 1025-byte frame: a report id
//! byte followed by 1024 payload bytes, zero padded.
//!
//! Single-packet commands are `CRT\0\0` + an ASCII mnemonic + arguments.
//! Image transfers are a header command naming the size and target, raw
//! chunk frames (report id only, no prefix), then a `STP` commit.
//!
//! Inbound button reports carry the key id at byte 9 and the key state at
//! byte 10. Key id `0xFF` is the device acknowledging one of our writes.
//! These offsets come from traffic captures and are a hardware contract.

use crate::error::PanelError;
use std::fmt;
use std::iter;

/// Payload bytes per frame.
pub const PACKET_SIZE: usize = 1024;

/// Bytes per frame on the wire (report id + payload).
pub const FRAME_SIZE: usize = PACKET_SIZE + 1;

/// Report id byte that leads every outbound frame.
pub const REPORT_ID: u8 = 0x00;

/// Marker that precedes every single-packet command.
pub const CRT_PREFIX: [u8; 5] = [0x43, 0x52, 0x54, 0x00, 0x00];

/// Number of LEDs on the ring.
pub const LED_COUNT: usize = 24;

/// Highest brightness level accepted by `LIG` and `LBLIG`.
pub const MAX_LEVEL: u8 = 100;

/// Layer id of the full-screen image.
pub const SCREEN_LAYER: u8 = 0x01;

/// Offset of the key id in an inbound report.
pub const KEY_OFFSET: usize = 9;

/// Offset of the key state in an inbound report.
pub const STATE_OFFSET: usize = 10;

/// Key id the device uses to acknowledge a write.
pub const ECHO_KEY: u8 = 0xFF;

const STATE_PRESSED: u8 = 0x01;
const STATE_RELEASED: u8 = 0x02;

mod mnemonic {
    pub const CONNECT: &[u8] = b"CONNECT";
    pub const WAKE: &[u8] = b"DIS";
    pub const BRIGHTNESS: &[u8] = b"LIG";
    pub const LED_BRIGHTNESS: &[u8] = b"LBLIG";
    pub const LED_COLORS: &[u8] = b"SETLB";
    pub const LED_RESET: &[u8] = b"DELED";
    pub const SCREEN_IMAGE: &[u8] = b"LOG";
    pub const KEY_IMAGE: &[u8] = b"BAT";
    pub const COMMIT: &[u8] = b"STP";
}

// =============================================================================
// Frame
// =============================================================================

/// One fixed-size unit exchanged with the device.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Box<[u8; FRAME_SIZE]>);

impl Frame {
    /// An all-zero frame.
    pub fn zeroed() -> Self {
        Self(Box::new([0u8; FRAME_SIZE]))
    }

    /// Report id followed by `parts` back to back. Callers keep the total
    /// within `PACKET_SIZE`.
    fn from_parts(parts: &[&[u8]]) -> Self {
        let mut frame = Self::zeroed();
        frame.0[0] = REPORT_ID;
        let mut pos = 1;
        for part in parts {
            frame.0[pos..pos + part.len()].copy_from_slice(part);
            pos += part.len();
        }
        frame
    }

    /// Wrap an exact frame-sized buffer.
    ///
    /// # Errors
    /// Returns [`PanelError::MalformedFrame`] unless `bytes` is exactly
    /// [`FRAME_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PanelError> {
        let array: [u8; FRAME_SIZE] =
            bytes.try_into().map_err(|_| PanelError::MalformedFrame {
                len: bytes.len(),
                expected: FRAME_SIZE,
            })?;
        Ok(Self(Box::new(array)))
    }

    /// Wrap a report as read from the link, zero padding a short read.
    ///
    /// # Errors
    /// Returns [`PanelError::MalformedFrame`] if the report is longer than a frame.
    pub fn from_report(report: &[u8]) -> Result<Self, PanelError> {
        if report.len() > FRAME_SIZE {
            return Err(PanelError::MalformedFrame {
                len: report.len(),
                expected: FRAME_SIZE,
            });
        }
        let mut frame = Self::zeroed();
        frame.0[..report.len()].copy_from_slice(report);
        Ok(frame)
    }

    /// The whole frame, report id included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    /// First byte of the frame.
    pub fn report_id(&self) -> u8 {
        self.0[0]
    }

    /// Everything after the report id.
    pub fn payload(&self) -> &[u8] {
        &self.0[1..]
    }

    /// Whether the payload starts with the CRT marker.
    pub fn is_command(&self) -> bool {
        self.payload().starts_with(&CRT_PREFIX)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:02X?} ..)", &self.0[..16])
    }
}

// =============================================================================
// Commands
// =============================================================================

/// A color for one LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rgb {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Rgb {
    /// All channels off.
    pub const OFF: Rgb = Rgb::new(0, 0, 0);

    /// Create a color from its channels.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// What an image transfer paints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTarget {
    /// A full-screen layer (`LOG`).
    Layer(u8),
    /// A single key (`BAT`).
    Key(u8),
}

impl ImageTarget {
    /// The full 480x272 background layer.
    pub const SCREEN: ImageTarget = ImageTarget::Layer(SCREEN_LAYER);
}

/// A semantic device command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Liveness signal that keeps the firmware out of demo mode.
    Connect,
    /// Turn the screen on.
    WakeScreen,
    /// Screen backlight level as sent on the wire (0-100).
    Brightness(u8),
    /// LED ring brightness (0-100).
    LedBrightness(u8),
    /// One color per LED, in ring order.
    LedColors([Rgb; LED_COUNT]),
    /// Hand the ring back to the firmware default animation.
    LedReset,
    /// First frame of an image transfer.
    ImageHeader {
        /// Layer or key being painted.
        target: ImageTarget,
        /// Size of the image data in bytes.
        size: u32,
    },
    /// Display the image transferred since the last header.
    Commit,
}

impl Command {
    /// Screen brightness command.
    ///
    /// # Errors
    /// Returns [`PanelError::InvalidLevel`] if `level` > 100.
    pub fn brightness(level: u8) -> Result<Self, PanelError> {
        check_level("brightness", level).map(Command::Brightness)
    }

    /// LED ring brightness command.
    ///
    /// # Errors
    /// Returns [`PanelError::InvalidLevel`] if `level` > 100.
    pub fn led_brightness(level: u8) -> Result<Self, PanelError> {
        check_level("LED brightness", level).map(Command::LedBrightness)
    }

    /// Paint every LED the same color.
    pub fn led_uniform(color: Rgb) -> Self {
        Command::LedColors([color; LED_COUNT])
    }

    /// The wire mnemonic, for logging.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::WakeScreen => "DIS",
            Command::Brightness(_) => "LIG",
            Command::LedBrightness(_) => "LBLIG",
            Command::LedColors(_) => "SETLB",
            Command::LedReset => "DELED",
            Command::ImageHeader {
                target: ImageTarget::Layer(_),
                ..
            } => "LOG",
            Command::ImageHeader {
                target: ImageTarget::Key(_),
                ..
            } => "BAT",
            Command::Commit => "STP",
        }
    }
}

fn check_level(target: &'static str, value: u8) -> Result<u8, PanelError> {
    if value > MAX_LEVEL {
        return Err(PanelError::InvalidLevel {
            target,
            value,
            max: MAX_LEVEL,
        });
    }
    Ok(value)
}

/// Encode a command into its single frame.
pub fn encode_command(cmd: &Command) -> Frame {
    match *cmd {
        Command::Connect => Frame::from_parts(&[&CRT_PREFIX, mnemonic::CONNECT]),
        Command::WakeScreen => Frame::from_parts(&[&CRT_PREFIX, mnemonic::WAKE]),
        Command::Brightness(level) => {
            Frame::from_parts(&[&CRT_PREFIX, mnemonic::BRIGHTNESS, &[0, 0, level]])
        }
        Command::LedBrightness(level) => {
            Frame::from_parts(&[&CRT_PREFIX, mnemonic::LED_BRIGHTNESS, &[0, 0, level]])
        }
        Command::LedColors(colors) => {
            let mut rgb = [0u8; LED_COUNT * 3];
            for (slot, color) in rgb.chunks_exact_mut(3).zip(colors.iter()) {
                slot.copy_from_slice(&[color.r, color.g, color.b]);
            }
            Frame::from_parts(&[&CRT_PREFIX, mnemonic::LED_COLORS, &rgb])
        }
        Command::LedReset => Frame::from_parts(&[&CRT_PREFIX, mnemonic::LED_RESET]),
        Command::ImageHeader { target, size } => {
            let (name, id) = match target {
                ImageTarget::Layer(layer) => (mnemonic::SCREEN_IMAGE, layer),
                ImageTarget::Key(key) => (mnemonic::KEY_IMAGE, key),
            };
            Frame::from_parts(&[&CRT_PREFIX, name, &size.to_be_bytes(), &[id]])
        }
        Command::Commit => Frame::from_parts(&[&CRT_PREFIX, mnemonic::COMMIT]),
    }
}

/// Decode an outbound command frame back into its command.
///
/// # Errors
/// Returns [`PanelError::UnknownCommand`] if the frame is not a CRT command.
pub fn decode_command(frame: &Frame) -> Result<Command, PanelError> {
    if frame.report_id() != REPORT_ID {
        return Err(PanelError::UnknownCommand);
    }
    let body = frame
        .payload()
        .strip_prefix(&CRT_PREFIX[..])
        .ok_or(PanelError::UnknownCommand)?;

    if body.starts_with(mnemonic::CONNECT) {
        Ok(Command::Connect)
    } else if body.starts_with(mnemonic::WAKE) {
        Ok(Command::WakeScreen)
    } else if let Some(args) = body.strip_prefix(mnemonic::BRIGHTNESS) {
        Ok(Command::Brightness(args[2]))
    } else if let Some(args) = body.strip_prefix(mnemonic::LED_BRIGHTNESS) {
        Ok(Command::LedBrightness(args[2]))
    } else if let Some(args) = body.strip_prefix(mnemonic::LED_COLORS) {
        let mut colors = [Rgb::OFF; LED_COUNT];
        for (color, rgb) in colors.iter_mut().zip(args.chunks_exact(3)) {
            *color = Rgb::new(rgb[0], rgb[1], rgb[2]);
        }
        Ok(Command::LedColors(colors))
    } else if body.starts_with(mnemonic::LED_RESET) {
        Ok(Command::LedReset)
    } else if let Some(args) = body.strip_prefix(mnemonic::SCREEN_IMAGE) {
        let (size, id) = image_args(args);
        Ok(Command::ImageHeader {
            target: ImageTarget::Layer(id),
            size,
        })
    } else if let Some(args) = body.strip_prefix(mnemonic::KEY_IMAGE) {
        let (size, id) = image_args(args);
        Ok(Command::ImageHeader {
            target: ImageTarget::Key(id),
            size,
        })
    } else if body.starts_with(mnemonic::COMMIT) {
        Ok(Command::Commit)
    } else {
        Err(PanelError::UnknownCommand)
    }
}

fn image_args(args: &[u8]) -> (u32, u8) {
    (u32::from_be_bytes([args[0], args[1], args[2], args[3]]), args[4])
}

/// Wrap raw image data in a chunk frame (report id only, no CRT prefix).
///
/// # Errors
/// Returns [`PanelError::PayloadTooLarge`] if `data` exceeds [`PACKET_SIZE`].
pub fn encode_chunk(data: &[u8]) -> Result<Frame, PanelError> {
    if data.len() > PACKET_SIZE {
        return Err(PanelError::PayloadTooLarge {
            len: data.len(),
            max: PACKET_SIZE,
        });
    }
    Ok(Frame::from_parts(&[data]))
}

/// Apply the display's gamma curve to a 0-100 brightness.
///
/// Matches the vendor software: `round((level / 100) ^ 0.75 * 100)`.
pub fn gamma_corrected(level: u8) -> u8 {
    let clamped = f64::from(level.min(MAX_LEVEL));
    ((clamped / 100.0).powf(0.75) * 100.0).round() as u8
}

// =============================================================================
// Image transfers
// =============================================================================

/// Every frame of one image transfer, ready to go on the wire.
///
/// The header, the chunks and the commit must reach the device with nothing
/// in between; see [`Transport::send_image`](crate::Transport::send_image).
#[derive(Debug, Clone)]
pub struct ImageTransfer {
    target: ImageTarget,
    header: Frame,
    chunks: Vec<Frame>,
    commit: Frame,
}

impl ImageTransfer {
    /// Split `data` into the frames that paint `target`.
    ///
    /// # Errors
    /// - [`PanelError::EmptyImage`] if `data` is empty
    /// - [`PanelError::PayloadTooLarge`] if the size does not fit the 32-bit header field
    pub fn new(target: ImageTarget, data: &[u8]) -> Result<Self, PanelError> {
        if data.is_empty() {
            return Err(PanelError::EmptyImage);
        }
        let size = u32::try_from(data.len()).map_err(|_| PanelError::PayloadTooLarge {
            len: data.len(),
            max: u32::MAX as usize,
        })?;

        let chunks = data
            .chunks(PACKET_SIZE)
            .map(encode_chunk)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            target,
            header: encode_command(&Command::ImageHeader { target, size }),
            chunks,
            commit: encode_command(&Command::Commit),
        })
    }

    /// A full-screen image on the background layer.
    pub fn screen(data: &[u8]) -> Result<Self, PanelError> {
        Self::new(ImageTarget::SCREEN, data)
    }

    /// An image for a single key.
    pub fn key(key: u8, data: &[u8]) -> Result<Self, PanelError> {
        Self::new(ImageTarget::Key(key), data)
    }

    /// What this transfer paints.
    pub fn target(&self) -> ImageTarget {
        self.target
    }

    /// The data chunks, in order.
    pub fn chunks(&self) -> &[Frame] {
        &self.chunks
    }

    /// Header, chunks and commit in wire order.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        iter::once(&self.header)
            .chain(self.chunks.iter())
            .chain(iter::once(&self.commit))
    }

    /// Total number of frames, header and commit included.
    pub fn frame_count(&self) -> usize {
        self.chunks.len() + 2
    }
}

// =============================================================================
// Button events
// =============================================================================

/// Whether a key went down or up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyState {
    /// The key was pressed.
    Pressed,
    /// The key was released.
    Released,
}

impl KeyState {
    fn from_byte(byte: u8) -> Self {
        if byte == STATE_PRESSED {
            KeyState::Pressed
        } else {
            KeyState::Released
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            KeyState::Pressed => STATE_PRESSED,
            KeyState::Released => STATE_RELEASED,
        }
    }
}

/// A key event reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    /// Device key id.
    pub key: u8,
    /// Pressed or released.
    pub state: KeyState,
}

impl ButtonEvent {
    /// A press of `key`.
    pub fn pressed(key: u8) -> Self {
        Self {
            key,
            state: KeyState::Pressed,
        }
    }

    /// A release of `key`.
    pub fn released(key: u8) -> Self {
        Self {
            key,
            state: KeyState::Released,
        }
    }

    /// Whether this is a press.
    pub fn is_pressed(&self) -> bool {
        self.state == KeyState::Pressed
    }
}

/// Decode an inbound report into a button event.
///
/// Returns `Ok(None)` for write echoes.
///
/// # Errors
/// Returns [`PanelError::MalformedFrame`] unless `bytes` is exactly one frame.
pub fn decode_button(bytes: &[u8]) -> Result<Option<ButtonEvent>, PanelError> {
    if bytes.len() != FRAME_SIZE {
        return Err(PanelError::MalformedFrame {
            len: bytes.len(),
            expected: FRAME_SIZE,
        });
    }
    let key = bytes[KEY_OFFSET];
    if key == ECHO_KEY {
        return Ok(None);
    }
    Ok(Some(ButtonEvent {
        key,
        state: KeyState::from_byte(bytes[STATE_OFFSET]),
    }))
}

/// Build the inbound report the device sends for `event`.
pub fn encode_button(event: ButtonEvent) -> Frame {
    let mut frame = Frame::zeroed();
    frame.0[KEY_OFFSET] = event.key;
    frame.0[STATE_OFFSET] = event.state.to_byte();
    frame
}
