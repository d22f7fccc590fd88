//! Shared data model for the capture → encode → stream → inject pipeline.
//!
//! [`RawFrame`] and [`EncodedUnit`] are the internal hand-off types
//! between pipeline stages; the wire representations live in
//! [`crate::transport::codec`].

use std::fmt;
use std::time::Instant;

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::LinkError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8 = 0,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8 = 1,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8 = 2,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

impl TryFrom<u8> for PixelFormat {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Bgra8),
            1 => Ok(Self::Rgba8),
            2 => Ok(Self::Rgb8),
            other => Err(LinkError::UnknownVariant {
                type_name: "PixelFormat",
                value: other as u64,
            }),
        }
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// An uncompressed captured display image.
///
/// The `data` buffer holds `height` rows of `stride` bytes each; `stride`
/// may exceed `width * bpp` when the capture layer pads rows. Frames move
/// by value into the encoder and are dropped as soon as encoding returns.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes.
    pub stride: u32,
    pub format: PixelFormat,
    pub data: Bytes,
    /// Monotonic capture timestamp.
    pub captured_at: Instant,
    /// Capture-order sequence number, assigned by the surface on submit.
    pub sequence: u64,
}

impl RawFrame {
    /// Build a tightly packed frame (`stride == width * bpp`) captured now.
    pub fn packed(width: u32, height: u32, format: PixelFormat, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            stride: width * format.bytes_per_pixel() as u32,
            format,
            data: data.into(),
            captured_at: Instant::now(),
            sequence: 0,
        }
    }

    /// Override the capture timestamp.
    pub fn with_timestamp(mut self, captured_at: Instant) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Total byte size the raw bitmap occupies.
    pub fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// Returns a row slice (including possible padding bytes).
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        &self.data[start..start + self.stride as usize]
    }

    /// Check that the buffer is large enough for the declared geometry.
    pub fn validate(&self) -> Result<(), LinkError> {
        let min_stride = self.width as usize * self.format.bytes_per_pixel();
        if (self.stride as usize) < min_stride {
            return Err(LinkError::InvalidParameters(format!(
                "stride {} shorter than row ({min_stride} bytes)",
                self.stride
            )));
        }
        if self.data.len() < self.byte_len() {
            return Err(LinkError::MalformedMessage {
                expected: self.byte_len(),
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

// ── EncodedUnit ──────────────────────────────────────────────────

bitflags! {
    /// Per-unit flags carried in the video message header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UnitFlags: u8 {
        /// Self-contained unit; decodable without prior references.
        const KEY_FRAME = 0b0000_0001;
    }
}

/// One compressed access unit of video output.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedUnit {
    /// Strictly increasing and gap-free from 0 within a session.
    pub sequence: u64,
    /// Presentation timestamp in microseconds since session start.
    pub pts_us: u64,
    pub flags: UnitFlags,
    pub payload: Bytes,
}

impl EncodedUnit {
    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(UnitFlags::KEY_FRAME)
    }
}

impl fmt::Debug for EncodedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedUnit")
            .field("sequence", &self.sequence)
            .field("pts_us", &self.pts_us)
            .field("key", &self.is_key_frame())
            .field("len", &self.payload.len())
            .finish()
    }
}

// ── CodecId ──────────────────────────────────────────────────────

/// Codec identifier sent in the connection handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum CodecId {
    /// H.264/AVC from a platform hardware encoder.
    Avc = 1,
    /// Built-in zstd-compressed tile codec.
    ZstdTiles = 2,
}

impl TryFrom<u32> for CodecId {
    type Error = LinkError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Avc),
            2 => Ok(Self::ZstdTiles),
            other => Err(LinkError::UnknownVariant {
                type_name: "CodecId",
                value: other as u64,
            }),
        }
    }
}

// ── InputEvent ───────────────────────────────────────────────────

/// Remote-originated input action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum InputKind {
    PointerDown = 0,
    PointerMove = 1,
    PointerUp = 2,
    KeyDown = 3,
    KeyUp = 4,
}

impl InputKind {
    pub const fn is_pointer(self) -> bool {
        matches!(
            self,
            InputKind::PointerDown | InputKind::PointerMove | InputKind::PointerUp
        )
    }
}

impl TryFrom<u8> for InputKind {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::PointerDown),
            1 => Ok(Self::PointerMove),
            2 => Ok(Self::PointerUp),
            3 => Ok(Self::KeyDown),
            4 => Ok(Self::KeyUp),
            other => Err(LinkError::UnknownVariant {
                type_name: "InputKind",
                value: other as u64,
            }),
        }
    }
}

/// A pointer or key action to be injected locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: InputKind,
    pub x: i32,
    pub y: i32,
    pub key_code: i32,
    /// Pointer index for pointer kinds, repeat count for key kinds.
    pub action_code: i32,
    pub arrived_at: Instant,
}

impl InputEvent {
    pub fn new(kind: InputKind, x: i32, y: i32, key_code: i32, action_code: i32) -> Self {
        Self {
            kind,
            x,
            y,
            key_code,
            action_code,
            arrived_at: Instant::now(),
        }
    }

    pub fn pointer(kind: InputKind, x: i32, y: i32) -> Self {
        Self::new(kind, x, y, 0, 0)
    }

    pub fn key(kind: InputKind, key_code: i32) -> Self {
        Self::new(kind, 0, 0, key_code, 0)
    }
}

// ── CaptureToken ─────────────────────────────────────────────────

/// Opaque capture authorization obtained by the host application.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CaptureToken(Bytes);

impl CaptureToken {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self(raw.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for CaptureToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CaptureToken(<{} bytes>)", self.0.len())
    }
}

// ── SessionParams ────────────────────────────────────────────────

/// Geometry and bitrate requested by `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    pub width: u32,
    pub height: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
}

impl SessionParams {
    pub fn new(width: u32, height: u32, bitrate: u32) -> Self {
        Self {
            width,
            height,
            bitrate,
        }
    }

    /// Reject zero or oversized dimensions and a zero bitrate.
    pub fn validate(&self, max_width: u32, max_height: u32) -> Result<(), LinkError> {
        if self.width == 0 || self.width > max_width {
            return Err(LinkError::InvalidParameters(format!(
                "width {} outside 1..={max_width}",
                self.width
            )));
        }
        if self.height == 0 || self.height > max_height {
            return Err(LinkError::InvalidParameters(format!(
                "height {} outside 1..={max_height}",
                self.height
            )));
        }
        if self.bitrate == 0 {
            return Err(LinkError::InvalidParameters("bitrate must be > 0".into()));
        }
        Ok(())
    }

    /// Target throughput in bytes/second.
    pub fn bytes_per_second(&self) -> u64 {
        self.bitrate as u64 / 8
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_validation() {
        assert!(SessionParams::new(1280, 720, 5_000_000).validate(8192, 8192).is_ok());
        assert!(SessionParams::new(0, 720, 1).validate(8192, 8192).is_err());
        assert!(SessionParams::new(1280, 0, 1).validate(8192, 8192).is_err());
        assert!(SessionParams::new(9000, 720, 1).validate(8192, 8192).is_err());
        assert!(SessionParams::new(1280, 720, 0).validate(8192, 8192).is_err());
    }

    #[test]
    fn input_kind_roundtrip() {
        for raw in 0u8..=4 {
            let kind = InputKind::try_from(raw).unwrap();
            assert_eq!(kind as u8, raw);
        }
        assert!(InputKind::try_from(5).is_err());
        assert!(InputKind::PointerMove.is_pointer());
        assert!(!InputKind::KeyUp.is_pointer());
    }

    #[test]
    fn codec_id_values() {
        assert_eq!(CodecId::try_from(2).unwrap(), CodecId::ZstdTiles);
        assert!(matches!(
            CodecId::try_from(7),
            Err(LinkError::UnknownVariant { value: 7, .. })
        ));
    }

    #[test]
    fn frame_validation_catches_short_buffer() {
        let frame = RawFrame::packed(4, 4, PixelFormat::Bgra8, vec![0u8; 63]);
        assert!(frame.validate().is_err());
        let frame = RawFrame::packed(4, 4, PixelFormat::Bgra8, vec![0u8; 64]);
        assert!(frame.validate().is_ok());
        assert_eq!(frame.row(1).len(), 16);
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = CaptureToken::new(&b"secret-grant"[..]);
        let dbg = format!("{token:?}");
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("12 bytes"));
    }

    #[test]
    fn key_frame_flag() {
        let unit = EncodedUnit {
            sequence: 0,
            pts_us: 0,
            flags: UnitFlags::KEY_FRAME,
            payload: Bytes::new(),
        };
        assert!(unit.is_key_frame());
    }
}
