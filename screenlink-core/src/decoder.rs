//! Viewer-side reconstruction of the built-in tile codec.
//!
//! Keeps a persistent, tightly packed frame buffer and patches it with
//! every unit received; see [`crate::encode::zstd_tiles`] for the layout.

use crate::encode::zstd_tiles::{KIND_FULL, KIND_TILES};
use crate::error::LinkError;
use crate::types::PixelFormat;

/// What one decoded unit changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeSummary {
    pub full_frame: bool,
    pub tiles: u32,
}

/// Persistent frame buffer for one stream.
pub struct TileDecoder {
    width: u32,
    height: u32,
    format: Option<PixelFormat>,
    buffer: Vec<u8>,
    has_key_frame: bool,
}

impl TileDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: None,
            buffer: Vec::new(),
            has_key_frame: false,
        }
    }

    /// Decompress `payload` and apply it to the frame buffer.
    ///
    /// Tile updates before the first full frame are rejected.
    pub fn decode(&mut self, payload: &[u8]) -> Result<DecodeSummary, LinkError> {
        let raw = zstd::decode_all(payload)
            .map_err(|e| LinkError::Other(format!("zstd decode failed: {e}")))?;
        if raw.len() < 2 {
            return Err(LinkError::MalformedMessage {
                expected: 2,
                actual: raw.len(),
            });
        }
        let format = PixelFormat::try_from(raw[0])?;
        let body = &raw[2..];

        match raw[1] {
            KIND_FULL => {
                self.apply_full(format, body)?;
                Ok(DecodeSummary {
                    full_frame: true,
                    tiles: 1,
                })
            }
            KIND_TILES => {
                if !self.has_key_frame || self.format != Some(format) {
                    return Err(LinkError::Other("tile update before key-frame".into()));
                }
                let tiles = self.apply_tiles(format.bytes_per_pixel(), body)?;
                Ok(DecodeSummary {
                    full_frame: false,
                    tiles,
                })
            }
            other => Err(LinkError::UnknownVariant {
                type_name: "TileKind",
                value: other as u64,
            }),
        }
    }

    /// Current packed frame (empty before the first key-frame).
    pub fn frame(&self) -> &[u8] {
        &self.buffer
    }

    pub fn format(&self) -> Option<PixelFormat> {
        self.format
    }

    pub fn has_key_frame(&self) -> bool {
        self.has_key_frame
    }

    // ── Internal ─────────────────────────────────────────────────

    fn apply_full(&mut self, format: PixelFormat, body: &[u8]) -> Result<(), LinkError> {
        let expected = self.width as usize * self.height as usize * format.bytes_per_pixel();
        if body.len() != expected {
            return Err(LinkError::MalformedMessage {
                expected,
                actual: body.len(),
            });
        }
        self.buffer.clear();
        self.buffer.extend_from_slice(body);
        self.format = Some(format);
        self.has_key_frame = true;
        Ok(())
    }

    fn apply_tiles(&mut self, bpp: usize, body: &[u8]) -> Result<u32, LinkError> {
        let mut cursor = Cursor { data: body, pos: 0 };
        let count = cursor.u32()?;
        let row_stride = self.width as usize * bpp;

        for _ in 0..count {
            let (x, y, w, h) = (cursor.u32()?, cursor.u32()?, cursor.u32()?, cursor.u32()?);
            if x.saturating_add(w) > self.width || y.saturating_add(h) > self.height {
                return Err(LinkError::Other(format!(
                    "tile {w}x{h}@{x},{y} outside {}x{}",
                    self.width, self.height
                )));
            }
            let row_bytes = w as usize * bpp;
            for row in 0..h as usize {
                let src = cursor.take(row_bytes)?;
                let dst = (y as usize + row) * row_stride + x as usize * bpp;
                self.buffer[dst..dst + row_bytes].copy_from_slice(src);
            }
        }
        Ok(count)
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], LinkError> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(LinkError::MalformedMessage {
                expected: end,
                actual: self.data.len(),
            });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, LinkError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{EncoderConfig, VideoEncoder, ZstdTileEncoder};
    use crate::types::RawFrame;
    use std::time::Instant;

    fn encoder(w: u32, h: u32) -> ZstdTileEncoder {
        let mut enc = ZstdTileEncoder::new(8);
        enc.configure(&EncoderConfig {
            width: w,
            height: h,
            bitrate: 1_000_000,
            frame_rate: 30,
            key_frame_interval_ms: 1000,
            epoch: Instant::now(),
        })
        .unwrap();
        enc
    }

    #[test]
    fn reconstructs_key_then_tiles() {
        let mut enc = encoder(32, 16);
        let mut dec = TileDecoder::new(32, 16);

        let first = vec![7u8; 32 * 16 * 4];
        let key = enc
            .encode(RawFrame::packed(32, 16, PixelFormat::Bgra8, first.clone()), false)
            .unwrap();
        assert!(dec.decode(&key.data).unwrap().full_frame);
        assert_eq!(dec.frame(), first.as_slice());

        let mut second = first.clone();
        // Pixel (9, 1) is inside the 8×8 tile at (8, 0).
        second[(32 + 9) * 4] = 0x42;
        let delta = enc
            .encode(RawFrame::packed(32, 16, PixelFormat::Bgra8, second.clone()), false)
            .unwrap();
        let summary = dec.decode(&delta.data).unwrap();
        assert_eq!(summary, DecodeSummary { full_frame: false, tiles: 1 });
        assert_eq!(dec.frame(), second.as_slice());
    }

    #[test]
    fn tiles_without_key_frame_are_rejected() {
        let mut enc = encoder(16, 16);
        let frame = || RawFrame::packed(16, 16, PixelFormat::Bgra8, vec![0u8; 16 * 16 * 4]);
        enc.encode(frame(), false).unwrap();
        let delta = enc.encode(frame(), false).unwrap();

        let mut dec = TileDecoder::new(16, 16);
        assert!(dec.decode(&delta.data).is_err());
        assert!(!dec.has_key_frame());
    }

    #[test]
    fn garbage_is_an_error() {
        let mut dec = TileDecoder::new(4, 4);
        assert!(dec.decode(b"not zstd").is_err());
    }
}
