//! Built-in tile codec: changed tiles, zstd-compressed.
//!
//! Every payload is a zstd stream over:
//!
//! ```text
//! format: u8            PixelFormat discriminant
//! kind:   u8            0 = full frame, 1 = tiles
//! body:
//!   full  → height rows of width*bpp bytes
//!   tiles → count: u32, then per tile
//!           x: u32 | y: u32 | width: u32 | height: u32 | rows
//! ```
//!
//! All integers little-endian. Full frames are key-frames.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::encode::delta::{DeltaDetector, Tile};
use crate::encode::{EncodedPayload, EncoderConfig, EncoderFactory, VideoEncoder};
use crate::error::LinkError;
use crate::types::{CodecId, RawFrame};

pub const KIND_FULL: u8 = 0;
pub const KIND_TILES: u8 = 1;
pub const DEFAULT_TILE_SIZE: usize = 64;

const MIN_LEVEL: i32 = 1;
const MAX_LEVEL: i32 = 9;

// ── ZstdTileEncoder ──────────────────────────────────────────────

/// Tile encoder with a throughput-driven compression level.
pub struct ZstdTileEncoder {
    detector: DeltaDetector,
    level: i32,
    /// Target output in bits per second.
    target_bps: u64,
    width: u32,
    height: u32,
    frames: u64,
}

impl ZstdTileEncoder {
    pub fn new(tile_size: usize) -> Self {
        Self {
            detector: DeltaDetector::new(tile_size),
            level: MIN_LEVEL,
            target_bps: 0,
            width: 0,
            height: 0,
            frames: 0,
        }
    }

    pub fn compression_level(&self) -> i32 {
        self.level
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames
    }

    fn pack_full(frame: &RawFrame, out: &mut Vec<u8>) {
        let row_len = frame.width as usize * frame.format.bytes_per_pixel();
        out.reserve(row_len * frame.height as usize);
        for y in 0..frame.height {
            out.extend_from_slice(&frame.row(y)[..row_len]);
        }
    }

    fn pack_tiles(tiles: &[Tile], frame: &RawFrame, out: &mut Vec<u8>) {
        let bpp = frame.format.bytes_per_pixel();
        out.extend_from_slice(&(tiles.len() as u32).to_le_bytes());
        for tile in tiles {
            for v in [tile.x, tile.y, tile.width, tile.height] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            let left = tile.x as usize * bpp;
            let right = left + tile.width as usize * bpp;
            for y in tile.y..tile.y + tile.height {
                out.extend_from_slice(&frame.row(y)[left..right]);
            }
        }
    }
}

impl Default for ZstdTileEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}

impl VideoEncoder for ZstdTileEncoder {
    fn codec(&self) -> CodecId {
        CodecId::ZstdTiles
    }

    fn configure(&mut self, config: &EncoderConfig) -> Result<(), LinkError> {
        if config.width == 0 || config.height == 0 {
            return Err(LinkError::EncoderFault("zero-sized encoder".into()));
        }
        self.width = config.width;
        self.height = config.height;
        self.target_bps = config.bitrate as u64;
        self.level = MIN_LEVEL;
        self.detector.reset();
        Ok(())
    }

    fn encode(
        &mut self,
        frame: RawFrame,
        request_key_frame: bool,
    ) -> Result<EncodedPayload, LinkError> {
        if frame.width != self.width || frame.height != self.height {
            return Err(LinkError::EncoderFault(format!(
                "frame {}x{} does not match configured {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        if request_key_frame {
            self.detector.reset();
        }
        let delta = self.detector.detect(&frame);

        let mut raw = vec![frame.format as u8];
        if delta.full_frame {
            raw.push(KIND_FULL);
            Self::pack_full(&frame, &mut raw);
        } else {
            raw.push(KIND_TILES);
            Self::pack_tiles(&delta.tiles, &frame, &mut raw);
        }
        drop(frame);

        let compressed = zstd::encode_all(raw.as_slice(), self.level)
            .map_err(|e| LinkError::EncoderFault(format!("zstd encode failed: {e}")))?;
        self.frames += 1;

        Ok(EncodedPayload {
            data: Bytes::from(compressed),
            key_frame: delta.full_frame,
        })
    }

    /// Over budget → compress harder; under 80 % → back off.
    fn adjust_to_throughput(&mut self, measured_bps: u64) {
        if self.target_bps == 0 {
            return;
        }
        let before = self.level;
        if measured_bps > self.target_bps {
            self.level = (self.level + 1).min(MAX_LEVEL);
        } else if measured_bps < self.target_bps * 8 / 10 {
            self.level = (self.level - 1).max(MIN_LEVEL);
        }
        if before != self.level {
            debug!(measured_bps, level = self.level, "zstd level adjusted");
        }
    }

    fn release(&mut self) {
        self.detector.reset();
    }
}

// ── ZstdTileFactory ──────────────────────────────────────────────

/// Factory producing [`ZstdTileEncoder`]s.
#[derive(Debug, Clone, Copy)]
pub struct ZstdTileFactory {
    pub tile_size: usize,
}

impl ZstdTileFactory {
    pub fn shared() -> Arc<dyn EncoderFactory> {
        Arc::new(Self::default())
    }
}

impl Default for ZstdTileFactory {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
        }
    }
}

impl EncoderFactory for ZstdTileFactory {
    fn create(&self) -> Result<Box<dyn VideoEncoder>, LinkError> {
        Ok(Box::new(ZstdTileEncoder::new(self.tile_size)))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelFormat;
    use std::time::Instant;

    fn config(w: u32, h: u32) -> EncoderConfig {
        EncoderConfig {
            width: w,
            height: h,
            bitrate: 1_000_000,
            frame_rate: 30,
            key_frame_interval_ms: 1000,
            epoch: Instant::now(),
        }
    }

    fn frame(w: u32, h: u32, fill: u8) -> RawFrame {
        RawFrame::packed(w, h, PixelFormat::Bgra8, vec![fill; (w * h * 4) as usize])
    }

    fn configured(w: u32, h: u32) -> ZstdTileEncoder {
        let mut enc = ZstdTileEncoder::default();
        enc.configure(&config(w, h)).unwrap();
        enc
    }

    #[test]
    fn first_frame_is_key_and_compresses() {
        let mut enc = configured(128, 128);
        let out = enc.encode(frame(128, 128, 0xAB), false).unwrap();
        assert!(out.key_frame);
        assert!(out.data.len() < 128 * 128 * 4);
        assert_eq!(enc.frames_encoded(), 1);
    }

    #[test]
    fn unchanged_frame_is_delta() {
        let mut enc = configured(128, 128);
        enc.encode(frame(128, 128, 1), false).unwrap();
        let out = enc.encode(frame(128, 128, 1), false).unwrap();
        assert!(!out.key_frame);

        let raw = zstd::decode_all(out.data.as_ref()).unwrap();
        assert_eq!(raw[1], KIND_TILES);
        assert_eq!(&raw[2..6], &0u32.to_le_bytes());
    }

    #[test]
    fn key_request_is_honoured() {
        let mut enc = configured(64, 64);
        enc.encode(frame(64, 64, 1), false).unwrap();
        assert!(enc.encode(frame(64, 64, 1), true).unwrap().key_frame);
    }

    #[test]
    fn geometry_mismatch_is_a_fault() {
        let mut enc = configured(64, 64);
        let err = enc.encode(frame(32, 32, 0), false).unwrap_err();
        assert!(matches!(err, LinkError::EncoderFault(_)));
    }

    #[test]
    fn level_follows_throughput() {
        let mut enc = configured(64, 64);
        enc.adjust_to_throughput(2_000_000);
        assert_eq!(enc.compression_level(), 2);
        enc.adjust_to_throughput(100_000);
        assert_eq!(enc.compression_level(), 1);
        enc.adjust_to_throughput(100_000);
        assert_eq!(enc.compression_level(), 1);
    }

    #[test]
    fn factory_builds_tile_codec() {
        let enc = ZstdTileFactory::shared().create().unwrap();
        assert_eq!(enc.codec(), CodecId::ZstdTiles);
    }
}
