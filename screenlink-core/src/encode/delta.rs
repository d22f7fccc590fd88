//! Tile-level change detection between consecutive frames.
//!
//! The screen is split into `tile_size × tile_size` tiles; each tile is
//! compared byte-for-byte against a packed copy of the previously encoded
//! frame. The detector keeps its own copy so the capture buffer can be
//! dropped as soon as encoding returns.

use std::cmp;

use crate::types::{PixelFormat, RawFrame};

/// Fraction of changed tiles above which a full frame is cheaper.
const FULL_FRAME_RATIO: f64 = 0.80;

// ── Tile ─────────────────────────────────────────────────────────

/// A rectangular region that changed since the previous frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Tile {
    fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

// ── TileDelta ────────────────────────────────────────────────────

/// Outcome of one detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileDelta {
    pub width: u32,
    pub height: u32,
    /// Changed tiles; a single full-screen tile when `full_frame`.
    pub tiles: Vec<Tile>,
    pub full_frame: bool,
}

impl TileDelta {
    fn full(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tiles: vec![Tile {
                x: 0,
                y: 0,
                width,
                height,
            }],
            full_frame: true,
        }
    }

    /// Fraction of the screen area that changed (0.0 – 1.0).
    pub fn change_ratio(&self) -> f64 {
        if self.full_frame {
            return 1.0;
        }
        let total = self.width as u64 * self.height as u64;
        if total == 0 {
            return 0.0;
        }
        let changed: u64 = self.tiles.iter().map(Tile::area).sum();
        (changed as f64 / total as f64).min(1.0)
    }
}

// ── DeltaDetector ────────────────────────────────────────────────

struct Reference {
    width: u32,
    height: u32,
    format: PixelFormat,
    /// Tightly packed rows.
    pixels: Vec<u8>,
}

/// Stateful detector remembering the last encoded frame.
pub struct DeltaDetector {
    reference: Option<Reference>,
    tile_size: usize,
}

impl DeltaDetector {
    /// `tile_size` is clamped to at least 1.
    pub fn new(tile_size: usize) -> Self {
        Self {
            reference: None,
            tile_size: tile_size.max(1),
        }
    }

    /// Forget the reference; the next frame is reported as full.
    pub fn reset(&mut self) {
        self.reference = None;
    }

    /// Compare `current` against the reference and adopt it as the new one.
    pub fn detect(&mut self, current: &RawFrame) -> TileDelta {
        let delta = match &self.reference {
            Some(r)
                if r.width == current.width
                    && r.height == current.height
                    && r.format == current.format =>
            {
                self.diff(current, r)
            }
            _ => TileDelta::full(current.width, current.height),
        };
        self.remember(current);
        delta
    }

    // ── Internal ─────────────────────────────────────────────────

    fn diff(&self, current: &RawFrame, reference: &Reference) -> TileDelta {
        let w = current.width as usize;
        let h = current.height as usize;
        let ts = self.tile_size;
        let tiles_x = w.div_ceil(ts);
        let tiles_y = h.div_ceil(ts);

        let mut changed = Vec::new();
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let (x0, y0) = (tx * ts, ty * ts);
                let (x1, y1) = (cmp::min(x0 + ts, w), cmp::min(y0 + ts, h));
                if tile_differs(current, reference, x0, y0, x1, y1) {
                    changed.push(Tile {
                        x: x0 as u32,
                        y: y0 as u32,
                        width: (x1 - x0) as u32,
                        height: (y1 - y0) as u32,
                    });
                }
            }
        }

        let total = tiles_x * tiles_y;
        if total > 0 && changed.len() as f64 / total as f64 > FULL_FRAME_RATIO {
            return TileDelta::full(current.width, current.height);
        }
        TileDelta {
            width: current.width,
            height: current.height,
            tiles: changed,
            full_frame: false,
        }
    }

    fn remember(&mut self, frame: &RawFrame) {
        let row_len = frame.width as usize * frame.format.bytes_per_pixel();
        let mut reference = match self.reference.take() {
            Some(mut r) => {
                r.pixels.clear();
                r
            }
            None => Reference {
                width: 0,
                height: 0,
                format: frame.format,
                pixels: Vec::with_capacity(row_len * frame.height as usize),
            },
        };
        for y in 0..frame.height {
            reference.pixels.extend_from_slice(&frame.row(y)[..row_len]);
        }
        reference.width = frame.width;
        reference.height = frame.height;
        reference.format = frame.format;
        self.reference = Some(reference);
    }
}

/// Row-by-row comparison of one tile.
fn tile_differs(
    current: &RawFrame,
    reference: &Reference,
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
) -> bool {
    let bpp = current.format.bytes_per_pixel();
    let ref_stride = reference.width as usize * bpp;
    let (left, right) = (x0 * bpp, x1 * bpp);
    (y0..y1).any(|y| {
        let cur = &current.row(y as u32)[left..right];
        let prev = &reference.pixels[y * ref_stride + left..y * ref_stride + right];
        cur != prev
    })
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(w: u32, h: u32, fill: u8) -> RawFrame {
        RawFrame::packed(w, h, PixelFormat::Bgra8, vec![fill; (w * h * 4) as usize])
    }

    #[test]
    fn first_frame_is_full() {
        let mut det = DeltaDetector::new(64);
        let delta = det.detect(&frame(128, 128, 0));
        assert!(delta.full_frame);
        assert_eq!(delta.tiles.len(), 1);
        assert_eq!(delta.tiles[0].width, 128);
    }

    #[test]
    fn static_screen_has_no_tiles() {
        let mut det = DeltaDetector::new(64);
        det.detect(&frame(128, 128, 0xAA));
        let delta = det.detect(&frame(128, 128, 0xAA));
        assert!(!delta.full_frame);
        assert!(delta.tiles.is_empty());
        assert_eq!(delta.change_ratio(), 0.0);
    }

    #[test]
    fn one_pixel_marks_its_tile() {
        let mut det = DeltaDetector::new(64);
        det.detect(&frame(128, 128, 0));

        let mut pixels = vec![0u8; 128 * 128 * 4];
        // Pixel (70, 10) lives in tile (1, 0).
        pixels[(10 * 128 + 70) * 4] = 0xFF;
        let delta = det.detect(&RawFrame::packed(128, 128, PixelFormat::Bgra8, pixels));

        assert!(!delta.full_frame);
        assert_eq!(
            delta.tiles,
            vec![Tile {
                x: 64,
                y: 0,
                width: 64,
                height: 64
            }]
        );
        assert!((delta.change_ratio() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn wholesale_change_promotes_to_full() {
        let mut det = DeltaDetector::new(64);
        det.detect(&frame(128, 128, 0));
        assert!(det.detect(&frame(128, 128, 0xFF)).full_frame);
    }

    #[test]
    fn padded_stride_is_ignored() {
        let mut det = DeltaDetector::new(4);
        let mut padded = RawFrame::packed(4, 2, PixelFormat::Bgra8, vec![1u8; 2 * 32]);
        padded.stride = 32;
        det.detect(&padded);

        // Same visible pixels, different padding bytes.
        let mut data = vec![1u8; 2 * 32];
        data[20..32].fill(9);
        let mut padded2 = RawFrame::packed(4, 2, PixelFormat::Bgra8, data);
        padded2.stride = 32;
        assert!(det.detect(&padded2).tiles.is_empty());
    }

    #[test]
    fn reset_forces_full_frame() {
        let mut det = DeltaDetector::new(64);
        det.detect(&frame(64, 64, 0));
        det.reset();
        assert!(det.detect(&frame(64, 64, 0)).full_frame);
    }
}
