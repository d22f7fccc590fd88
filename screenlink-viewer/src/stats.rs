//! Stream statistics reported by the viewer.

use std::time::Duration;

use screenlink_core::EncodedUnit;

/// Counters over every unit received on one connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStats {
    /// Total units received.
    pub units: u64,
    pub key_frames: u64,
    /// Payload bytes received.
    pub bytes: u64,
    /// Sequence jumps seen on the wire.
    pub gaps: u64,
    /// Units the decoder could not apply.
    pub decode_errors: u64,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    first_pts_us: Option<u64>,
    last_pts_us: u64,
}

impl StreamStats {
    pub fn record(&mut self, unit: &EncodedUnit) {
        if let Some(last) = self.last_sequence {
            if unit.sequence != last + 1 {
                self.gaps += 1;
            }
        }
        self.first_sequence.get_or_insert(unit.sequence);
        self.first_pts_us.get_or_insert(unit.pts_us);
        self.last_sequence = Some(unit.sequence);
        self.last_pts_us = unit.pts_us;
        self.units += 1;
        self.bytes += unit.payload.len() as u64;
        if unit.is_key_frame() {
            self.key_frames += 1;
        }
    }

    /// Media time covered, from presentation timestamps.
    pub fn media_duration(&self) -> Duration {
        let first = self.first_pts_us.unwrap_or(self.last_pts_us);
        Duration::from_micros(self.last_pts_us.saturating_sub(first))
    }

    /// Frame rate implied by presentation timestamps.
    pub fn fps(&self) -> f64 {
        let secs = self.media_duration().as_secs_f64();
        if self.units < 2 || secs == 0.0 {
            return 0.0;
        }
        (self.units - 1) as f64 / secs
    }

    /// Average payload rate in bits per second of media time.
    pub fn bits_per_second(&self) -> u64 {
        let secs = self.media_duration().as_secs_f64();
        if secs == 0.0 {
            return 0;
        }
        (self.bytes as f64 * 8.0 / secs) as u64
    }
}

// ── Tests ────────────────────────────────────────────────────────
