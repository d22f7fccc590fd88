//! Output-rate estimator feeding encoder rate control.
//!
//! Keeps `(when, bytes)` samples over a rolling window and reports the
//! encoded output rate in bits per second.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling-window throughput estimator.
#[derive(Debug)]
pub struct BandwidthEstimator {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    bytes_in_window: u64,
    total_bytes: u64,
}

impl BandwidthEstimator {
    /// One-second window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(64),
            window,
            bytes_in_window: 0,
            total_bytes: 0,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    /// Record with an explicit timestamp (tests drive time this way).
    pub fn record_at(&mut self, when: Instant, bytes: u64) {
        self.samples.push_back((when, bytes));
        self.bytes_in_window += bytes;
        self.total_bytes += bytes;
        while let Some(&(ts, old)) = self.samples.front() {
            if when.saturating_duration_since(ts) <= self.window {
                break;
            }
            self.samples.pop_front();
            self.bytes_in_window -= old;
        }
    }

    /// Bits per second over the span the window currently covers.
    ///
    /// Spans shorter than a millisecond count as one millisecond.
    pub fn bits_per_second(&self) -> u64 {
        let (Some((first, _)), Some((last, _))) = (self.samples.front(), self.samples.back())
        else {
            return 0;
        };
        let span = last
            .saturating_duration_since(*first)
            .max(Duration::from_millis(1));
        (self.bytes_in_window as f64 * 8.0 / span.as_secs_f64()) as u64
    }

    /// Bytes recorded since creation.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(BandwidthEstimator::new().bits_per_second(), 0);
    }

    #[test]
    fn steady_rate() {
        let mut est = BandwidthEstimator::with_window(Duration::from_secs(5));
        let t0 = Instant::now();
        est.record_at(t0, 125_000);
        est.record_at(t0 + Duration::from_secs(1), 125_000);
        // 250 kB over one second = 2 Mbit/s.
        let bps = est.bits_per_second();
        assert!((1_900_000..=2_100_000).contains(&bps), "bps = {bps}");
    }

    #[test]
    fn old_samples_fall_out() {
        let mut est = BandwidthEstimator::with_window(Duration::from_millis(500));
        let t0 = Instant::now();
        est.record_at(t0, 1000);
        est.record_at(t0 + Duration::from_millis(600), 2000);
        assert_eq!(est.sample_count(), 1);
        assert_eq!(est.total_bytes(), 3000);
    }
}
