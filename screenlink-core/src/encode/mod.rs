//! Encoder Pipeline: raw frames in, numbered [`EncodedUnit`]s out.
//!
//! - [`VideoEncoder`] / [`EncoderFactory`]: the codec capability the
//!   platform provides (a hardware AVC encoder, or the built-in
//!   [`ZstdTileEncoder`]).
//! - [`EncoderPipeline`]: drives one encoder on a blocking context,
//!   assigns sequence numbers and timestamps and enforces key-frame
//!   cadence.
//!
//! [`EncodedUnit`]: crate::types::EncodedUnit

pub mod bandwidth;
pub mod delta;
pub mod pipeline;
pub mod zstd_tiles;

use std::time::Instant;

use bytes::Bytes;

use crate::error::LinkError;
use crate::types::{CodecId, RawFrame};

pub use bandwidth::BandwidthEstimator;
pub use pipeline::{EncoderPipeline, KeyFrameRequest, PipelineEvent, PipelineStats};
pub use zstd_tiles::{ZstdTileEncoder, ZstdTileFactory};

// ── EncoderConfig ────────────────────────────────────────────────

/// Parameters an encoder is configured with at session start.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    pub frame_rate: u32,
    pub key_frame_interval_ms: u64,
    /// Session epoch; presentation timestamps are relative to it.
    pub epoch: Instant,
}

impl EncoderConfig {
    /// Frames between forced key-frames (at least 1).
    pub fn key_frame_period(&self) -> u64 {
        (u64::from(self.frame_rate).saturating_mul(self.key_frame_interval_ms) / 1000).max(1)
    }
}

// ── VideoEncoder ─────────────────────────────────────────────────

/// Output of one [`VideoEncoder::encode`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub data: Bytes,
    pub key_frame: bool,
}

/// A codec instance owned by one session.
///
/// Runs on a dedicated blocking thread, so implementations may block.
/// `encode` takes the frame by value; the frame must not outlive the call.
pub trait VideoEncoder: Send {
    fn codec(&self) -> CodecId;

    fn configure(&mut self, config: &EncoderConfig) -> Result<(), LinkError>;

    /// Encode one frame. When `request_key_frame` is set the output must
    /// be a key-frame.
    fn encode(&mut self, frame: RawFrame, request_key_frame: bool)
    -> Result<EncodedPayload, LinkError>;

    /// Measured output rate in bits per second over the last window.
    fn adjust_to_throughput(&mut self, _measured_bps: u64) {}

    fn release(&mut self) {}
}

/// Creates one encoder per session.
pub trait EncoderFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn VideoEncoder>, LinkError>;
}

impl<F> EncoderFactory for F
where
    F: Fn() -> Result<Box<dyn VideoEncoder>, LinkError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn VideoEncoder>, LinkError> {
        self()
    }
}
