//! # screenlink-core
//!
//! Remote screen control: frames captured on this machine are encoded and
//! streamed to one TCP viewer, whose pointer and key events are injected
//! back into the local input system.
//!
//! This crate contains:
//! - **Session**: `SessionController`, the lifecycle state machine and host API
//! - **Capture**: `FrameSource` and the `Surface` producers push frames into
//! - **Encode**: `EncoderPipeline` plus the zstd tile codec behind `VideoEncoder`
//! - **Transport**: `TransportServer`, the wire codecs, PIN pairing and LAN discovery
//! - **Input**: `InputInjector`, clamping and ordered delivery to an `InputSink`
//! - **Client**: `ViewerClient` and `TileDecoder` for the receiving side
//! - **Error**: `LinkError`, a `thiserror` hierarchy with coarse `ErrorKind`s

pub mod capture;
pub mod client;
pub mod config;
pub mod decoder;
pub mod encode;
pub mod error;
pub mod input;
pub mod queue;
pub mod session;
pub mod state;
pub mod transport;
pub mod types;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{CaptureBackend, FrameSource, FrameSourceStats, SubmitOutcome, Surface};
pub use client::{InputWriter, UnitStream, ViewerClient};
pub use config::{SessionConfig, TransportConfig, DEFAULT_DISCOVERY_PORT, DEFAULT_PORT};
pub use decoder::{DecodeSummary, TileDecoder};
pub use encode::{
    EncodedPayload, EncoderConfig, EncoderFactory, EncoderPipeline, VideoEncoder, ZstdTileEncoder,
    ZstdTileFactory,
};
pub use error::{ErrorKind, LinkError};
pub use input::{InjectorStats, InputInjector, InputSender, InputSink};
pub use queue::{BoundedQueue, OverflowPolicy, QueueStats};
pub use session::{
    EndReason, Platform, SessionController, SessionEvent, SessionInfo, SessionStats,
};
pub use state::{ConnectionState, SessionState};
pub use transport::{Announcement, Handshake, InputMessage, TransportServer};
pub use types::{
    CaptureToken, CodecId, EncodedUnit, InputEvent, InputKind, PixelFormat, RawFrame,
    SessionParams, UnitFlags,
};
