//! Domain-specific error types for screenlink.
//!
//! All fallible operations return `Result<T, LinkError>`.
//! No panics on remote input; every error is typed and recoverable,
//! and [`LinkError::kind`] folds the variants into the handful of
//! categories the session controller reacts to.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for screenlink.
#[derive(Debug, Error)]
pub enum LinkError {
    // ── Caller Errors ────────────────────────────────────────────
    /// Bad arguments to a boundary call (or a start while a session
    /// is already active). Rejected synchronously, no state change.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Capture authorization or surface acquisition failed.
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    // ── Pipeline Errors ──────────────────────────────────────────
    /// The video encoder reported an error or broke its contract.
    #[error("encoder fault: {0}")]
    EncoderFault(String),

    // ── Transport Errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A message on the wire had the wrong size.
    #[error("malformed message: expected {expected} bytes, got {actual}")]
    MalformedMessage { expected: usize, actual: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The peer did not present the expected pairing PIN.
    #[error("pairing rejected")]
    PairingRejected,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The operation was abandoned because the session is stopping.
    #[error("cancelled")]
    Cancelled,

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Input Errors ─────────────────────────────────────────────
    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A remote input event was dropped (counted, never surfaced).
    #[error("input ignored: {0}")]
    InjectionIgnored(&'static str),

    // ── State Errors ─────────────────────────────────────────────
    /// A lifecycle transition was attempted from the wrong state.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── ErrorKind ─────────────────────────────────────────────────────

/// Coarse error categories surfaced to the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParameters,
    CaptureUnavailable,
    EncoderFault,
    TransportError,
    InjectionIgnored,
    Internal,
}

impl LinkError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameters(_) => ErrorKind::InvalidParameters,
            Self::CaptureUnavailable(_) => ErrorKind::CaptureUnavailable,
            Self::EncoderFault(_) => ErrorKind::EncoderFault,
            Self::Connection(_)
            | Self::MalformedMessage { .. }
            | Self::PayloadTooLarge { .. }
            | Self::PairingRejected
            | Self::Timeout(_)
            | Self::ChannelClosed => ErrorKind::TransportError,
            Self::UnknownVariant { .. } | Self::InjectionIgnored(_) => ErrorKind::InjectionIgnored,
            Self::InvalidTransition(_) | Self::Cancelled | Self::Other(_) => ErrorKind::Internal,
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for LinkError {
    fn from(s: String) -> Self {
        LinkError::Other(s)
    }
}

impl From<&str> for LinkError {
    fn from(s: &str) -> Self {
        LinkError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for LinkError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        LinkError::ChannelClosed
    }
}

impl From<tokio::time::error::Elapsed> for LinkError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        LinkError::Timeout(Duration::ZERO)
    }
}
