//! Lifecycle state machines for the session and the viewer connection.
//!
//! Both enums expose validated transitions that return `Result`
//! instead of panicking. The session controller applies them through a
//! single `watch` channel so observers always see a consistent state.

use std::fmt;

use crate::error::LinkError;

// ── SessionState ─────────────────────────────────────────────────

/// The current phase of the streaming session.
///
/// ```text
///  Idle ──► Starting ──► Streaming ──► Stopping ──► Idle
///              │                          ▲
///              ▼                          │
///            Failed ──────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No active session. Initial and resting state.
    #[default]
    Idle,
    /// Components are being brought up.
    Starting,
    /// Frames flow and input is accepted.
    Streaming,
    /// Teardown in progress.
    Stopping,
    /// Start failed after partial bring-up; `stop()` returns to `Idle`.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Starting => "Starting",
            Self::Streaming => "Streaming",
            Self::Stopping => "Stopping",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

impl SessionState {
    /// Only a streaming session accepts injected input.
    pub fn accepts_input(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn begin_start(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Idle => {
                *self = Self::Starting;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition("cannot start: not Idle")),
        }
    }

    /// Valid from: `Starting`.
    pub fn complete_start(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Starting => {
                *self = Self::Streaming;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition(
                "cannot complete start: not Starting",
            )),
        }
    }

    /// Valid from: `Starting`.
    pub fn fail_start(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Starting => {
                *self = Self::Failed;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition("cannot fail: not Starting")),
        }
    }

    /// Valid from: `Starting`, `Streaming`, `Failed`.
    pub fn begin_stop(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Starting | Self::Streaming | Self::Failed => {
                *self = Self::Stopping;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition(
                "cannot stop: not Starting, Streaming or Failed",
            )),
        }
    }

    /// Valid from: `Stopping`.
    pub fn finish_stop(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Stopping => {
                *self = Self::Idle;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition(
                "cannot finish stop: not Stopping",
            )),
        }
    }
}

// ── ConnectionState ──────────────────────────────────────────────

/// Lifecycle of the single viewer connection.
///
/// ```text
///  Connecting ──► Established ──► Closing ──► Closed
///       │                                       ▲
///       └───────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Accepted; pairing and handshake pending.
    #[default]
    Connecting,
    Established,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "Connecting",
            Self::Established => "Established",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

impl ConnectionState {
    /// Valid from: `Connecting`.
    pub fn establish(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Connecting => {
                *self = Self::Established;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition(
                "cannot establish: not Connecting",
            )),
        }
    }

    /// Valid from: `Established`.
    pub fn begin_close(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Established => {
                *self = Self::Closing;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition(
                "cannot close: not Established",
            )),
        }
    }

    /// Unconditionally mark the connection closed.
    pub fn force_close(&mut self) {
        *self = Self::Closed;
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Connecting | Self::Established)
    }
}

// ── Tests ────────────────────────────────────────────────────────
