//! Runtime configuration for a streaming session.
//!
//! Durations are stored as `*_ms` integers so the structs serialize
//! cleanly into TOML; accessor methods hand out [`Duration`]s.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::transport::codec::MAX_PAYLOAD_SIZE;
use crate::transport::pairing;

/// Default listening port for the video/input connection.
pub const DEFAULT_PORT: u16 = 8000;
/// Default UDP port for the LAN discovery responder.
pub const DEFAULT_DISCOVERY_PORT: u16 = 8001;

// ── SessionConfig ────────────────────────────────────────────────

/// Limits, queue capacities and pacing for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest accepted capture width.
    pub max_width: u32,
    /// Largest accepted capture height.
    pub max_height: u32,
    /// Raw frames buffered between capture and encoder (drop-oldest).
    pub frame_queue_capacity: usize,
    /// Encoded units buffered between encoder and transport.
    pub unit_queue_capacity: usize,
    /// Input events buffered between transport and injector.
    pub input_queue_capacity: usize,
    /// Nominal capture rate, used for the key-frame cadence.
    pub frame_rate: u32,
    /// Interval between forced key-frames.
    pub key_frame_interval_ms: u64,
    /// Upper bound on each teardown step.
    pub drain_timeout_ms: u64,
    /// Upper bound on capture acquisition and on binding the listener.
    pub start_timeout_ms: u64,
    pub transport: TransportConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_width: 8192,
            max_height: 8192,
            frame_queue_capacity: 3,
            unit_queue_capacity: 8,
            input_queue_capacity: 64,
            frame_rate: 30,
            key_frame_interval_ms: 1000,
            drain_timeout_ms: 2000,
            start_timeout_ms: 5000,
            transport: TransportConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Number of frames between forced key-frames (at least 1).
    pub fn key_frame_period(&self) -> u64 {
        (u64::from(self.frame_rate).saturating_mul(self.key_frame_interval_ms) / 1000).max(1)
    }

    /// Reject capacities the queues cannot honour.
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.frame_queue_capacity == 0 {
            return Err(LinkError::InvalidParameters(
                "frame_queue_capacity must be > 0".into(),
            ));
        }
        if self.unit_queue_capacity < 2 {
            return Err(LinkError::InvalidParameters(
                "unit_queue_capacity must be >= 2".into(),
            ));
        }
        if self.input_queue_capacity == 0 {
            return Err(LinkError::InvalidParameters(
                "input_queue_capacity must be > 0".into(),
            ));
        }
        if self.frame_rate == 0 {
            return Err(LinkError::InvalidParameters("frame_rate must be > 0".into()));
        }
        if self.start_timeout_ms == 0 {
            return Err(LinkError::InvalidParameters(
                "start_timeout_ms must be > 0".into(),
            ));
        }
        // A GOP must fit in the cache or late joiners never get a replay.
        let period = self.key_frame_period();
        if (self.transport.max_gop_units as u64) < period {
            return Err(LinkError::InvalidParameters(format!(
                "transport.max_gop_units must be >= {period} (frames per key-frame interval)"
            )));
        }
        self.transport.validate()
    }
}

// ── TransportConfig ──────────────────────────────────────────────

/// Listener, timeouts and pairing for the viewer connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub bind_address: IpAddr,
    /// TCP port; 0 picks an ephemeral port.
    pub port: u16,
    pub write_timeout_ms: u64,
    /// Inbound silence tolerated before the peer is considered dead.
    pub read_timeout_ms: u64,
    /// Deadline for pairing plus handshake.
    pub handshake_timeout_ms: u64,
    /// Require a 4-digit PIN before the handshake.
    pub require_pin: bool,
    /// Use this PIN instead of a random one.
    pub fixed_pin: Option<String>,
    /// Answer LAN discovery probes on this UDP port.
    pub discovery_port: Option<u16>,
    /// Name announced to discovering viewers.
    pub device_name: String,
    /// Delta frames kept after the cached key-frame.
    pub max_gop_units: usize,
    /// Per-peer outbound channel capacity.
    pub peer_queue_capacity: usize,
    /// Largest accepted video payload.
    pub max_payload_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            write_timeout_ms: 5000,
            read_timeout_ms: 30_000,
            handshake_timeout_ms: 5000,
            require_pin: false,
            fixed_pin: None,
            discovery_port: None,
            device_name: "screenlink".into(),
            max_gop_units: 120,
            peer_queue_capacity: 16,
            max_payload_bytes: MAX_PAYLOAD_SIZE,
        }
    }
}

impl TransportConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        if let Some(pin) = &self.fixed_pin {
            if !pairing::is_valid_pin(pin) {
                return Err(LinkError::InvalidParameters(
                    "fixed_pin must be 4 ASCII digits".into(),
                ));
            }
        }
        if self.peer_queue_capacity == 0 {
            return Err(LinkError::InvalidParameters(
                "peer_queue_capacity must be > 0".into(),
            ));
        }
        if self.max_payload_bytes == 0 || self.max_payload_bytes > MAX_PAYLOAD_SIZE {
            return Err(LinkError::InvalidParameters(format!(
                "max_payload_bytes must be in 1..={MAX_PAYLOAD_SIZE}"
            )));
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SessionConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.key_frame_period(), 30);
        assert_eq!(cfg.transport.listen_addr().port(), DEFAULT_PORT);
    }

    #[test]
    fn key_frame_period_never_zero() {
        let cfg = SessionConfig {
            frame_rate: 1,
            key_frame_interval_ms: 10,
            ..Default::default()
        };
        assert_eq!(cfg.key_frame_period(), 1);
    }

    #[test]
    fn rejects_tiny_unit_queue() {
        let cfg = SessionConfig {
            unit_queue_capacity: 1,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_bad_fixed_pin() {
        let mut cfg = SessionConfig::default();
        cfg.transport.fixed_pin = Some("12a4".into());
        assert!(cfg.validate().is_err());
        cfg.transport.fixed_pin = Some("0420".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: SessionConfig =
            serde_json::from_str(r#"{"frame_rate": 60, "transport": {"port": 9000}}"#).unwrap();
        assert_eq!(cfg.frame_rate, 60);
        assert_eq!(cfg.transport.port, 9000);
        assert_eq!(cfg.frame_queue_capacity, 3);
        assert_eq!(cfg.transport.read_timeout_ms, 30_000);
    }

    #[test]
    fn huge_key_frame_interval_saturates() {
        let cfg = SessionConfig {
            frame_rate: 120,
            key_frame_interval_ms: u64::MAX,
            ..Default::default()
        };
        assert_eq!(cfg.key_frame_period(), u64::MAX / 1000);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn gop_cache_must_hold_a_key_frame_interval() {
        let mut cfg = SessionConfig {
            frame_rate: 60,
            key_frame_interval_ms: 4000,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        cfg.transport.max_gop_units = 240;
        cfg.validate().unwrap();
    }
}
