//! Configuration for the host daemon.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use screenlink_core::{SessionConfig, DEFAULT_PORT};

use crate::capture::Pattern;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener, pairing and discovery.
    pub network: NetworkConfig,
    /// Stream geometry, pacing and queue sizes.
    pub session: SessionSection,
    /// Synthetic capture source.
    pub capture: CaptureConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: IpAddr,
    /// TCP port for the viewer connection.
    pub port: u16,
    /// UDP port answering LAN discovery; unset disables discovery.
    pub discovery_port: Option<u16>,
    /// Name shown to discovering viewers.
    pub device_name: String,
    /// Require a 4-digit PIN before streaming.
    pub require_pin: bool,
    /// Fixed PIN; a random one is generated per session when unset.
    pub fixed_pin: Option<String>,
    pub handshake_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub width: u32,
    pub height: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    pub frame_rate: u32,
    pub key_frame_interval_ms: u64,
    pub drain_timeout_ms: u64,
    pub frame_queue_capacity: usize,
    pub unit_queue_capacity: usize,
    pub input_queue_capacity: usize,
    /// Start a fresh session after the previous one ended.
    pub restart_on_end: bool,
    /// Pause before restarting.
    pub restart_delay_ms: u64,
}

/// Capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub pattern: Pattern,
    /// Tile edge used by the zstd tile encoder (pixels).
    pub tile_size: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive; `RUST_LOG` overrides it.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            discovery_port: None,
            device_name: "screenlink".into(),
            require_pin: false,
            fixed_pin: None,
            handshake_timeout_ms: 5000,
            read_timeout_ms: 30_000,
            write_timeout_ms: 5000,
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            bitrate: 5_000_000,
            frame_rate: 30,
            key_frame_interval_ms: 1000,
            drain_timeout_ms: 2000,
            frame_queue_capacity: 3,
            unit_queue_capacity: 8,
            input_queue_capacity: 64,
            restart_on_end: true,
            restart_delay_ms: 500,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pattern: Pattern::MovingBar,
            tile_size: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Core session settings; limits are sized to the configured geometry.
    pub fn to_session_config(&self) -> SessionConfig {
        let mut cfg = SessionConfig {
            frame_queue_capacity: self.session.frame_queue_capacity,
            unit_queue_capacity: self.session.unit_queue_capacity,
            input_queue_capacity: self.session.input_queue_capacity,
            frame_rate: self.session.frame_rate.clamp(1, 120),
            key_frame_interval_ms: self.session.key_frame_interval_ms,
            drain_timeout_ms: self.session.drain_timeout_ms,
            ..SessionConfig::default()
        };
        let t = &mut cfg.transport;
        t.bind_address = self.network.bind_address;
        t.port = self.network.port;
        t.discovery_port = self.network.discovery_port;
        t.device_name = self.network.device_name.clone();
        t.require_pin = self.network.require_pin;
        t.fixed_pin = self.network.fixed_pin.clone();
        t.handshake_timeout_ms = self.network.handshake_timeout_ms;
        t.read_timeout_ms = self.network.read_timeout_ms;
        t.write_timeout_ms = self.network.write_timeout_ms;
        let period = usize::try_from(cfg.key_frame_period()).unwrap_or(usize::MAX);
        cfg.transport.max_gop_units = cfg.transport.max_gop_units.max(period);
        cfg
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ServerConfig::default()).unwrap();
        assert!(text.contains("[network]"));
        assert!(text.contains("bitrate"));
        assert!(text.contains("moving-bar"));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ServerConfig::default()).unwrap();
        let parsed: ServerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.port, DEFAULT_PORT);
        assert_eq!(parsed.session.width, 1280);
        assert!(parsed.network.discovery_port.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: ServerConfig = toml::from_str(
            r#"
            [network]
            require_pin = true
            fixed_pin = "0815"
            discovery_port = 8001

            [session]
            frame_rate = 240
            "#,
        )
        .unwrap();
        let cfg = parsed.to_session_config();
        assert!(cfg.transport.require_pin);
        assert_eq!(cfg.transport.fixed_pin.as_deref(), Some("0815"));
        assert_eq!(cfg.transport.discovery_port, Some(8001));
        assert_eq!(cfg.frame_rate, 120);
        assert_eq!(cfg.unit_queue_capacity, 8);
        cfg.validate().unwrap();
    }

    #[test]
    fn long_key_frame_interval_grows_gop_cache() {
        let mut config = ServerConfig::default();
        config.session.frame_rate = 60;
        config.session.key_frame_interval_ms = 5000;
        let cfg = config.to_session_config();
        assert_eq!(cfg.transport.max_gop_units, 300);
        cfg.validate().unwrap();
    }
}
