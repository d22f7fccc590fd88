//! Viewer configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use screenlink_core::{DEFAULT_DISCOVERY_PORT, DEFAULT_PORT};

/// Top-level configuration for the viewer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host address (IP:port).
    pub host_address: String,
    /// Pairing PIN, if the host asks for one.
    pub pin: Option<String>,
    /// Connect and handshake timeout in milliseconds.
    pub timeout_ms: u64,
    /// Interval between keepalives; keep it below the host's read timeout.
    pub keepalive_ms: u64,
    /// UDP port probed by `discover`.
    pub discovery_port: u16,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host_address: format!("127.0.0.1:{DEFAULT_PORT}"),
            pin: None,
            timeout_ms: 5000,
            keepalive_ms: 5000,
            discovery_port: DEFAULT_DISCOVERY_PORT,
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

impl ViewerConfig {
    /// Load from a TOML file, falling back to defaults.
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
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ViewerConfig::default()).unwrap();
        assert!(text.contains("host_address"));
        assert!(text.contains("keepalive_ms"));
    }

    #[test]
    fn roundtrip_config() {
        let mut cfg = ViewerConfig::default();
        cfg.network.pin = Some("1234".into());
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: ViewerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.host_address, "127.0.0.1:8000");
        assert_eq!(parsed.network.pin.as_deref(), Some("1234"));
        assert_eq!(parsed.network.discovery_port, 8001);
    }
}
