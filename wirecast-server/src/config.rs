//! Configuration for the broadcast server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wirecast_core::TransportConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Where broadcast payloads come from.
    pub payload: PayloadConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Transport tuning passed straight to the core.
    pub transport: TransportConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port to listen on (0 = ephemeral).
    pub port: u16,
    /// Milliseconds between broadcasts (0 = never broadcast on a timer).
    pub broadcast_interval_ms: u64,
    /// Forward payloads received from one client to every other client.
    pub relay: bool,
}

/// Payload source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PayloadConfig {
    /// File re-read on every tick. If empty, a test pattern is generated.
    pub file: String,
    /// Size of the generated test pattern in bytes.
    pub pattern_size: usize,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 11000,
            broadcast_interval_ms: 1000,
            relay: true,
        }
    }
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            file: String::new(),
            pattern_size: 64 * 1024,
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

    /// The broadcast period, or `None` when timed broadcasts are off.
    pub fn broadcast_interval(&self) -> Option<Duration> {
        match self.network.broadcast_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// The payload file, if one is configured.
    pub fn payload_file(&self) -> Option<PathBuf> {
        (!self.payload.file.is_empty()).then(|| PathBuf::from(&self.payload.file))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ServerConfig::default()).unwrap();
        assert!(text.contains("port = 11000"));
        assert!(text.contains("[transport]"));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ServerConfig::default()).unwrap();
        let parsed: ServerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.port, 11000);
        assert_eq!(parsed.transport, TransportConfig::default());
    }

    #[test]
    fn zero_interval_disables_timer() {
        let mut cfg = ServerConfig::default();
        assert_eq!(cfg.broadcast_interval(), Some(Duration::from_secs(1)));
        cfg.network.broadcast_interval_ms = 0;
        assert_eq!(cfg.broadcast_interval(), None);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let cfg = ServerConfig::load(Path::new("/nonexistent/wirecast-server.toml"));
        assert_eq!(cfg.network.port, 11000);
        assert!(cfg.payload_file().is_none());
    }

    #[test]
    fn write_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        ServerConfig::write_default(&path).unwrap();
        let cfg = ServerConfig::load(&path);
        assert_eq!(cfg.payload.pattern_size, 64 * 1024);
    }
}
