//! Client configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wirecast_core::TransportConfig;

/// Top-level configuration for the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server to connect to.
    pub network: NetworkConfig,
    /// What to do with received payloads.
    pub output: OutputConfig,
    /// Optional one-shot upload after connecting.
    pub upload: UploadConfig,
    /// Logging.
    pub logging: LoggingConfig,
    /// Transport tuning passed straight to the core.
    pub transport: TransportConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server host name or IP address.
    pub server_address: String,
    /// Server port.
    pub port: u16,
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory payloads are written to. If empty, payloads are only logged.
    pub dir: String,
    /// Keep every payload as a numbered file instead of overwriting `latest.bin`.
    pub keep_all: bool,
}

/// Upload settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// File sent to the server once connected. If empty, nothing is sent.
    pub file: String,
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
            server_address: "127.0.0.1".into(),
            port: 11000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            keep_all: false,
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

impl ClientConfig {
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

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn output_dir(&self) -> Option<PathBuf> {
        (!self.output.dir.is_empty()).then(|| PathBuf::from(&self.output.dir))
    }

    pub fn upload_file(&self) -> Option<PathBuf> {
        (!self.upload.file.is_empty()).then(|| PathBuf::from(&self.upload.file))
    }
}

// ── Tests ────────────────────────────────────────────────────────
