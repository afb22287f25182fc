//! Transport tuning shared by servers and clients.
//!
//! Hosts usually embed [`TransportConfig`] as a `[transport]` table in
//! their own TOML file; every field has a default.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{DEFAULT_MAX_FRAME_LEN, FrameCodec};
use crate::error::WireError;
use crate::event::OverflowPolicy;
use crate::network::QueueLimits;

/// Upper bound on the reactor's readiness wait.
pub const MAX_POLL_INTERVAL_MS: u64 = 50;

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Interface a server binds to.
    pub bind_address: IpAddr,
    /// Largest payload accepted on receive and on send.
    pub max_frame_len: usize,
    /// Longest the reactor waits for readiness before re-checking for
    /// queued output and stop requests (1..=50).
    pub poll_interval_ms: u64,
    /// Bytes read from one socket per readiness event.
    pub read_chunk: usize,
    /// Capacity of the event channel handed to the consumer.
    pub event_capacity: usize,
    /// How long `Connected` / `Disconnected` may wait for channel room.
    pub lifecycle_timeout_ms: u64,
    /// Client connect deadline.
    pub connect_timeout_ms: u64,
    /// Disable Nagle's algorithm on every socket.
    pub nodelay: bool,
    /// Per-connection send queue bounds.
    pub queue: QueueLimits,
    /// What to do with `Received` events when the consumer lags.
    pub overflow: OverflowPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            poll_interval_ms: 20,
            read_chunk: 64 * 1024,
            event_capacity: 1024,
            lifecycle_timeout_ms: 1000,
            connect_timeout_ms: 5000,
            nodelay: true,
            queue: QueueLimits::default(),
            overflow: OverflowPolicy::default(),
        }
    }
}

impl TransportConfig {
    /// Reject values the reactor cannot work with.
    pub fn validate(&self) -> Result<(), WireError> {
        if self.max_frame_len == 0 || self.max_frame_len > u32::MAX as usize {
            return Err(WireError::Config(format!(
                "max_frame_len must be in 1..={}, got {}",
                u32::MAX,
                self.max_frame_len
            )));
        }
        if self.queue.max_frames == 0 || self.queue.max_bytes == 0 {
            return Err(WireError::Config("queue limits must be non-zero".into()));
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(WireError::Config(format!(
                "poll_interval_ms must be in 1..={MAX_POLL_INTERVAL_MS}, got {}",
                self.poll_interval_ms
            )));
        }
        if self.read_chunk == 0 {
            return Err(WireError::Config("read_chunk must be non-zero".into()));
        }
        if self.event_capacity == 0 {
            return Err(WireError::Config("event_capacity must be non-zero".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_millis(self.lifecycle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.max_frame_len)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = TransportConfig::default();
        cfg.validate().unwrap();
        assert!(cfg.poll_interval() <= Duration::from_millis(MAX_POLL_INTERVAL_MS));
    }

    #[test]
    fn rejects_slow_poll_interval() {
        let cfg = TransportConfig {
            poll_interval_ms: 100,
            ..TransportConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(WireError::Config(_))));
    }

    #[test]
    fn rejects_zero_queue_bound() {
        let mut cfg = TransportConfig::default();
        cfg.queue.max_frames = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: TransportConfig = toml::from_str(
            r#"
            max_frame_len = 1024
            [queue]
            max_frames = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.max_frame_len, 1024);
        assert_eq!(cfg.queue.max_frames, 2);
        assert_eq!(cfg.queue.max_bytes, QueueLimits::default().max_bytes);
        assert_eq!(cfg.poll_interval_ms, 20);
        assert!(cfg.nodelay);
    }

    #[test]
    fn roundtrip_toml() {
        let cfg = TransportConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("bind_address"));
        let parsed: TransportConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, cfg);
    }
}
