//! Domain-specific error types for the wirecast transport.
//!
//! All fallible operations return `Result<T, WireError>`.
//! Per-connection faults inside the reactor never surface here; they
//! close that connection and show up as a `Disconnected` event.

use std::net::SocketAddr;

use thiserror::Error;

use crate::network::ConnectionId;

/// The canonical error type for the wirecast transport.
#[derive(Debug, Error)]
pub enum WireError {
    // ── Setup Errors ─────────────────────────────────────────────
    /// The listening socket could not be bound (port in use, no permission).
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The peer could not be reached. No automatic retry is attempted.
    #[error("connection to {addr} failed: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    // ── Send Errors ──────────────────────────────────────────────
    /// The target connection does not exist or is already closed.
    #[error("connection {0} is not connected")]
    NotConnected(ConnectionId),

    /// The per-connection send queue reached its bound. The connection
    /// stays usable; retry once the queue drains.
    #[error("send queue full: {frames} frames / {bytes} bytes pending")]
    QueueFull { frames: usize, bytes: usize },

    // ── Framing Errors ───────────────────────────────────────────
    /// A frame declared (or a payload requires) more bytes than allowed.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// A connection state change was requested from the wrong state.
    #[error("invalid state transition: {0}")]
    InvalidTransition(&'static str),

    // ── Serialization / Config Errors ────────────────────────────
    /// Encoding or decoding of an object payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<Box<bincode::ErrorKind>> for WireError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        WireError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = WireError::FrameTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = WireError::QueueFull {
            frames: 2,
            bytes: 64,
        };
        assert!(e.to_string().contains("2 frames"));
    }

    #[test]
    fn not_connected_names_the_id() {
        let e = WireError::NotConnected(ConnectionId::from_raw(7));
        assert!(e.to_string().contains("#7"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: WireError = io_err.into();
        assert!(matches!(e, WireError::Io(_)));
    }

    #[test]
    fn bind_failed_keeps_source() {
        use std::error::Error as _;
        let e = WireError::BindFailed {
            addr: "127.0.0.1:1".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(e.source().is_some());
        assert!(e.to_string().contains("127.0.0.1:1"));
    }
}
