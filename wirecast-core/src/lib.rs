//! # wirecast-core
//!
//! Length-prefixed message transport over TCP, for servers that push the
//! same payload to many clients and for the clients that receive it.
//!
//! This crate contains:
//! - **Codec**: `FrameCodec`, a 4-byte big-endian length prefix for `tokio_util`,
//!   plus bincode helpers for object payloads
//! - **Network**: `Server` and `Client` handles, per-connection bounded send
//!   queues, and the reactor that owns every socket
//! - **Events**: `Event`, `EventStream` and the `EventHandler` trait
//! - **State**: the connection lifecycle state machine
//! - **Config**: `TransportConfig`, serde-loadable with defaults
//! - **Error**: `WireError`, a `thiserror`-based error type
//!
//! ```no_run
//! use wirecast_core::{Event, Server, TransportConfig};
//!
//! # async fn demo() -> Result<(), wirecast_core::WireError> {
//! let (server, mut events) = Server::listen(11000, TransportConfig::default()).await?;
//! while let Some(event) = events.recv().await {
//!     if let Event::Received(id, payload) = event {
//!         server.broadcast_except(id, &payload)?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod network;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{FrameCodec, HEADER_LEN, decode_object, encode_frame, encode_object};
pub use config::TransportConfig;
pub use error::WireError;
pub use event::{Event, EventHandler, EventStream, OverflowPolicy};
pub use network::{Client, ConnectionId, ConnectionInfo, QueueLimits, Role, Server};
pub use state::ConnectionState;
