//! Connections, send queues and the loops that drive them.

pub mod client;
pub mod connection;
pub mod queue;
pub(crate) mod reactor;
pub mod registry;
pub mod server;

pub use client::Client;
pub use connection::{Connection, ConnectionId, ConnectionInfo, PeerHandle, Role};
pub use queue::{QueueLimits, SendQueue};
pub use registry::Registry;
pub use server::Server;
