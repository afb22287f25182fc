//! # wirecast-client: Broadcast Receiver
//!
//! Connects to a `wirecast-server`, logs every payload it is sent and
//! optionally stores it on disk, standing in for a viewer. Can upload one
//! file right after connecting, which the server relays to every other
//! client.

pub mod config;
pub mod session;
pub mod sink;
