//! # wirecast-server: Broadcast Server
//!
//! Listens for wirecast clients, pushes a payload to all of them on a
//! fixed interval, and relays whatever one client sends to every other
//! client.
//!
//! The payload comes from a [`PayloadSource`](service::PayloadSource):
//! either a file re-read on every tick (so an external producer such as
//! a screen grabber can keep replacing it) or a generated test pattern.

pub mod config;
pub mod service;
