//! Broadcast service core logic.
//!
//! Owns a wirecast [`Server`], pushes the current payload to every client
//! on a timer, and optionally relays what one client sends to all the
//! others.

use std::net::SocketAddr;
use std::path::PathBuf;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wirecast_core::{ConnectionId, Event, EventStream, Server, WireError};

use crate::config::ServerConfig;

// ── PayloadSource ────────────────────────────────────────────────

/// Produces the payload broadcast on each tick.
#[derive(Debug, Clone)]
pub enum PayloadSource {
    /// Re-read a file every tick, so an external producer can replace it.
    File(PathBuf),
    /// Generated bytes that change with every tick.
    Pattern { size: usize },
}

impl PayloadSource {
    pub fn from_config(config: &ServerConfig) -> Self {
        match config.payload_file() {
            Some(path) => Self::File(path),
            None => Self::Pattern {
                size: config.payload.pattern_size,
            },
        }
    }

    /// Payload for broadcast number `seq`.
    pub fn next_payload(&self, seq: u64) -> std::io::Result<Bytes> {
        match self {
            Self::File(path) => std::fs::read(path).map(Bytes::from),
            Self::Pattern { size } => {
                let base = seq as u8;
                Ok((0..*size).map(|i| base.wrapping_add(i as u8)).collect())
            }
        }
    }
}

// ── ServiceStats ─────────────────────────────────────────────────

/// Counters reported when the service stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub broadcasts: u64,
    pub relayed: u64,
    pub connects: u64,
    pub disconnects: u64,
}

// ── BroadcastService ─────────────────────────────────────────────

/// The top-level broadcast service.
pub struct BroadcastService {
    config: ServerConfig,
    source: PayloadSource,
    server: Server,
    events: EventStream,
    stop: CancellationToken,
}

impl BroadcastService {
    /// Bind the listener. Nothing is broadcast until [`run`](Self::run).
    pub async fn bind(config: ServerConfig) -> Result<Self, WireError> {
        let (server, events) =
            Server::listen(config.network.port, config.transport.clone()).await?;
        Ok(Self {
            source: PayloadSource::from_config(&config),
            config,
            server,
            events,
            stop: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Obtain a handle that stops [`run`](Self::run) from another task.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Run until stopped.
    ///
    /// 1. Broadcasts the next payload on every tick of the interval.
    /// 2. Logs connects and disconnects.
    /// 3. Relays received payloads to every other client when enabled.
    /// 4. On stop, closes every connection and drains the last events.
    pub async fn run(mut self) -> ServiceStats {
        let mut stats = ServiceStats::default();
        let mut ticker = self.config.broadcast_interval().map(tokio::time::interval);

        info!(
            local_addr = %self.server.local_addr(),
            source = ?self.source,
            "broadcast service running"
        );

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = next_tick(&mut ticker) => self.broadcast_next(&mut stats),
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event, &mut stats),
                    None => break,
                },
            }
        }

        self.server.shutdown().await;
        while let Some(event) = self.events.recv().await {
            self.handle(event, &mut stats);
        }

        let dropped = self.events.dropped_events();
        if dropped > 0 {
            warn!(dropped, "events were dropped while the service was busy");
        }
        info!(?stats, "broadcast service stopped");
        stats
    }

    // ── Internal ─────────────────────────────────────────────────

    fn broadcast_next(&self, stats: &mut ServiceStats) {
        if self.server.connection_count() == 0 {
            return;
        }
        let payload = match self.source.next_payload(stats.broadcasts) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("payload source failed: {e}");
                return;
            }
        };
        match self.server.broadcast(&payload) {
            Ok(queued) => {
                stats.broadcasts += 1;
                debug!(len = payload.len(), queued, "broadcast");
            }
            Err(e) => warn!(len = payload.len(), "broadcast failed: {e}"),
        }
    }

    fn handle(&self, event: Event, stats: &mut ServiceStats) {
        match event {
            Event::Connected(id) => {
                stats.connects += 1;
                info!(%id, clients = self.server.connection_count(), "client joined");
            }
            Event::Disconnected(id) => {
                stats.disconnects += 1;
                info!(%id, clients = self.server.connection_count(), "client left");
            }
            Event::Received(id, payload) => self.relay(id, &payload, stats),
        }
    }

    fn relay(&self, from: ConnectionId, payload: &Bytes, stats: &mut ServiceStats) {
        debug!(%from, len = payload.len(), "payload from client");
        if !self.config.network.relay || self.server.is_stopped() {
            return;
        }
        match self.server.broadcast_except(from, payload) {
            Ok(queued) => {
                stats.relayed += 1;
                debug!(%from, queued, "relayed");
            }
            Err(e) => warn!(%from, "relay failed: {e}"),
        }
    }
}

/// Resolves on the next tick, or never when timed broadcasts are off.
async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use wirecast_core::Client;

    fn test_config() -> ServerConfig {
        let mut cfg = ServerConfig::default();
        cfg.network.port = 0;
        cfg.network.broadcast_interval_ms = 20;
        cfg.payload.pattern_size = 16;
        cfg.transport.bind_address = Ipv4Addr::LOCALHOST.into();
        cfg
    }

    async fn next_payload(events: &mut EventStream) -> Bytes {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timeout")
                .expect("stream closed");
            if let Event::Received(_, payload) = event {
                return payload;
            }
        }
    }

    #[test]
    fn pattern_changes_per_tick() {
        let source = PayloadSource::Pattern { size: 4 };
        assert_eq!(&source.next_payload(0).unwrap()[..], &[0, 1, 2, 3]);
        assert_eq!(&source.next_payload(1).unwrap()[..], &[1, 2, 3, 4]);
        assert_eq!(&source.next_payload(255).unwrap()[..], &[255, 0, 1, 2]);
    }

    #[test]
    fn file_source_rereads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.bin");
        std::fs::write(&path, b"one").unwrap();
        let source = PayloadSource::File(path.clone());
        assert_eq!(&source.next_payload(0).unwrap()[..], b"one");
        std::fs::write(&path, b"two").unwrap();
        assert_eq!(&source.next_payload(1).unwrap()[..], b"two");
    }

    #[test]
    fn source_from_config() {
        let mut cfg = ServerConfig::default();
        assert!(matches!(
            PayloadSource::from_config(&cfg),
            PayloadSource::Pattern { size } if size == 64 * 1024
        ));
        cfg.payload.file = "frame.bin".into();
        assert!(matches!(PayloadSource::from_config(&cfg), PayloadSource::File(_)));
    }

    #[tokio::test]
    async fn broadcasts_and_relays() {
        let service = BroadcastService::bind(test_config()).await.unwrap();
        let port = service.local_addr().port();
        let stop = service.stop_handle();
        let running = tokio::spawn(service.run());

        let transport = test_config().transport;
        let (a, mut a_events) = Client::connect("127.0.0.1", port, transport.clone())
            .await
            .unwrap();
        let (_b, mut b_events) = Client::connect("127.0.0.1", port, transport).await.unwrap();

        // Timed broadcast reaches both.
        assert_eq!(next_payload(&mut a_events).await.len(), 16);
        assert_eq!(next_payload(&mut b_events).await.len(), 16);

        // A relayed payload reaches the other client only.
        a.send(b"relay me").unwrap();
        loop {
            let payload = next_payload(&mut b_events).await;
            if &payload[..] == b"relay me" {
                break;
            }
        }

        stop.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("service did not stop")
            .unwrap();
        assert_eq!(stats.connects, 2);
        assert_eq!(stats.disconnects, 2);
        assert!(stats.relayed >= 1);
        assert!(stats.broadcasts >= 1);
    }
}
