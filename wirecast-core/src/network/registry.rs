//! Connection registry shared between callers and the reactor.
//!
//! Maps [`ConnectionId`] to the caller-facing [`PeerHandle`]. The lock is
//! held only for the map operation itself; fan-out works on a snapshot
//! so no lock is ever held while a queue is touched or I/O happens.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::WireError;
use crate::network::connection::{ConnectionId, ConnectionInfo, PeerHandle};

/// Live connections plus the wake-up signal for the reactor that owns them.
#[derive(Debug, Default)]
pub struct Registry {
    peers: Mutex<HashMap<ConnectionId, Arc<PeerHandle>>>,
    work: Notify,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, peer: Arc<PeerHandle>) {
        self.peers.lock().insert(peer.id(), peer);
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<PeerHandle>> {
        self.peers.lock().remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<PeerHandle>> {
        self.peers.lock().get(&id).cloned()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.peers.lock().contains_key(&id)
    }

    /// Copy of the current handles, taken under the lock and used without it.
    pub fn snapshot(&self) -> Vec<Arc<PeerHandle>> {
        self.peers.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    pub fn infos(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<_> = self.snapshot().iter().map(|p| p.info()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    // ── Send routing ─────────────────────────────────────────────

    /// Queue an encoded frame on one connection and wake the reactor.
    pub fn enqueue(&self, id: ConnectionId, frame: Bytes) -> Result<(), WireError> {
        let peer = self.get(id).ok_or(WireError::NotConnected(id))?;
        peer.enqueue(frame)?;
        self.work.notify_one();
        Ok(())
    }

    /// Queue the same encoded frame on every connection except `excluded`.
    ///
    /// Connections whose queue is full are skipped and logged. Returns the
    /// number of connections the frame was queued on.
    pub fn fan_out(&self, frame: &Bytes, excluded: Option<ConnectionId>) -> usize {
        let mut queued = 0;
        for peer in self.snapshot() {
            if Some(peer.id()) == excluded {
                continue;
            }
            match peer.enqueue(frame.clone()) {
                Ok(()) => queued += 1,
                Err(e) => warn!(id = %peer.id(), "broadcast skipped: {e}"),
            }
        }
        if queued > 0 {
            self.work.notify_one();
        }
        debug!(len = frame.len(), queued, "fan-out");
        queued
    }

    /// Ask the reactor to close one connection.
    pub fn request_close(&self, id: ConnectionId) -> Result<(), WireError> {
        let peer = self.get(id).ok_or(WireError::NotConnected(id))?;
        peer.request_close();
        self.work.notify_one();
        Ok(())
    }

    /// Wake the reactor without queuing anything.
    pub fn notify_work(&self) {
        self.work.notify_one();
    }

    /// Resolves once new work was signalled since the last call.
    pub async fn work_notified(&self) {
        self.work.notified().await
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::network::connection::{Connection, Role};
    use crate::network::queue::QueueLimits;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};

    /// Accepted connections plus the client sockets that keep them alive.
    async fn connections(n: usize, config: &TransportConfig) -> Vec<(Connection, TcpStream)> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut out = Vec::new();
        for _ in 0..n {
            let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
            let conn = Connection::new(accepted.unwrap().0, Role::Inbound, config).unwrap();
            out.push((conn, client.unwrap()));
        }
        out
    }

    #[tokio::test]
    async fn add_get_remove() {
        let registry = Registry::new();
        let conns = connections(2, &TransportConfig::default()).await;
        for (conn, _) in &conns {
            registry.add(conn.handle());
        }
        assert_eq!(registry.len(), 2);

        let id = conns[0].0.id();
        assert!(registry.contains(id));
        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
        assert!(registry.remove(id).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn enqueue_unknown_id_is_not_connected() {
        let registry = Registry::new();
        let id = ConnectionId::from_raw(u64::MAX);
        let err = registry.enqueue(id, Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, WireError::NotConnected(e) if e == id));
    }

    #[tokio::test]
    async fn fan_out_skips_excluded_and_shares_bytes() {
        let registry = Registry::new();
        let conns = connections(3, &TransportConfig::default()).await;
        for (conn, _) in &conns {
            registry.add(conn.handle());
        }

        let frame = Bytes::from(vec![7u8; 32]);
        let excluded = conns[1].0.id();
        assert_eq!(registry.fan_out(&frame, Some(excluded)), 2);

        let infos = registry.infos();
        for info in infos {
            let expected = if info.id == excluded { 0 } else { 1 };
            assert_eq!(info.pending_frames, expected);
        }
    }

    #[tokio::test]
    async fn fan_out_skips_full_queues() {
        let config = TransportConfig {
            queue: QueueLimits {
                max_frames: 1,
                max_bytes: usize::MAX,
            },
            ..TransportConfig::default()
        };
        let registry = Registry::new();
        let conns = connections(2, &config).await;
        for (conn, _) in &conns {
            registry.add(conn.handle());
        }
        registry
            .enqueue(conns[0].0.id(), Bytes::from_static(b"x"))
            .unwrap();

        assert_eq!(registry.fan_out(&Bytes::from_static(b"y"), None), 1);
    }

    #[tokio::test]
    async fn enqueue_wakes_waiter() {
        let registry = Arc::new(Registry::new());
        let conns = connections(1, &TransportConfig::default()).await;
        registry.add(conns[0].0.handle());

        let waiter = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.work_notified().await }
        });
        registry
            .enqueue(conns[0].0.id(), Bytes::from_static(b"x"))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("reactor was not woken")
            .unwrap();
    }

    #[tokio::test]
    async fn request_close_sets_flag() {
        let registry = Registry::new();
        let conns = connections(1, &TransportConfig::default()).await;
        let handle = conns[0].0.handle();
        registry.add(Arc::clone(&handle));

        registry.request_close(handle.id()).unwrap();
        assert!(handle.close_requested());
        assert!(
            registry
                .request_close(ConnectionId::from_raw(u64::MAX))
                .is_err()
        );
    }
}
