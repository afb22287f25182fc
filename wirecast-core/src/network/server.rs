//! Listening side: accept loop plus reactor.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{FrameCodec, encode_object};
use crate::config::TransportConfig;
use crate::error::WireError;
use crate::event::{self, Event, EventSink, EventStream};
use crate::network::connection::{Connection, ConnectionId, ConnectionInfo, Role};
use crate::network::reactor::Reactor;
use crate::network::registry::Registry;

/// Connections accepted but not yet adopted by the reactor.
const HANDOFF_CAPACITY: usize = 64;

/// A listening server.
///
/// Dropping the handle stops both loops, like [`stop`](Self::stop).
#[derive(Debug)]
pub struct Server {
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    codec: FrameCodec,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Bind `config.bind_address:port` and start accepting.
    ///
    /// Port 0 picks an ephemeral port; see [`local_addr`](Self::local_addr).
    pub async fn listen(
        port: u16,
        config: TransportConfig,
    ) -> Result<(Self, EventStream), WireError> {
        Self::bind(SocketAddr::new(config.bind_address, port), config).await
    }

    /// Bind an explicit address and start accepting.
    pub async fn bind(
        addr: SocketAddr,
        config: TransportConfig,
    ) -> Result<(Self, EventStream), WireError> {
        config.validate()?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| WireError::BindFailed { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| WireError::BindFailed { addr, source })?;
        info!(%local_addr, "listening");

        let (sink, events) = event::channel(
            config.event_capacity,
            config.overflow,
            config.lifecycle_timeout(),
        );
        let registry = Arc::new(Registry::new());
        let cancel = CancellationToken::new();
        let (handoff_tx, handoff_rx) = mpsc::channel(HANDOFF_CAPACITY);

        let reactor = Reactor::server(
            Arc::clone(&registry),
            sink.clone(),
            handoff_rx,
            cancel.clone(),
            &config,
        );
        let accept = AcceptLoop {
            listener,
            registry: Arc::clone(&registry),
            sink,
            handoff: handoff_tx,
            cancel: cancel.clone(),
            config: config.clone(),
        };

        let tasks = vec![tokio::spawn(reactor.run()), tokio::spawn(accept.run())];

        Ok((
            Self {
                local_addr,
                registry,
                codec: config.codec(),
                cancel,
                tasks: Mutex::new(tasks),
            },
            events,
        ))
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    // ── Sending ──────────────────────────────────────────────────

    /// Queue `payload` for one connection.
    pub fn send(&self, id: ConnectionId, payload: impl AsRef<[u8]>) -> Result<(), WireError> {
        let frame = self.codec.encode_payload(payload.as_ref())?;
        self.registry.enqueue(id, frame)
    }

    /// Queue `payload` for every connection. Encodes once.
    ///
    /// Returns how many connections accepted the frame; peers whose queue
    /// is full are skipped.
    pub fn broadcast(&self, payload: impl AsRef<[u8]>) -> Result<usize, WireError> {
        let frame = self.codec.encode_payload(payload.as_ref())?;
        Ok(self.registry.fan_out(&frame, None))
    }

    /// Queue `payload` for every connection except `excluded`.
    pub fn broadcast_except(
        &self,
        excluded: ConnectionId,
        payload: impl AsRef<[u8]>,
    ) -> Result<usize, WireError> {
        let frame = self.codec.encode_payload(payload.as_ref())?;
        Ok(self.registry.fan_out(&frame, Some(excluded)))
    }

    /// Serialize `value` with bincode and send it to one connection.
    pub fn send_object<T: Serialize>(&self, id: ConnectionId, value: &T) -> Result<(), WireError> {
        self.send(id, encode_object(value)?)
    }

    /// Serialize `value` once and broadcast it.
    pub fn broadcast_object<T: Serialize>(&self, value: &T) -> Result<usize, WireError> {
        self.broadcast(encode_object(value)?)
    }

    /// Serialize `value` once and broadcast it to all but `excluded`.
    pub fn broadcast_object_except<T: Serialize>(
        &self,
        excluded: ConnectionId,
        value: &T,
    ) -> Result<usize, WireError> {
        self.broadcast_except(excluded, encode_object(value)?)
    }

    // ── Connections ──────────────────────────────────────────────

    /// Close one connection. Its `Disconnected` event follows shortly.
    pub fn disconnect(&self, id: ConnectionId) -> Result<(), WireError> {
        self.registry.request_close(id)
    }

    pub fn is_connected(&self, id: ConnectionId) -> bool {
        self.registry.contains(id)
    }

    /// Every live connection, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.registry.infos()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Signal both loops to stop. Idempotent and non-blocking; the loops
    /// exit within one poll interval, closing every connection.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!(local_addr = %self.local_addr, "stopping server");
        }
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop and wait until both loops have exited and every
    /// `Disconnected` event has been queued.
    pub async fn shutdown(&self) {
        self.stop();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("server task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── AcceptLoop ───────────────────────────────────────────────────

struct AcceptLoop {
    listener: TcpListener,
    registry: Arc<Registry>,
    sink: EventSink,
    handoff: mpsc::Sender<Connection>,
    cancel: CancellationToken,
    config: TransportConfig,
}

impl AcceptLoop {
    async fn run(self) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.listener.accept() => result,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if !self.admit(stream, peer).await {
                        break;
                    }
                }
                Err(e) => {
                    // Usually fd exhaustion; back off one poll interval.
                    warn!("accept failed: {e}");
                    tokio::time::sleep(self.config.poll_interval()).await;
                }
            }
        }
        debug!("accept loop stopped");
        // Dropping the listener releases the port.
    }

    /// Open, register, announce, then hand the connection to the reactor.
    ///
    /// Returns `false` once the reactor is gone or stop was requested.
    async fn admit(&self, stream: TcpStream, peer: SocketAddr) -> bool {
        let mut conn = match Connection::new(stream, Role::Inbound, &self.config) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(%peer, "dropping accepted socket: {e}");
                return true;
            }
        };
        if let Err(e) = conn.state_mut().open() {
            warn!(%peer, "dropping accepted socket: {e}");
            return true;
        }

        let id = conn.id();
        self.registry.add(conn.handle());
        info!(%id, %peer, "peer connected");
        if self
            .sink
            .emit_unless(Event::Connected(id), &self.cancel)
            .await
            .is_some()
        {
            // Stopped before anyone heard of it: nothing to report.
            self.registry.remove(id);
            conn.close();
            debug!(%id, %peer, "connection dropped during stop");
            return false;
        }

        match self.handoff.send(conn).await {
            Ok(()) => {
                self.registry.notify_work();
                true
            }
            Err(mpsc::error::SendError(conn)) => {
                self.registry.remove(id);
                conn.close();
                info!(%id, %peer, "connection closed");
                self.sink.emit(Event::Disconnected(id)).await;
                false
            }
        }
    }
}
