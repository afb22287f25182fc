//! The readiness loop.
//!
//! One reactor runs per server or client, on its own task. Each pass:
//!
//! 1. adopts connections handed over by the accept loop,
//! 2. registers read interest on every connection and write interest on
//!    those with pending output, then waits for the first readiness, new
//!    work, cancellation, or the poll interval,
//! 3. reads and decodes frames, raising `Received` per frame,
//! 4. writes at most one frame per writable connection,
//! 5. closes faulted or closing connections, raising `Disconnected`.
//!
//! A fault on one connection only ever closes that connection.
//!
//! Every wait on a slow event consumer is raced against cancellation.
//! After stop, `Received` events are only queued if there is room, and the
//! final `Disconnected` events share a single lifecycle deadline.

use std::collections::HashMap;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::TransportConfig;
use crate::event::{Event, EventSink};
use crate::network::connection::{
    CloseReason, Connection, ConnectionId, Readiness, WriteOutcome,
};
use crate::network::registry::Registry;

/// Which host the reactor serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Many connections, fed by an accept loop; runs until cancelled.
    Server,
    /// One connection; exits once it is gone.
    Client,
}

pub(crate) struct Reactor {
    mode: Mode,
    registry: Arc<Registry>,
    sink: EventSink,
    incoming: Option<mpsc::Receiver<Connection>>,
    connections: HashMap<ConnectionId, Connection>,
    cancel: CancellationToken,
    poll_interval: Duration,
    read_chunk: usize,
    lifecycle_timeout: Duration,
    /// Lifecycle events whose delivery was interrupted by cancellation.
    deferred: Vec<Event>,
}

impl Reactor {
    /// Reactor fed by an accept loop through `incoming`.
    pub(crate) fn server(
        registry: Arc<Registry>,
        sink: EventSink,
        incoming: mpsc::Receiver<Connection>,
        cancel: CancellationToken,
        config: &TransportConfig,
    ) -> Self {
        Self::new(Mode::Server, registry, sink, Some(incoming), cancel, config)
    }

    /// Reactor owning a single, already open connection.
    pub(crate) fn client(
        registry: Arc<Registry>,
        sink: EventSink,
        connection: Connection,
        cancel: CancellationToken,
        config: &TransportConfig,
    ) -> Self {
        let mut reactor = Self::new(Mode::Client, registry, sink, None, cancel, config);
        reactor.connections.insert(connection.id(), connection);
        reactor
    }

    fn new(
        mode: Mode,
        registry: Arc<Registry>,
        sink: EventSink,
        incoming: Option<mpsc::Receiver<Connection>>,
        cancel: CancellationToken,
        config: &TransportConfig,
    ) -> Self {
        Self {
            mode,
            registry,
            sink,
            incoming,
            connections: HashMap::new(),
            cancel,
            poll_interval: config.poll_interval(),
            read_chunk: config.read_chunk,
            lifecycle_timeout: config.lifecycle_timeout(),
            deferred: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(mode = ?self.mode, "reactor started");

        loop {
            self.adopt_incoming();
            if self.mode == Mode::Client && self.connections.is_empty() {
                break;
            }

            let ready = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                ready = wait_ready(&self.connections) => ready,
                _ = self.registry.work_notified() => Vec::new(),
                _ = tokio::time::sleep(self.poll_interval) => Vec::new(),
            };

            for (id, readiness) in ready {
                let Some(conn) = self.connections.get_mut(&id) else {
                    continue;
                };

                if let Some(e) = readiness.error {
                    warn!(%id, "socket error: {e}");
                    conn.state_mut().force_close();
                    continue;
                }

                if readiness.read {
                    let outcome = conn.read_ready(self.read_chunk);
                    for frame in outcome.frames {
                        trace!(%id, len = frame.len(), "frame received");
                        let event = Event::Received(id, frame);
                        if let Some(event) = self.sink.emit_unless(event, &self.cancel).await {
                            self.sink.offer(event);
                        }
                    }
                    match outcome.close {
                        None => {}
                        Some(CloseReason::PeerClosed) => {
                            debug!(%id, "peer closed the stream");
                            conn.state_mut().force_close();
                        }
                        Some(CloseReason::Fault(e)) => {
                            warn!(%id, "read failed: {e}");
                            conn.state_mut().force_close();
                        }
                    }
                }

                if readiness.write && conn.state().is_open() {
                    match conn.write_ready() {
                        Ok(WriteOutcome::Partial) => trace!(%id, "short write; remainder kept"),
                        Ok(WriteOutcome::Sent | WriteOutcome::Idle | WriteOutcome::Blocked) => {}
                        Err(e) => {
                            warn!(%id, "write failed: {e}");
                            conn.state_mut().force_close();
                        }
                    }
                }
            }

            for conn in self.connections.values_mut() {
                if conn.close_requested() && conn.state().is_open() {
                    debug!(id = %conn.id(), "local close requested");
                    if let Err(e) = conn.state_mut().begin_close() {
                        warn!(id = %conn.id(), "close request ignored: {e}");
                    }
                }
            }

            for id in self.sweep() {
                let event = Event::Disconnected(id);
                if let Some(event) = self.sink.emit_unless(event, &self.cancel).await {
                    self.deferred.push(event);
                }
            }
        }

        self.shutdown().await;
        debug!(mode = ?self.mode, "reactor stopped");
    }

    /// Move connections handed over by the accept loop into the arena.
    fn adopt_incoming(&mut self) {
        let Some(incoming) = self.incoming.as_mut() else {
            return;
        };
        while let Ok(conn) = incoming.try_recv() {
            trace!(id = %conn.id(), "connection adopted");
            self.connections.insert(conn.id(), conn);
        }
    }

    /// Close every connection in `Closing`: unregister it and release the
    /// socket. Returns the closed ids, each of which is reported exactly once
    /// by the caller.
    fn sweep(&mut self) -> Vec<ConnectionId> {
        let closing: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|conn| conn.state().is_closing())
            .map(Connection::id)
            .collect();

        let mut closed = Vec::with_capacity(closing.len());
        for id in closing {
            let Some(conn) = self.connections.remove(&id) else {
                continue;
            };
            self.registry.remove(id);
            let peer = conn.peer_addr();
            let unsent = conn.close();
            info!(%id, %peer, unsent, "connection closed");
            closed.push(id);
        }
        closed
    }

    async fn shutdown(&mut self) {
        if let Some(incoming) = self.incoming.as_mut() {
            incoming.close();
        }
        self.adopt_incoming();
        for conn in self.connections.values_mut() {
            conn.state_mut().force_close();
        }

        let deadline = Instant::now() + self.lifecycle_timeout;
        let mut pending = std::mem::take(&mut self.deferred);
        pending.extend(self.sweep().into_iter().map(Event::Disconnected));
        for event in pending {
            self.sink.emit_before(event, deadline).await;
        }
    }
}

/// Wait until at least one connection reports readiness.
///
/// Never resolves for an empty set; the caller's timeout covers that.
async fn wait_ready(
    connections: &HashMap<ConnectionId, Connection>,
) -> Vec<(ConnectionId, Readiness)> {
    std::future::poll_fn(|cx| {
        let ready: Vec<_> = connections
            .iter()
            .map(|(id, conn)| (*id, conn.poll_readiness(cx)))
            .filter(|(_, readiness)| !readiness.is_empty())
            .collect();
        if ready.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(ready)
        }
    })
    .await
}
