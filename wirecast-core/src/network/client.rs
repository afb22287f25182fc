//! Connecting side: one outbound connection driven by its own reactor.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::codec::{FrameCodec, encode_object};
use crate::config::TransportConfig;
use crate::error::WireError;
use crate::event::{self, Event, EventStream};
use crate::network::connection::{Connection, ConnectionId, ConnectionInfo, Role};
use crate::network::reactor::Reactor;
use crate::network::registry::Registry;

/// A connected client.
///
/// The reactor exits on its own once the server closes the stream; the
/// `Disconnected` event is the signal. Dropping the handle stops it too.
#[derive(Debug)]
pub struct Client {
    id: ConnectionId,
    peer_addr: SocketAddr,
    registry: Arc<Registry>,
    codec: FrameCodec,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connect to `address:port` and start the reactor.
    ///
    /// `Connected` is the first event on the returned stream. Refusals,
    /// resolution failures and the connect timeout all surface as
    /// [`WireError::ConnectionFailed`].
    pub async fn connect(
        address: &str,
        port: u16,
        config: TransportConfig,
    ) -> Result<(Self, EventStream), WireError> {
        config.validate()?;

        let target = format!("{address}:{port}");
        let failed = |source: std::io::Error| WireError::ConnectionFailed {
            addr: target.clone(),
            source,
        };

        let stream = match tokio::time::timeout(
            config.connect_timeout(),
            TcpStream::connect((address, port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(failed(e)),
            Err(_) => {
                return Err(failed(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no answer within {} ms", config.connect_timeout_ms),
                )));
            }
        };

        let mut conn = Connection::new(stream, Role::Outbound, &config).map_err(failed)?;
        conn.state_mut().open()?;
        let id = conn.id();
        let peer_addr = conn.peer_addr();

        let (sink, events) = event::channel(
            config.event_capacity,
            config.overflow,
            config.lifecycle_timeout(),
        );
        let registry = Arc::new(Registry::new());
        registry.add(conn.handle());
        info!(%id, %peer_addr, "connected");
        sink.emit(Event::Connected(id)).await;

        let cancel = CancellationToken::new();
        let reactor = Reactor::client(
            Arc::clone(&registry),
            sink,
            conn,
            cancel.clone(),
            &config,
        );
        let task = tokio::spawn(reactor.run());

        Ok((
            Self {
                id,
                peer_addr,
                registry,
                codec: config.codec(),
                cancel,
                task: Mutex::new(Some(task)),
            },
            events,
        ))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether the connection is still registered with the reactor.
    pub fn is_connected(&self) -> bool {
        self.registry.contains(self.id)
    }

    /// Queue depth and addressing, or `None` once disconnected.
    pub fn info(&self) -> Option<ConnectionInfo> {
        self.registry.get(self.id).map(|peer| peer.info())
    }

    /// Queue `payload` for the server.
    pub fn send(&self, payload: impl AsRef<[u8]>) -> Result<(), WireError> {
        let frame = self.codec.encode_payload(payload.as_ref())?;
        self.registry.enqueue(self.id, frame)
    }

    /// Serialize `value` with bincode and send it.
    pub fn send_object<T: Serialize>(&self, value: &T) -> Result<(), WireError> {
        self.send(encode_object(value)?)
    }

    /// Close the connection. Idempotent and non-blocking.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!(id = %self.id, "stopping client");
        }
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop and wait until the reactor has exited and `Disconnected`
    /// has been queued.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("client task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
