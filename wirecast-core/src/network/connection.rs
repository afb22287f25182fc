use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio_util::codec::Decoder;

use crate::codec::FrameCodec;
use crate::config::TransportConfig;
use crate::error::WireError;
use crate::network::queue::{QueueLimits, SendQueue};
use crate::state::ConnectionState;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// ── ConnectionId ─────────────────────────────────────────────────

/// Process-local handle for one connection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Rebuild an id from its raw value (e.g. one a host stored earlier).
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side opened the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted by a server.
    Inbound,
    /// Connected by a client.
    Outbound,
}

/// Snapshot of a connection for callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub role: Role,
    pub pending_frames: usize,
    pub pending_bytes: usize,
}

// ── PeerHandle ───────────────────────────────────────────────────

/// The part of a connection callers may touch: its send queue and a
/// close request flag. Everything else belongs to the reactor.
#[derive(Debug)]
pub struct PeerHandle {
    id: ConnectionId,
    peer_addr: SocketAddr,
    role: Role,
    queue: Mutex<SendQueue>,
    close_requested: AtomicBool,
}

impl PeerHandle {
    fn new(id: ConnectionId, peer_addr: SocketAddr, role: Role, limits: QueueLimits) -> Self {
        Self {
            id,
            peer_addr,
            role,
            queue: Mutex::new(SendQueue::new(limits)),
            close_requested: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queue an already-encoded frame. The lock is held only for the push.
    pub fn enqueue(&self, frame: Bytes) -> Result<(), WireError> {
        self.queue.lock().enqueue(frame)
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    pub fn info(&self) -> ConnectionInfo {
        let queue = self.queue.lock();
        ConnectionInfo {
            id: self.id,
            peer_addr: self.peer_addr,
            role: self.role,
            pending_frames: queue.len(),
            pending_bytes: queue.pending_bytes(),
        }
    }

    /// Ask the reactor to close this connection on its next pass.
    pub fn request_close(&self) {
        self.close_requested.store(true, Ordering::Release);
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    fn next_frame(&self) -> Option<Bytes> {
        self.queue.lock().dequeue_if_ready(true)
    }

    fn discard_pending(&self) -> usize {
        self.queue.lock().clear()
    }
}

// ── Connection ───────────────────────────────────────────────────

/// Readiness reported for one connection in one reactor pass.
#[derive(Debug, Default)]
pub(crate) struct Readiness {
    pub read: bool,
    pub write: bool,
    pub error: Option<io::Error>,
}

impl Readiness {
    pub fn is_empty(&self) -> bool {
        !self.read && !self.write && self.error.is_none()
    }
}

/// Why a read pass ended the connection.
#[derive(Debug)]
pub(crate) enum CloseReason {
    PeerClosed,
    Fault(WireError),
}

/// Result of draining a readable socket.
#[derive(Debug, Default)]
pub(crate) struct ReadOutcome {
    pub frames: Vec<Bytes>,
    pub close: Option<CloseReason>,
}

/// Result of one write attempt.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// Nothing was queued.
    Idle,
    /// A whole frame reached the kernel.
    Sent,
    /// Part of the frame was written; the rest waits for the next
    /// writable readiness.
    Partial,
    /// The socket was not actually writable.
    Blocked,
}

/// One live socket, owned by exactly one reactor.
#[derive(Debug)]
pub struct Connection {
    shared: Arc<PeerHandle>,
    stream: TcpStream,
    state: ConnectionState,
    read_buf: BytesMut,
    codec: FrameCodec,
    in_flight: Option<Bytes>,
}

impl Connection {
    /// Wrap a connected stream. The connection starts in `Connecting`;
    /// the owner opens it once it is announced.
    ///
    /// Fails if the socket was reset before it could be configured.
    pub fn new(stream: TcpStream, role: Role, config: &TransportConfig) -> io::Result<Self> {
        if config.nodelay {
            stream.set_nodelay(true)?;
        }
        let peer_addr = stream.peer_addr()?;
        let shared = PeerHandle::new(ConnectionId::next(), peer_addr, role, config.queue);

        Ok(Self {
            shared: Arc::new(shared),
            stream,
            state: ConnectionState::Connecting,
            read_buf: BytesMut::with_capacity(config.read_chunk),
            codec: config.codec(),
            in_flight: None,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer_addr
    }

    /// The caller-facing half, for the registry.
    pub fn handle(&self) -> Arc<PeerHandle> {
        Arc::clone(&self.shared)
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ConnectionState {
        &mut self.state
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.shared.close_requested()
    }

    /// Whether write interest should be registered this pass.
    pub(crate) fn wants_write(&self) -> bool {
        self.in_flight.is_some() || self.shared.has_pending()
    }

    /// Register interest with the I/O driver and report what is ready.
    ///
    /// Read interest is always registered; write interest only while
    /// output is pending.
    pub(crate) fn poll_readiness(&self, cx: &mut Context<'_>) -> Readiness {
        let mut readiness = Readiness::default();

        match self.stream.poll_read_ready(cx) {
            Poll::Ready(Ok(())) => readiness.read = true,
            Poll::Ready(Err(e)) => readiness.error = Some(e),
            Poll::Pending => {}
        }

        if self.wants_write() {
            match self.stream.poll_write_ready(cx) {
                Poll::Ready(Ok(())) => readiness.write = true,
                Poll::Ready(Err(e)) => {
                    readiness.error.get_or_insert(e);
                }
                Poll::Pending => {}
            }
        }

        readiness
    }

    /// Drain up to `budget` bytes from the socket and extract every
    /// complete frame now in the read buffer.
    ///
    /// Frames decoded before a fault are still returned.
    pub(crate) fn read_ready(&mut self, budget: usize) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        let mut total = 0usize;

        loop {
            self.read_buf.reserve(budget.max(1));
            match self.stream.try_read_buf(&mut self.read_buf) {
                Ok(0) => {
                    outcome.close = Some(CloseReason::PeerClosed);
                    break;
                }
                Ok(n) => {
                    total += n;
                    if total >= budget {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    outcome.close = Some(CloseReason::Fault(e.into()));
                    break;
                }
            }
        }

        loop {
            match self.codec.decode(&mut self.read_buf) {
                Ok(Some(frame)) => outcome.frames.push(frame),
                Ok(None) => break,
                Err(e) => {
                    outcome.close = Some(CloseReason::Fault(e));
                    break;
                }
            }
        }

        outcome
    }

    /// Write (part of) one frame without blocking.
    ///
    /// A short write keeps the remainder in flight; it is retried before
    /// any newer frame is taken from the queue.
    pub(crate) fn write_ready(&mut self) -> io::Result<WriteOutcome> {
        if self.in_flight.is_none() {
            self.in_flight = self.shared.next_frame();
        }
        let Some(frame) = self.in_flight.as_mut() else {
            return Ok(WriteOutcome::Idle);
        };

        match self.stream.try_write(frame) {
            Ok(0) => Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                frame.advance(n);
                if frame.is_empty() {
                    self.in_flight = None;
                    Ok(WriteOutcome::Sent)
                } else {
                    Ok(WriteOutcome::Partial)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(WriteOutcome::Blocked),
            Err(e) => Err(e),
        }
    }

    /// Close the socket and release queued output.
    ///
    /// Returns how many frames were still unsent.
    pub(crate) fn close(mut self) -> usize {
        self.state.force_close();
        let mut dropped = self.shared.discard_pending();
        if self.in_flight.take().is_some() {
            dropped += 1;
        }
        if let Err(e) = self.state.finish_close() {
            tracing::debug!(id = %self.id(), "close: {e}");
        }
        // Dropping the stream closes the socket.
        drop(self.stream);
        dropped
    }
}

// ── Tests ────────────────────────────────────────────────────────
