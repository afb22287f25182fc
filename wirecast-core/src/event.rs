//! Event delivery from the reactor to the owning context.
//!
//! The reactor never calls user code directly. It pushes [`Event`]s into a
//! bounded channel; the consumer drains the [`EventStream`] on its own
//! schedule, either by awaiting it or by calling
//! [`dispatch`](EventStream::dispatch) from a timer tick.
//!
//! Ordering: one channel carries every event for a server or client, and
//! the reactor emits a connection's events in the order it observed them,
//! so a `Disconnected(id)` is always behind every `Received(id, ..)`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::network::ConnectionId;

// ── Event ────────────────────────────────────────────────────────

/// Notification raised by a server or client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A connection became open.
    Connected(ConnectionId),
    /// A connection was closed. Raised exactly once per id.
    Disconnected(ConnectionId),
    /// One complete payload arrived.
    Received(ConnectionId, Bytes),
}

impl Event {
    /// The connection this event concerns.
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            Self::Connected(id) | Self::Disconnected(id) | Self::Received(id, _) => *id,
        }
    }

    /// Route the event to the matching handler method.
    pub fn deliver<H: EventHandler + ?Sized>(self, handler: &mut H) {
        match self {
            Self::Connected(id) => handler.on_connect(id),
            Self::Disconnected(id) => handler.on_disconnect(id),
            Self::Received(id, payload) => handler.on_receive(id, payload),
        }
    }

    pub(crate) fn is_lifecycle(&self) -> bool {
        !matches!(self, Self::Received(..))
    }
}

// ── EventHandler ─────────────────────────────────────────────────

/// Capability interface implemented by whatever composes the transport.
///
/// Every method defaults to a no-op so consumers only implement what
/// they care about.
pub trait EventHandler {
    fn on_connect(&mut self, _id: ConnectionId) {}

    fn on_disconnect(&mut self, _id: ConnectionId) {}

    fn on_receive(&mut self, _id: ConnectionId, _payload: Bytes) {}
}

// ── OverflowPolicy ───────────────────────────────────────────────

/// What to do with a `Received` event when the consumer is behind.
///
/// `Connected` / `Disconnected` always use block-with-timeout with the
/// lifecycle timeout, regardless of this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the new event immediately.
    DropNewest,
    /// Wait up to `timeout_ms` for room, then discard.
    BlockWithTimeout { timeout_ms: u64 },
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::BlockWithTimeout { timeout_ms: 250 }
    }
}

// ── EventSink ────────────────────────────────────────────────────

/// Producer half, owned by the reactor and accept loops.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Event>,
    policy: OverflowPolicy,
    lifecycle_timeout: Duration,
    dropped: Arc<AtomicU64>,
    consumer_gone: Arc<AtomicBool>,
}

/// Create a bounded sink / stream pair.
pub fn channel(
    capacity: usize,
    policy: OverflowPolicy,
    lifecycle_timeout: Duration,
) -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let sink = EventSink {
        tx,
        policy,
        lifecycle_timeout,
        dropped: Arc::clone(&dropped),
        consumer_gone: Arc::new(AtomicBool::new(false)),
    };
    (sink, EventStream { rx, dropped })
}

impl EventSink {
    /// Hand an event to the consumer according to the overflow policy.
    ///
    /// Never waits longer than the applicable timeout.
    pub async fn emit(&self, event: Event) {
        let deadline = self.wait_for(&event).map(|wait| Instant::now() + wait);
        if let Some(event) = self.deliver(event, deadline, None).await {
            self.offer(event);
        }
    }

    /// Like [`emit`](Self::emit), but stop waiting as soon as `cancel`
    /// fires. The event is handed back undelivered in that case.
    pub async fn emit_unless(&self, event: Event, cancel: &CancellationToken) -> Option<Event> {
        let deadline = self.wait_for(&event).map(|wait| Instant::now() + wait);
        self.deliver(event, deadline, Some(cancel)).await
    }

    /// Wait for room until `deadline` whatever the event kind, then give up.
    pub async fn emit_before(&self, event: Event, deadline: Instant) {
        if let Some(event) = self.deliver(event, Some(deadline), None).await {
            self.offer(event);
        }
    }

    /// Queue the event if there is room right now, otherwise drop it.
    pub fn offer(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => self.record_drop(&event),
            Err(TrySendError::Closed(_)) => self.note_consumer_gone(),
        }
    }

    fn wait_for(&self, event: &Event) -> Option<Duration> {
        if event.is_lifecycle() {
            return Some(self.lifecycle_timeout);
        }
        match self.policy {
            OverflowPolicy::DropNewest => None,
            OverflowPolicy::BlockWithTimeout { timeout_ms } => Some(Duration::from_millis(timeout_ms)),
        }
    }

    /// Returns the event only when `cancel` fired before a slot opened or
    /// no deadline was given.
    async fn deliver(
        &self,
        event: Event,
        deadline: Option<Instant>,
        cancel: Option<&CancellationToken>,
    ) -> Option<Event> {
        let Some(deadline) = deadline else {
            return Some(event);
        };
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Some(event);
        }

        let reserve = tokio::time::timeout_at(deadline, self.tx.reserve());
        let reserved = match cancel {
            Some(cancel) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Some(event),
                reserved = reserve => reserved,
            },
            None => reserve.await,
        };

        match reserved {
            Ok(Ok(permit)) => permit.send(event),
            Ok(Err(_)) => self.note_consumer_gone(),
            Err(_) => self.record_drop(&event),
        }
        None
    }

    /// Number of events discarded because the consumer was too slow.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self, event: &Event) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(id = %event.connection_id(), total, "event consumer lagging; dropped {event:?}");
    }

    fn note_consumer_gone(&self) {
        if !self.consumer_gone.swap(true, Ordering::Relaxed) {
            debug!("event stream dropped; further events are discarded");
        }
    }
}

// ── EventStream ──────────────────────────────────────────────────

/// Consumer half, returned from `listen` / `connect`.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventStream {
    /// Wait for the next event. `None` once the producer side has shut
    /// down and every queued event was consumed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take the next event if one is ready.
    pub fn try_recv(&mut self) -> Option<Event> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Deliver every event that is ready right now, without waiting.
    ///
    /// Returns how many events were delivered.
    pub fn dispatch<H: EventHandler + ?Sized>(&mut self, handler: &mut H) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.try_recv() {
            event.deliver(handler);
            delivered += 1;
        }
        delivered
    }

    /// Deliver events to `handler` until the producer side shuts down.
    pub async fn run<H: EventHandler>(mut self, mut handler: H) -> H {
        while let Some(event) = self.rx.recv().await {
            event.deliver(&mut handler);
        }
        handler
    }

    /// Number of events the producer had to discard.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ── Tests ────────────────────────────────────────────────────────
