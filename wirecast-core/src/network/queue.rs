//! Per-connection outbound frame queue.
//!
//! Strict FIFO: frames leave in the order they were enqueued. The queue
//! is bounded by frame count and by pending bytes; once either bound is
//! reached further enqueues fail with [`WireError::QueueFull`] until the
//! reactor drains something.

use std::collections::VecDeque;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::WireError;

// ── QueueLimits ──────────────────────────────────────────────────

/// Backpressure bounds for one connection's send queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueLimits {
    /// Maximum number of frames waiting to be written.
    pub max_frames: usize,
    /// Maximum number of encoded bytes waiting to be written.
    pub max_bytes: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_frames: 1024,
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

// ── SendQueue ────────────────────────────────────────────────────

/// FIFO of encoded frames awaiting a writable socket.
#[derive(Debug)]
pub struct SendQueue {
    frames: VecDeque<Bytes>,
    pending_bytes: usize,
    limits: QueueLimits,
}

impl SendQueue {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            frames: VecDeque::new(),
            pending_bytes: 0,
            limits,
        }
    }

    /// Append an encoded frame.
    ///
    /// Fails with `QueueFull` if the queue has already reached either
    /// bound. A single frame larger than `max_bytes` is accepted into an
    /// empty queue, otherwise it could never be sent.
    pub fn enqueue(&mut self, frame: Bytes) -> Result<(), WireError> {
        if self.is_full() {
            return Err(WireError::QueueFull {
                frames: self.frames.len(),
                bytes: self.pending_bytes,
            });
        }
        self.pending_bytes += frame.len();
        self.frames.push_back(frame);
        Ok(())
    }

    /// Pop the oldest frame, but only if the socket is writable.
    pub fn dequeue_if_ready(&mut self, writable: bool) -> Option<Bytes> {
        if !writable {
            return None;
        }
        let frame = self.frames.pop_front()?;
        self.pending_bytes -= frame.len();
        Some(frame)
    }

    /// Drop everything still queued, returning how many frames were lost.
    pub fn clear(&mut self) -> usize {
        let dropped = self.frames.len();
        self.frames.clear();
        self.pending_bytes = 0;
        dropped
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.limits.max_frames || self.pending_bytes >= self.limits.max_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub fn limits(&self) -> QueueLimits {
        self.limits
    }
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new(QueueLimits::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8, len: usize) -> Bytes {
        Bytes::from(vec![tag; len])
    }

    #[test]
    fn fifo_order() {
        let mut q = SendQueue::default();
        q.enqueue(frame(b'a', 1)).unwrap();
        q.enqueue(frame(b'b', 1)).unwrap();
        q.enqueue(frame(b'c', 1)).unwrap();

        assert_eq!(q.dequeue_if_ready(true).unwrap()[0], b'a');
        assert_eq!(q.dequeue_if_ready(true).unwrap()[0], b'b');
        assert_eq!(q.dequeue_if_ready(true).unwrap()[0], b'c');
        assert!(q.dequeue_if_ready(true).is_none());
    }

    #[test]
    fn not_writable_leaves_queue_untouched() {
        let mut q = SendQueue::default();
        q.enqueue(frame(1, 10)).unwrap();
        assert!(q.dequeue_if_ready(false).is_none());
        assert_eq!(q.len(), 1);
        assert_eq!(q.pending_bytes(), 10);
    }

    #[test]
    fn frame_count_bound() {
        let mut q = SendQueue::new(QueueLimits {
            max_frames: 2,
            max_bytes: usize::MAX,
        });
        q.enqueue(frame(1, 4)).unwrap();
        q.enqueue(frame(2, 4)).unwrap();

        let err = q.enqueue(frame(3, 4)).unwrap_err();
        assert!(matches!(err, WireError::QueueFull { frames: 2, bytes: 8 }));

        // Draining one frame frees a slot.
        assert!(q.dequeue_if_ready(true).is_some());
        q.enqueue(frame(3, 4)).unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn byte_bound() {
        let mut q = SendQueue::new(QueueLimits {
            max_frames: 100,
            max_bytes: 10,
        });
        q.enqueue(frame(1, 6)).unwrap();
        q.enqueue(frame(2, 6)).unwrap(); // 12 >= 10 now
        assert!(q.is_full());
        assert!(q.enqueue(frame(3, 1)).is_err());

        q.dequeue_if_ready(true);
        assert_eq!(q.pending_bytes(), 6);
        q.enqueue(frame(3, 1)).unwrap();
    }

    #[test]
    fn oversized_frame_accepted_when_empty() {
        let mut q = SendQueue::new(QueueLimits {
            max_frames: 4,
            max_bytes: 8,
        });
        q.enqueue(frame(1, 100)).unwrap();
        assert!(q.is_full());
    }

    #[test]
    fn clear_reports_dropped() {
        let mut q = SendQueue::default();
        q.enqueue(frame(1, 3)).unwrap();
        q.enqueue(frame(2, 3)).unwrap();
        assert_eq!(q.clear(), 2);
        assert!(q.is_empty());
        assert_eq!(q.pending_bytes(), 0);
    }
}
