//! Connection lifecycle state machine.
//!
//! Models the lifecycle of one wirecast connection with validated
//! transitions that return `Result` instead of panicking.

use std::time::Instant;

use crate::error::WireError;

// ── ConnectionState ──────────────────────────────────────────────

/// The current phase of a connection.
///
/// ```text
///  Connecting ──► Open ──► Closing ──► Closed
///       │                     ▲
///       └─────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// TCP connect in progress (client) or accepted but not yet announced.
    #[default]
    Connecting,

    /// Socket is live; frames flow in both directions.
    Open {
        /// When the connection entered the `Open` state.
        since: Instant,
    },

    /// Local stop, peer close, or I/O fault observed; awaiting sweep.
    Closing,

    /// Socket closed and resources released. Terminal.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open { .. } => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Closing)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// How long the connection has been open. `None` in any other state.
    pub fn open_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Open { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Open`.
    ///
    /// Valid from: `Connecting`.
    pub fn open(&mut self) -> Result<(), WireError> {
        match self {
            Self::Connecting => {
                *self = Self::Open {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(WireError::InvalidTransition(
                "cannot open: not in Connecting state",
            )),
        }
    }

    /// Transition to `Closing`.
    ///
    /// Valid from: `Connecting`, `Open`. Returns `Ok(false)` when the
    /// connection is already closing, so repeated close requests are
    /// harmless.
    pub fn begin_close(&mut self) -> Result<bool, WireError> {
        match self {
            Self::Connecting | Self::Open { .. } => {
                *self = Self::Closing;
                Ok(true)
            }
            Self::Closing => Ok(false),
            Self::Closed => Err(WireError::InvalidTransition(
                "cannot close: connection already Closed",
            )),
        }
    }

    /// Transition to `Closed`.
    ///
    /// Valid from: `Closing`.
    pub fn finish_close(&mut self) -> Result<(), WireError> {
        match self {
            Self::Closing => {
                *self = Self::Closed;
                Ok(())
            }
            _ => Err(WireError::InvalidTransition(
                "cannot finish close: not in Closing state",
            )),
        }
    }

    /// Force the connection into `Closing` regardless of current state,
    /// unless it is already `Closed`.
    ///
    /// Used for I/O failures observed mid-stream.
    pub fn force_close(&mut self) {
        if !self.is_closed() {
            *self = Self::Closing;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
