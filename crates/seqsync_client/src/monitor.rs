//! Session lifecycle state.

use seqsync_protocol::SequenceNumber;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Live updates are dispatched as they arrive.
    Connected,
    /// Updates are buffered until a resume reply is merged.
    Desynced,
    /// Terminal; only a reload recovers.
    Fatal,
}

impl SessionState {
    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connected => "connected",
            SessionState::Desynced => "desynced",
            SessionState::Fatal => "fatal",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session must be reloaded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalReason {
    /// A forward jump on the live stream.
    #[error("sequence gap: expected {expected}, received {received}")]
    SequenceGap {
        /// Sequence that should have arrived.
        expected: SequenceNumber,
        /// Sequence that did arrive.
        received: SequenceNumber,
    },

    /// An already applied sequence on the live stream.
    #[error("duplicate update {sequence}")]
    DuplicateUpdate {
        /// Repeated sequence.
        sequence: SequenceNumber,
    },

    /// A gap that the resume reply did not fill.
    #[error("replay gap: expected {expected}, received {received}")]
    ReplayGap {
        /// Sequence that should have been replayed.
        expected: SequenceNumber,
        /// Sequence found instead, or the peer's latest sequence if the replay ended early.
        received: SequenceNumber,
    },

    /// The peer rejected or failed to confirm the handshake.
    #[error("handshake rejected")]
    HandshakeRejected,

    /// The transport timed out while connecting.
    #[error("connect timed out")]
    ConnectTimeout,

    /// The transport gave up and asked for a fresh load.
    #[error("reconnect requested")]
    ReconnectRequested,
}

/// Shared flag raised once the session is fatal.
///
/// Cloned into the dispatch queue and any in-flight task so they can
/// short-circuit without going through the session.
#[derive(Debug, Clone, Default)]
pub struct FatalMarker(Arc<AtomicBool>);

impl FatalMarker {
    /// Creates an unset marker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the session is fatal.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Owns the session state and the fatal decision.
#[derive(Debug)]
pub struct SessionMonitor {
    state: SessionState,
    reason: Option<FatalReason>,
    marker: FatalMarker,
}

impl SessionMonitor {
    /// Creates a monitor awaiting its first handshake.
    pub fn new() -> Self {
        Self {
            state: SessionState::Desynced,
            reason: None,
            marker: FatalMarker::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true if the session is fatal.
    pub fn is_fatal(&self) -> bool {
        self.state == SessionState::Fatal
    }

    /// Returns the reason the session became fatal.
    pub fn reason(&self) -> Option<&FatalReason> {
        self.reason.as_ref()
    }

    /// Returns a handle to the fatal marker.
    pub fn marker(&self) -> FatalMarker {
        self.marker.clone()
    }

    /// Moves to DESYNCED. Returns false if nothing changed.
    pub fn desync(&mut self) -> bool {
        match self.state {
            SessionState::Connected => {
                info!("session desynced");
                self.state = SessionState::Desynced;
                true
            }
            SessionState::Desynced | SessionState::Fatal => false,
        }
    }

    /// Moves to CONNECTED after a merged resume reply. Returns false if nothing changed.
    pub fn resynced(&mut self) -> bool {
        match self.state {
            SessionState::Desynced => {
                info!("session resynced");
                self.state = SessionState::Connected;
                true
            }
            SessionState::Connected | SessionState::Fatal => false,
        }
    }

    /// Moves to FATAL.
    ///
    /// Returns the reason on the first escalation only, so the caller
    /// triggers exactly one reload.
    pub fn escalate(&mut self, reason: FatalReason) -> Option<FatalReason> {
        if self.is_fatal() {
            return None;
        }
        error!(%reason, "session is fatal");
        self.state = SessionState::Fatal;
        self.reason = Some(reason.clone());
        self.marker.set();
        Some(reason)
    }
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_desynced_until_first_reply() {
        let mut monitor = SessionMonitor::new();
        assert_eq!(monitor.state(), SessionState::Desynced);
        assert!(monitor.resynced());
        assert_eq!(monitor.state(), SessionState::Connected);
    }

    #[test]
    fn desync_and_resync() {
        let mut monitor = SessionMonitor::new();
        monitor.resynced();

        assert!(monitor.desync());
        assert!(!monitor.desync());
        assert!(monitor.resynced());
        assert!(!monitor.resynced());
    }

    #[test]
    fn escalate_once() {
        let mut monitor = SessionMonitor::new();
        let marker = monitor.marker();

        assert!(monitor.escalate(FatalReason::HandshakeRejected).is_some());
        assert!(monitor.escalate(FatalReason::ConnectTimeout).is_none());

        assert!(marker.is_set());
        assert_eq!(monitor.reason(), Some(&FatalReason::HandshakeRejected));
    }

    #[test]
    fn fatal_is_terminal() {
        let mut monitor = SessionMonitor::new();
        monitor.escalate(FatalReason::ReconnectRequested);

        assert!(!monitor.resynced());
        assert!(!monitor.desync());
        assert_eq!(monitor.state(), SessionState::Fatal);
    }

    #[test]
    fn reason_display() {
        let reason = FatalReason::SequenceGap {
            expected: SequenceNumber::new(6),
            received: SequenceNumber::new(7),
        };
        assert_eq!(reason.to_string(), "sequence gap: expected 6, received 7");
        assert_eq!(SessionState::Desynced.to_string(), "desynced");
    }
}
