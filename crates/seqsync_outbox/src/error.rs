//! Error types for the outbox.

use seqsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur in the outbox.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// The emitter could not deliver a message.
    #[error("emit failed: {0}")]
    Emit(String),

    /// The emitter has no connection.
    #[error("not connected")]
    NotConnected,

    /// A handshake named a different client.
    #[error("client id mismatch: expected {expected}, got {actual}")]
    ClientMismatch {
        /// Id this outbox serves.
        expected: String,
        /// Id in the handshake.
        actual: String,
    },

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl OutboxError {
    /// Returns true if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OutboxError::Emit(_) | OutboxError::NotConnected)
    }
}
