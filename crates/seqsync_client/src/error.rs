//! Error types for the client.

use crate::monitor::FatalReason;
use seqsync_protocol::{ProtocolError, UpdateKind};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while running a client session.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the transport expects to recover on its own.
        retryable: bool,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The session reached FATAL and only a reload can recover it.
    #[error("session is fatal: {0}")]
    SessionFatal(FatalReason),

    /// The session task has stopped.
    #[error("session closed")]
    Closed,
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the error ends the session.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::Transport { retryable, .. } => !*retryable,
            ClientError::SessionFatal(_) | ClientError::Closed => true,
            ClientError::Protocol(_) => false,
        }
    }
}

/// Failure of a single dispatched handler.
///
/// Handler failures are logged by the dispatch queue and never stop it.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The envelope could not be turned into a typed update.
    #[error("undecodable update: {0}")]
    Decode(#[from] ProtocolError),

    /// The handler itself reported a failure.
    #[error("{kind} handler failed: {message}")]
    Failed {
        /// Kind of the update being handled.
        kind: UpdateKind,
        /// Error message.
        message: String,
    },

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Creates a handler failure for the given kind.
    pub fn failed(kind: UpdateKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }
}
