//! Error types for protocol encoding and decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Malformed JSON or a structural mismatch.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope names an update kind this client does not know.
    #[error("unknown update kind: {0}")]
    UnknownKind(String),

    /// The payload does not match the shape required by its kind.
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        /// Update kind that failed to decode.
        kind: &'static str,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// A sequence number was required but absent.
    #[error("{kind} update carries no sequence number")]
    MissingSequence {
        /// Update kind that lacked a sequence.
        kind: String,
    },
}

impl ProtocolError {
    /// Returns true if the error concerns a single update rather than the framing.
    pub fn is_per_update(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownKind(_) | ProtocolError::InvalidPayload { .. }
        )
    }
}
