//! Inbound update envelopes.

use crate::error::{ProtocolError, ProtocolResult};
use crate::sequence::SequenceNumber;
use crate::update::{Update, UpdateKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An update as delivered by the transport.
///
/// `kind` stays a raw string until [`UpdateEnvelope::decode`] so that an
/// unknown kind can still be ordered and then reported, instead of failing
/// the whole frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEnvelope {
    /// Wire name of the update kind.
    pub kind: String,
    /// Peer-assigned order index; absent for unordered notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<SequenceNumber>,
    /// Kind-specific payload.
    #[serde(default)]
    pub payload: Value,
}

impl UpdateEnvelope {
    /// Creates a sequenced envelope.
    pub fn sequenced(kind: impl Into<String>, sequence: SequenceNumber, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            sequence: Some(sequence),
            payload,
        }
    }

    /// Creates an envelope without a sequence number.
    pub fn unsequenced(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            sequence: None,
            payload,
        }
    }

    /// Creates an envelope from a typed update.
    pub fn from_update(update: &Update, sequence: Option<SequenceNumber>) -> ProtocolResult<Self> {
        Ok(Self {
            kind: update.kind().as_str().to_string(),
            sequence,
            payload: update.to_payload()?,
        })
    }

    /// Resolves the kind and decodes the payload.
    pub fn decode(&self) -> ProtocolResult<Update> {
        let kind = UpdateKind::parse(&self.kind)?;
        Update::decode(kind, self.payload.clone())
    }

    /// Converts into a sequenced envelope, failing if no sequence is present.
    pub fn into_sequenced(self) -> ProtocolResult<SequencedEnvelope> {
        match self.sequence {
            Some(sequence) => Ok(SequencedEnvelope {
                kind: self.kind,
                sequence,
                payload: self.payload,
            }),
            None => Err(ProtocolError::MissingSequence { kind: self.kind }),
        }
    }

    /// Encodes to JSON.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// An envelope that is guaranteed to carry a sequence number.
///
/// Resume replies and the resync buffer only ever hold ordered updates,
/// so they use this type instead of [`UpdateEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEnvelope {
    /// Wire name of the update kind.
    pub kind: String,
    /// Peer-assigned order index.
    pub sequence: SequenceNumber,
    /// Kind-specific payload.
    #[serde(default)]
    pub payload: Value,
}

impl SequencedEnvelope {
    /// Creates a sequenced envelope.
    pub fn new(kind: impl Into<String>, sequence: SequenceNumber, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            sequence,
            payload,
        }
    }
}

impl From<SequencedEnvelope> for UpdateEnvelope {
    fn from(envelope: SequencedEnvelope) -> Self {
        Self {
            kind: envelope.kind,
            sequence: Some(envelope.sequence),
            payload: envelope.payload,
        }
    }
}
