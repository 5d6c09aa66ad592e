//! # SeqSync Protocol
//!
//! Wire types for the SeqSync ordered delivery protocol.
//!
//! This crate provides:
//! - `SequenceNumber`, the peer-assigned total order index
//! - `UpdateEnvelope` / `SequencedEnvelope` for inbound updates
//! - Typed `Update` payloads for every known update kind
//! - `HandshakeRequest` and `ResumeReply` for the resume handshake
//! - JSON encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;
mod handshake;
mod sequence;
mod update;

pub use envelope::{SequencedEnvelope, UpdateEnvelope};
pub use error::{ProtocolError, ProtocolResult};
pub use handshake::{ClientId, HandshakeRequest, ResumeReply, ResumeToken, TabId};
pub use sequence::SequenceNumber;
pub use update::{
    DownloadRequest, ElementId, ElementPatch, Notification, OpenTarget, RunJavascript, Update,
    UpdateKind,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
