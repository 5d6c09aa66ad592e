//! # SeqSync Outbox
//!
//! The peer side of the ordered delivery protocol.
//!
//! This crate provides:
//! - `Outbox`: per-client queue of element updates and messages
//! - `MessageHistory`: bounded record of numbered messages for retransmission
//! - `Emitter`: the seam to the socket that carries messages to the client
//!
//! # Protocol
//!
//! 1. Every emitted message except a resume reply gets the next sequence number
//!    and is recorded in the history before it is handed to the emitter
//! 2. On (re)connect the client sends its last accepted sequence
//! 3. `synchronize` answers with every recorded message after that point,
//!    or refuses if the history no longer reaches back far enough
//! 4. A refusal makes the client reload

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod config;
mod emitter;
mod error;
mod history;
mod outbox;

pub use config::OutboxConfig;
pub use emitter::{Emitter, OutboundMessage};
pub use error::{OutboxError, OutboxResult};
pub use history::{HistoryEntry, MessageHistory};
pub use outbox::Outbox;
