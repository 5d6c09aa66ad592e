//! Socket seam.

use crate::error::OutboxResult;
use seqsync_protocol::{ResumeReply, UpdateEnvelope};
use std::future::Future;

/// A message leaving the outbox.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// A numbered update.
    Update(UpdateEnvelope),
    /// A retransmission for a resuming client. Never numbered.
    ResumeReply(ResumeReply),
}

/// Delivers outbox messages to the client's connection.
pub trait Emitter: Send + Sync + 'static {
    /// Sends one message.
    fn emit(&self, message: OutboundMessage) -> impl Future<Output = OutboxResult<()>> + Send;

    /// Returns true while the client has a live connection.
    fn is_connected(&self) -> bool;
}
