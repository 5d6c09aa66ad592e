//! In-process connection between an outbox and a client.
//!
//! One `LoopbackLink` plays both socket ends: it is the outbox's
//! [`Emitter`] and the client's [`Transport`]. Messages emitted while the
//! link is down fail, and faults can be injected to drop chosen sequences
//! or a random share of messages while staying connected.

use parking_lot::Mutex;
use seqsync_client::{ClientError, ClientResult, EventSender, RandomSource, Transport};
use seqsync_outbox::{Emitter, OutboundMessage, Outbox, OutboxError, OutboxResult};
use seqsync_protocol::{HandshakeRequest, SequenceNumber};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Counters for a loopback link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Messages handed to the client.
    pub delivered: u64,
    /// Messages dropped by injected faults.
    pub dropped: u64,
    /// Emits refused because the link was down.
    pub refused: u64,
    /// Handshakes answered.
    pub handshakes: u64,
}

struct Loss {
    random: Arc<dyn RandomSource>,
    per_mille: u64,
}

/// Both ends of an in-process client connection.
pub struct LoopbackLink {
    connected: AtomicBool,
    client: Mutex<Option<EventSender>>,
    outbox: Mutex<Weak<Outbox<LoopbackLink>>>,
    drop_sequences: Mutex<HashSet<SequenceNumber>>,
    loss: Mutex<Option<Loss>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
    refused: AtomicU64,
    handshakes: AtomicU64,
}

impl LoopbackLink {
    /// Creates a disconnected link.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(false),
            client: Mutex::new(None),
            outbox: Mutex::new(Weak::new()),
            drop_sequences: Mutex::new(HashSet::new()),
            loss: Mutex::new(None),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            refused: AtomicU64::new(0),
            handshakes: AtomicU64::new(0),
        })
    }

    /// Connects the client side.
    pub fn attach_client(&self, sender: EventSender) {
        *self.client.lock() = Some(sender);
    }

    /// Connects the outbox side.
    pub fn bind_outbox(&self, outbox: &Arc<Outbox<LoopbackLink>>) {
        *self.outbox.lock() = Arc::downgrade(outbox);
    }

    /// Drops the update carrying `sequence` the next time it is emitted.
    pub fn drop_sequence(&self, sequence: SequenceNumber) {
        self.drop_sequences.lock().insert(sequence);
    }

    /// Drops about `per_mille` out of every thousand updates.
    pub fn with_loss(&self, random: Arc<dyn RandomSource>, per_mille: u64) {
        *self.loss.lock() = Some(Loss { random, per_mille });
    }

    /// Stops dropping updates at random.
    pub fn clear_loss(&self) {
        *self.loss.lock() = None;
    }

    /// Returns true while the link is up.
    pub fn is_up(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Returns the link counters.
    pub fn stats(&self) -> LinkStats {
        LinkStats {
            delivered: self.delivered.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
            refused: self.refused.load(Ordering::Acquire),
            handshakes: self.handshakes.load(Ordering::Acquire),
        }
    }

    fn sender(&self) -> ClientResult<EventSender> {
        self.client.lock().clone().ok_or(ClientError::Closed)
    }

    fn should_drop(&self, sequence: Option<SequenceNumber>) -> bool {
        if let Some(sequence) = sequence {
            if self.drop_sequences.lock().remove(&sequence) {
                return true;
            }
        }
        match self.loss.lock().as_ref() {
            Some(loss) => loss.random.below(1000) < loss.per_mille,
            None => false,
        }
    }
}

impl Emitter for LoopbackLink {
    async fn emit(&self, message: OutboundMessage) -> OutboxResult<()> {
        if !self.is_connected() {
            self.refused.fetch_add(1, Ordering::AcqRel);
            return Err(OutboxError::NotConnected);
        }
        let sender = self
            .sender()
            .map_err(|err| OutboxError::Emit(err.to_string()))?;

        let result = match message {
            OutboundMessage::Update(envelope) => {
                if self.should_drop(envelope.sequence) {
                    debug!(sequence = ?envelope.sequence, "link dropped update");
                    self.dropped.fetch_add(1, Ordering::AcqRel);
                    return Ok(());
                }
                sender.update(envelope)
            }
            OutboundMessage::ResumeReply(reply) => sender.resume_reply(reply),
        };
        result.map_err(|err| OutboxError::Emit(err.to_string()))?;
        self.delivered.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.is_up()
    }
}

impl Transport for LoopbackLink {
    async fn handshake(&self, request: HandshakeRequest) -> ClientResult<bool> {
        let outbox = self
            .outbox
            .lock()
            .upgrade()
            .ok_or_else(|| ClientError::transport_fatal("outbox is gone"))?;
        self.handshakes.fetch_add(1, Ordering::AcqRel);
        Ok(outbox.handle_handshake(&request))
    }

    async fn connect(&self) -> ClientResult<()> {
        self.connected.store(true, Ordering::Release);
        self.sender()?.connected()
    }

    async fn disconnect(&self) -> ClientResult<()> {
        self.connected.store(false, Ordering::Release);
        self.sender()?.disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqsync_protocol::SequencedEnvelope;
    use serde_json::json;

    fn update(n: u64) -> OutboundMessage {
        OutboundMessage::Update(
            SequencedEnvelope::new("notify", SequenceNumber::new(n), json!({})).into(),
        )
    }

    #[tokio::test]
    async fn refuses_while_down() {
        let link = LoopbackLink::new();

        let err = link.emit(update(1)).await.unwrap_err();
        assert!(matches!(err, OutboxError::NotConnected));
        assert_eq!(link.stats().refused, 1);
    }

    #[tokio::test]
    async fn drops_chosen_sequences_once() {
        let link = LoopbackLink::new();
        let client = seqsync_client::Client::new(
            seqsync_client::ClientConfig::new("link"),
            link.clone(),
            Arc::new(seqsync_client::MemoryRenderer::new()),
            Arc::new(seqsync_client::MemoryHost::new()),
        )
        .spawn();
        link.attach_client(client.sender());
        link.connected.store(true, Ordering::Release);

        link.drop_sequence(SequenceNumber::new(2));
        for n in 1..=3 {
            link.emit(update(n)).await.unwrap();
        }
        link.emit(update(2)).await.unwrap();

        let stats = link.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.delivered, 3);
        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn handshake_without_outbox_fails() {
        let link = LoopbackLink::new();
        let request = HandshakeRequest {
            client_id: seqsync_protocol::ClientId::new("link"),
            tab_id: seqsync_protocol::TabId::new("tab"),
            last_accepted_sequence: SequenceNumber::ZERO,
            resume_token: seqsync_protocol::ResumeToken::from_uuid(
                seqsync_client::SeededRandom::new(1).uuid(),
            ),
        };

        assert!(link.handshake(request).await.is_err());
    }
}
