//! Per-client outbox.

use crate::config::OutboxConfig;
use crate::emitter::{Emitter, OutboundMessage};
use crate::history::MessageHistory;
use parking_lot::Mutex;
use seqsync_protocol::{
    ClientId, ElementId, HandshakeRequest, ResumeReply, ResumeToken, SequenceNumber,
    SequencedEnvelope, UpdateKind,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

enum Pending {
    Message { kind: String, payload: Value },
    Resume(ResumeReply),
}

struct State {
    updates: BTreeMap<ElementId, Option<Value>>,
    messages: VecDeque<Pending>,
    history: MessageHistory,
    message_count: SequenceNumber,
}

impl State {
    fn number(&mut self, kind: &str, payload: Value, now: Instant) -> OutboundMessage {
        self.message_count = self.message_count.next();
        let envelope = SequencedEnvelope::new(kind, self.message_count, payload);
        self.history.record(envelope.clone(), now);
        OutboundMessage::Update(envelope.into())
    }

    fn resume_messages(&self, last_accepted: SequenceNumber) -> Option<Vec<SequencedEnvelope>> {
        if last_accepted > self.message_count {
            return None;
        }
        match self.history.oldest() {
            Some(oldest) if oldest > last_accepted.next() => None,
            Some(_) => Some(self.history.since(last_accepted)),
            None if last_accepted == self.message_count => Some(Vec::new()),
            None => None,
        }
    }
}

/// Queues element updates and messages for one client and numbers them on
/// the way out.
///
/// Element updates are coalesced per element id until the next flush, where
/// they leave as a single `update` message. Every outgoing message except a
/// resume reply receives the next sequence number and is recorded in the
/// history first, so a reconnecting client can ask for what it missed.
pub struct Outbox<E> {
    config: OutboxConfig,
    emitter: Arc<E>,
    state: Mutex<State>,
    wake: Notify,
    stopped: AtomicBool,
}

impl<E: Emitter> Outbox<E> {
    /// Creates an outbox.
    pub fn new(config: OutboxConfig, emitter: Arc<E>) -> Self {
        let history = MessageHistory::new(
            config.resolved_history_duration(),
            config.history_max_length,
        );
        Self {
            config,
            emitter,
            state: Mutex::new(State {
                updates: BTreeMap::new(),
                messages: VecDeque::new(),
                history,
                message_count: SequenceNumber::ZERO,
            }),
            wake: Notify::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Returns the client this outbox serves.
    pub fn client_id(&self) -> &ClientId {
        &self.config.client_id
    }

    /// Returns the number of messages numbered so far.
    pub fn message_count(&self) -> SequenceNumber {
        self.state.lock().message_count
    }

    /// Returns the number of history entries.
    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Returns true if a flush would emit something.
    pub fn has_pending(&self) -> bool {
        let state = self.state.lock();
        !state.updates.is_empty() || !state.messages.is_empty()
    }

    /// Queues the latest state of an element.
    pub fn enqueue_update(&self, id: ElementId, element: Value) {
        self.state.lock().updates.insert(id, Some(element));
        self.wake.notify_one();
    }

    /// Queues the removal of an element.
    pub fn enqueue_delete(&self, id: ElementId) {
        self.state.lock().updates.insert(id, None);
        self.wake.notify_one();
    }

    /// Queues a message.
    pub fn enqueue_message(&self, kind: impl Into<String>, payload: Value) {
        self.state.lock().messages.push_back(Pending::Message {
            kind: kind.into(),
            payload,
        });
        self.wake.notify_one();
    }

    /// Queues a resume reply for a client that has accepted everything up to
    /// `last_accepted`.
    ///
    /// Returns false if the history cannot cover the gap; the client must then
    /// reload.
    pub fn synchronize(&self, last_accepted: SequenceNumber, token: ResumeToken) -> bool {
        let mut state = self.state.lock();
        let Some(messages) = state.resume_messages(last_accepted) else {
            warn!(
                %last_accepted,
                count = %state.message_count,
                oldest = ?state.history.oldest(),
                "cannot resume client"
            );
            return false;
        };

        debug!(%last_accepted, resend = messages.len(), %token, "resuming client");
        let reply = ResumeReply {
            resume_token: token,
            latest_sequence: state.message_count,
            messages,
        };
        state.messages.push_back(Pending::Resume(reply));
        drop(state);
        self.wake.notify_one();
        true
    }

    /// Answers a client handshake.
    pub fn handle_handshake(&self, request: &HandshakeRequest) -> bool {
        if request.client_id != self.config.client_id {
            warn!(
                expected = %self.config.client_id,
                actual = %request.client_id,
                "handshake for another client"
            );
            return false;
        }
        self.synchronize(request.last_accepted_sequence, request.resume_token)
    }

    /// Emits everything pending: the coalesced element update first, then
    /// messages in order. Returns the number of messages delivered.
    pub async fn flush(&self) -> usize {
        let batch = self.take_batch();
        let mut delivered = 0;
        for message in batch {
            match self.emitter.emit(message).await {
                Ok(()) => delivered += 1,
                Err(err) => warn!(error = %err, client_id = %self.config.client_id, "emit failed"),
            }
        }
        delivered
    }

    /// Flushes whenever work arrives, until [`stop`](Self::stop) is called.
    ///
    /// Waits at most `idle_wait` for new work before re-checking the stop
    /// flag, and polls every `disconnected_poll` while the emitter is down.
    pub async fn run(&self) {
        info!(client_id = %self.config.client_id, "outbox loop started");
        while !self.stopped.load(Ordering::Acquire) {
            if !self.has_pending() {
                let _ = tokio::time::timeout(self.config.idle_wait, self.wake.notified()).await;
                continue;
            }
            if !self.emitter.is_connected() {
                tokio::time::sleep(self.config.disconnected_poll).await;
                continue;
            }
            self.flush().await;
        }
        info!(client_id = %self.config.client_id, "outbox loop stopped");
    }

    /// Ends the loop.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    /// Returns true once stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn take_batch(&self) -> Vec<OutboundMessage> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut batch = Vec::with_capacity(state.messages.len() + 1);

        if !state.updates.is_empty() {
            let payload: Map<String, Value> = std::mem::take(&mut state.updates)
                .into_iter()
                .map(|(id, element)| (id.to_string(), element.unwrap_or(Value::Null)))
                .collect();
            batch.push(state.number(UpdateKind::Update.as_str(), Value::Object(payload), now));
        }

        while let Some(pending) = state.messages.pop_front() {
            let message = match pending {
                Pending::Message { kind, payload } => state.number(&kind, payload, now),
                Pending::Resume(reply) => OutboundMessage::ResumeReply(reply),
            };
            batch.push(message);
        }
        batch
    }
}
