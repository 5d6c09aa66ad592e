//! The sans-IO session state machine.

use crate::chaos::ChaosPlan;
use crate::config::{ChaosConfig, ClientConfig, DuplicatePolicy, GapPolicy};
use crate::entropy::RandomSource;
use crate::handshake::{AckOutcome, HandshakeCoordinator, ReplyOutcome};
use crate::monitor::{FatalMarker, FatalReason, SessionMonitor, SessionState};
use crate::render::Origin;
use crate::resync_buffer::ResyncBuffer;
use crate::sequencer::{Classification, Sequencer};
use crate::tab::TabStore;
use seqsync_protocol::{
    HandshakeRequest, ResumeReply, ResumeToken, SequenceNumber, SequencedEnvelope, UpdateEnvelope,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Input to the session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The transport (re)connected.
    Connected,
    /// The transport lost the connection.
    Disconnected,
    /// The transport failed to connect.
    ConnectError {
        /// Whether the attempt timed out.
        timed_out: bool,
    },
    /// The transport gave up reconnecting.
    TryReconnect,
    /// An inbound update.
    Update(UpdateEnvelope),
    /// The peer's retransmission for an attempt.
    ResumeReply(ResumeReply),
    /// The peer's answer to a handshake request.
    HandshakeAcknowledged {
        /// Token of the attempt being answered.
        token: ResumeToken,
        /// Whether the peer could resume the session.
        ok: bool,
    },
}

/// Output of the session, executed by the runtime in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Run the renderer for an update, through the dispatch queue.
    Dispatch {
        /// The update.
        envelope: UpdateEnvelope,
        /// Where it came from.
        origin: Origin,
    },
    /// Show or hide the reconnecting indicator, through the dispatch queue.
    ShowReconnecting(bool),
    /// Send a handshake and report its acknowledgement.
    SendHandshake(HandshakeRequest),
    /// Start a simulated disconnect cycle.
    ScheduleChaos(ChaosPlan),
    /// Drop and reopen the connection to start a new handshake.
    Reconnect,
    /// Reload the page. Executed directly on the host.
    Reload(FatalReason),
}

/// Session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// In-order live updates dispatched.
    pub live_dispatches: u64,
    /// Updates dispatched from merged resume replies.
    pub replayed_dispatches: u64,
    /// Unsequenced updates dispatched.
    pub unsequenced_dispatches: u64,
    /// Updates placed in the resync buffer.
    pub buffered_updates: u64,
    /// Duplicates dropped without dispatch.
    pub absorbed_duplicates: u64,
    /// Replies and acknowledgements discarded as stale.
    pub stale_replies: u64,
    /// Handshake attempts started.
    pub handshake_attempts: u64,
    /// Resume replies merged.
    pub resyncs: u64,
}

/// Ordering, buffering and lifecycle decisions for one client session.
///
/// `SessionCore` performs no I/O. Each [`handle`](Self::handle) call consumes
/// one event and returns the effects to execute, in order. All state is owned
/// here and changed only through `handle`.
pub struct SessionCore {
    duplicate_policy: DuplicatePolicy,
    gap_policy: GapPolicy,
    chaos: ChaosConfig,
    random: Arc<dyn RandomSource>,
    sequencer: Sequencer,
    buffer: ResyncBuffer,
    handshake: HandshakeCoordinator,
    monitor: SessionMonitor,
    stats: SessionStats,
}

impl SessionCore {
    /// Creates a session awaiting its first handshake.
    pub fn new(
        config: &ClientConfig,
        random: Arc<dyn RandomSource>,
        tab_store: Arc<dyn TabStore>,
    ) -> Self {
        Self {
            duplicate_policy: config.duplicate_policy,
            gap_policy: config.gap_policy,
            chaos: config.chaos.clone(),
            random,
            sequencer: Sequencer::default(),
            buffer: ResyncBuffer::new(),
            handshake: HandshakeCoordinator::new(config.client_id.clone(), tab_store),
            monitor: SessionMonitor::new(),
            stats: SessionStats::default(),
        }
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> SessionState {
        self.monitor.state()
    }

    /// Returns the counters.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Returns the last accepted sequence.
    pub fn last_accepted(&self) -> SequenceNumber {
        self.sequencer.last_accepted()
    }

    /// Returns the number of buffered updates.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the reason the session became fatal.
    pub fn fatal_reason(&self) -> Option<&FatalReason> {
        self.monitor.reason()
    }

    /// Returns a handle to the fatal marker.
    pub fn fatal_marker(&self) -> FatalMarker {
        self.monitor.marker()
    }

    /// Consumes one event.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        if self.monitor.is_fatal() {
            debug!(?event, "ignoring event after fatal");
            return Vec::new();
        }

        match event {
            SessionEvent::Connected => self.on_connected(),
            SessionEvent::Disconnected => {
                self.monitor.desync();
                vec![Effect::ShowReconnecting(true)]
            }
            SessionEvent::ConnectError { timed_out } => {
                if timed_out {
                    self.fatal(FatalReason::ConnectTimeout)
                } else {
                    debug!("connect error left to transport retry");
                    Vec::new()
                }
            }
            SessionEvent::TryReconnect => self.fatal(FatalReason::ReconnectRequested),
            SessionEvent::Update(envelope) => self.on_update(envelope),
            SessionEvent::ResumeReply(reply) => self.on_reply(reply),
            SessionEvent::HandshakeAcknowledged { token, ok } => self.on_ack(token, ok),
        }
    }

    fn on_connected(&mut self) -> Vec<Effect> {
        // Live traffic on the new connection may overlap the retransmission.
        self.monitor.desync();

        let request = self
            .handshake
            .begin_attempt(self.sequencer.last_accepted(), self.random.as_ref());
        self.stats.handshake_attempts += 1;
        info!(
            token = %request.resume_token,
            last_accepted = %request.last_accepted_sequence,
            "starting handshake"
        );
        vec![Effect::SendHandshake(request)]
    }

    fn on_ack(&mut self, token: ResumeToken, ok: bool) -> Vec<Effect> {
        match self.handshake.acknowledge(token, ok) {
            AckOutcome::Stale => {
                debug!(%token, "stale handshake acknowledgement");
                self.stats.stale_replies += 1;
                Vec::new()
            }
            AckOutcome::Rejected => self.fatal(FatalReason::HandshakeRejected),
            AckOutcome::Confirmed => {
                debug!(%token, "handshake confirmed");
                let mut effects = vec![Effect::ShowReconnecting(false)];
                if self.chaos.enabled {
                    effects.push(Effect::ScheduleChaos(ChaosPlan::draw(
                        &self.chaos,
                        self.random.as_ref(),
                    )));
                }
                effects
            }
        }
    }

    fn on_update(&mut self, envelope: UpdateEnvelope) -> Vec<Effect> {
        let Some(sequence) = envelope.sequence else {
            self.stats.unsequenced_dispatches += 1;
            return vec![Effect::Dispatch {
                envelope,
                origin: Origin::Unsequenced,
            }];
        };

        if self.monitor.state() == SessionState::Desynced {
            debug!(%sequence, "buffering update");
            self.buffer_update(sequence, envelope);
            return Vec::new();
        }

        match self.sequencer.classify(Some(sequence)) {
            Classification::InOrder => {
                self.stats.live_dispatches += 1;
                vec![Effect::Dispatch {
                    envelope,
                    origin: Origin::Live,
                }]
            }
            Classification::Duplicate { last_accepted } => match self.duplicate_policy {
                DuplicatePolicy::Fatal => self.fatal(FatalReason::DuplicateUpdate { sequence }),
                DuplicatePolicy::Absorb => {
                    warn!(%sequence, %last_accepted, "absorbing live duplicate");
                    self.stats.absorbed_duplicates += 1;
                    Vec::new()
                }
            },
            Classification::Gap { expected } => match self.gap_policy {
                GapPolicy::Reload => self.fatal(FatalReason::SequenceGap {
                    expected,
                    received: sequence,
                }),
                GapPolicy::Resync => {
                    warn!(%expected, received = %sequence, "live gap, forcing resync");
                    self.monitor.desync();
                    self.buffer_update(sequence, envelope);
                    vec![Effect::ShowReconnecting(true), Effect::Reconnect]
                }
            },
            Classification::Unsequenced => Vec::new(),
        }
    }

    fn on_reply(&mut self, reply: ResumeReply) -> Vec<Effect> {
        if self.handshake.accept_reply(reply.resume_token) == ReplyOutcome::Stale {
            debug!(token = %reply.resume_token, "discarding stale resume reply");
            self.stats.stale_replies += 1;
            return Vec::new();
        }

        let merged = self.buffer.drain_merged_with(reply.messages);
        self.monitor.resynced();
        self.stats.resyncs += 1;
        info!(
            merged = merged.len(),
            latest = %reply.latest_sequence,
            "merging resume reply"
        );

        let mut effects = Vec::with_capacity(merged.len());
        for entry in merged {
            let sequence = entry.sequence;
            match self.sequencer.classify(Some(sequence)) {
                Classification::InOrder => {
                    self.stats.replayed_dispatches += 1;
                    effects.push(Effect::Dispatch {
                        envelope: entry.into(),
                        origin: Origin::Replay,
                    });
                }
                Classification::Duplicate { .. } => {
                    debug!(%sequence, "absorbing replayed duplicate");
                    self.stats.absorbed_duplicates += 1;
                }
                Classification::Gap { expected } => {
                    effects.extend(self.fatal(FatalReason::ReplayGap {
                        expected,
                        received: sequence,
                    }));
                    return effects;
                }
                Classification::Unsequenced => {}
            }
        }

        if self.sequencer.last_accepted() < reply.latest_sequence {
            effects.extend(self.fatal(FatalReason::ReplayGap {
                expected: self.sequencer.expected(),
                received: reply.latest_sequence,
            }));
        }
        effects
    }

    fn buffer_update(&mut self, sequence: SequenceNumber, envelope: UpdateEnvelope) {
        self.buffer.append(SequencedEnvelope {
            kind: envelope.kind,
            sequence,
            payload: envelope.payload,
        });
        self.stats.buffered_updates += 1;
    }

    fn fatal(&mut self, reason: FatalReason) -> Vec<Effect> {
        self.monitor
            .escalate(reason)
            .map(Effect::Reload)
            .into_iter()
            .collect()
    }
}
