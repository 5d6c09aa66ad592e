//! Resume handshake coordination.

use crate::entropy::RandomSource;
use crate::tab::{resolve_tab_id, TabStore};
use seqsync_protocol::{ClientId, HandshakeRequest, ResumeToken, SequenceNumber};
use std::sync::Arc;
use tracing::debug;

/// Result of matching a handshake acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The peer confirmed the current attempt.
    Confirmed,
    /// The peer rejected the current attempt.
    Rejected,
    /// The acknowledgement belongs to a superseded attempt.
    Stale,
}

/// Result of matching a resume reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The reply matches the outstanding attempt.
    Accepted,
    /// The reply is for a superseded attempt or was already consumed.
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct Attempt {
    token: ResumeToken,
    acknowledged: bool,
    replied: bool,
}

/// Issues resume requests and correlates their acknowledgements and replies.
///
/// Only the latest attempt is tracked; starting a new one supersedes the
/// previous token. The acknowledgement and the reply are matched
/// independently because the peer may deliver them in either order.
pub struct HandshakeCoordinator {
    client_id: ClientId,
    tab_store: Arc<dyn TabStore>,
    current: Option<Attempt>,
    attempts: u64,
}

impl HandshakeCoordinator {
    /// Creates a coordinator.
    pub fn new(client_id: ClientId, tab_store: Arc<dyn TabStore>) -> Self {
        Self {
            client_id,
            tab_store,
            current: None,
            attempts: 0,
        }
    }

    /// Starts a new attempt and returns the request to send.
    pub fn begin_attempt(
        &mut self,
        last_accepted: SequenceNumber,
        random: &dyn RandomSource,
    ) -> HandshakeRequest {
        let token = ResumeToken::from_uuid(random.uuid());
        let tab_id = resolve_tab_id(self.tab_store.as_ref(), random);

        if let Some(previous) = self.current.replace(Attempt {
            token,
            acknowledged: false,
            replied: false,
        }) {
            debug!(token = %previous.token, "superseding handshake attempt");
        }
        self.attempts += 1;

        HandshakeRequest {
            client_id: self.client_id.clone(),
            tab_id,
            last_accepted_sequence: last_accepted,
            resume_token: token,
        }
    }

    /// Matches an acknowledgement against the current attempt.
    pub fn acknowledge(&mut self, token: ResumeToken, ok: bool) -> AckOutcome {
        match self.current.as_mut() {
            Some(attempt) if attempt.token == token && !attempt.acknowledged => {
                attempt.acknowledged = true;
                if ok {
                    AckOutcome::Confirmed
                } else {
                    AckOutcome::Rejected
                }
            }
            _ => AckOutcome::Stale,
        }
    }

    /// Matches a resume reply against the current attempt.
    ///
    /// A token is consumed by its first reply; later replies with the same
    /// token are stale.
    pub fn accept_reply(&mut self, token: ResumeToken) -> ReplyOutcome {
        match self.current.as_mut() {
            Some(attempt) if attempt.token == token && !attempt.replied => {
                attempt.replied = true;
                ReplyOutcome::Accepted
            }
            _ => ReplyOutcome::Stale,
        }
    }

    /// Returns the token still waiting for a reply, if any.
    pub fn outstanding(&self) -> Option<ResumeToken> {
        self.current
            .filter(|attempt| !attempt.replied)
            .map(|attempt| attempt.token)
    }

    /// Returns the number of attempts started.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}
