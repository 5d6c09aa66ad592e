//! Sequence classification.

use seqsync_protocol::SequenceNumber;

/// Outcome of classifying one inbound update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The next expected update; it has been accepted.
    InOrder,
    /// Already applied; must not be dispatched again.
    Duplicate {
        /// Last accepted sequence at classification time.
        last_accepted: SequenceNumber,
    },
    /// A forward jump past the expected sequence.
    Gap {
        /// The sequence that should have arrived.
        expected: SequenceNumber,
    },
    /// Carries no sequence and bypasses ordering.
    Unsequenced,
}

/// Tracks the last accepted sequence number.
///
/// Only [`Classification::InOrder`] advances the sequencer.
#[derive(Debug, Clone, Default)]
pub struct Sequencer {
    last_accepted: SequenceNumber,
}

impl Sequencer {
    /// Creates a sequencer that has accepted everything up to `last_accepted`.
    pub fn new(last_accepted: SequenceNumber) -> Self {
        Self { last_accepted }
    }

    /// Returns the last accepted sequence.
    pub fn last_accepted(&self) -> SequenceNumber {
        self.last_accepted
    }

    /// Returns the sequence expected next.
    pub fn expected(&self) -> SequenceNumber {
        self.last_accepted.next()
    }

    /// Classifies an update by its sequence number.
    pub fn classify(&mut self, sequence: Option<SequenceNumber>) -> Classification {
        let Some(sequence) = sequence else {
            return Classification::Unsequenced;
        };

        if sequence <= self.last_accepted {
            return Classification::Duplicate {
                last_accepted: self.last_accepted,
            };
        }

        let expected = self.expected();
        if sequence == expected {
            self.last_accepted = sequence;
            Classification::InOrder
        } else {
            Classification::Gap { expected }
        }
    }
}
