//! Sequence numbers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Peer-assigned total order index for state updates.
///
/// Sequence numbers are unique per session and strictly increasing. The
/// first update of a session carries sequence 1, so `SequenceNumber::ZERO`
/// means "nothing accepted yet".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// The sequence before any update.
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    /// Creates a sequence number.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the sequence number that follows this one.
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u64> for SequenceNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
