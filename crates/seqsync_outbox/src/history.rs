//! Retransmission history.

use seqsync_protocol::{SequenceNumber, SequencedEnvelope};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// One recorded message.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Sequence assigned to the message.
    pub sequence: SequenceNumber,
    /// When the message was recorded.
    pub recorded_at: Instant,
    /// The message.
    pub envelope: SequencedEnvelope,
}

/// Numbered messages kept for resuming clients.
///
/// Entries are evicted from the front once they are older than the window
/// or the history is longer than `max_length`. Eviction runs before each
/// append.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    entries: VecDeque<HistoryEntry>,
    duration: Duration,
    max_length: usize,
}

impl MessageHistory {
    /// Creates an empty history.
    pub fn new(duration: Duration, max_length: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            duration,
            max_length,
        }
    }

    /// Returns false if the window is zero and nothing is ever recorded.
    pub fn is_enabled(&self) -> bool {
        !self.duration.is_zero()
    }

    /// Records a message.
    pub fn record(&mut self, envelope: SequencedEnvelope, now: Instant) {
        if !self.is_enabled() {
            return;
        }

        while let Some(front) = self.entries.front() {
            let expired = now.saturating_duration_since(front.recorded_at) > self.duration;
            if expired || self.entries.len() > self.max_length {
                self.entries.pop_front();
            } else {
                break;
            }
        }

        self.entries.push_back(HistoryEntry {
            sequence: envelope.sequence,
            recorded_at: now,
            envelope,
        });
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the oldest recorded sequence.
    pub fn oldest(&self) -> Option<SequenceNumber> {
        self.entries.front().map(|entry| entry.sequence)
    }

    /// Returns every entry after `last`, in order.
    pub fn since(&self, last: SequenceNumber) -> Vec<SequencedEnvelope> {
        self.entries
            .iter()
            .filter(|entry| entry.sequence > last)
            .map(|entry| entry.envelope.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(n: u64) -> SequencedEnvelope {
        SequencedEnvelope::new("notify", SequenceNumber::new(n), json!({}))
    }

    #[test]
    fn evicts_by_length() {
        let mut history = MessageHistory::new(Duration::from_secs(60), 2);
        let now = Instant::now();
        for n in 1..=5 {
            history.record(envelope(n), now);
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.oldest(), Some(SequenceNumber::new(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_by_age() {
        let mut history = MessageHistory::new(Duration::from_secs(10), 100);
        history.record(envelope(1), Instant::now());
        tokio::time::advance(Duration::from_secs(5)).await;
        history.record(envelope(2), Instant::now());
        tokio::time::advance(Duration::from_secs(6)).await;
        history.record(envelope(3), Instant::now());

        assert_eq!(history.oldest(), Some(SequenceNumber::new(2)));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn zero_window_records_nothing() {
        let mut history = MessageHistory::new(Duration::ZERO, 100);
        history.record(envelope(1), Instant::now());

        assert!(!history.is_enabled());
        assert!(history.is_empty());
    }

    #[test]
    fn since_returns_suffix() {
        let mut history = MessageHistory::new(Duration::from_secs(60), 100);
        let now = Instant::now();
        for n in 1..=4 {
            history.record(envelope(n), now);
        }

        let suffix: Vec<u64> = history
            .since(SequenceNumber::new(2))
            .iter()
            .map(|e| e.sequence.get())
            .collect();
        assert_eq!(suffix, vec![3, 4]);
        assert!(history.since(SequenceNumber::new(4)).is_empty());
    }
}
