//! Buffer for updates received while desynchronized.

use seqsync_protocol::SequencedEnvelope;

/// Updates that arrived during a resync window.
///
/// Entries are kept verbatim and unclassified. They are only released by
/// [`ResyncBuffer::drain_merged_with`], which puts them behind the peer's
/// retransmission so the caller can re-classify the combined stream.
#[derive(Debug, Clone, Default)]
pub struct ResyncBuffer {
    entries: Vec<SequencedEnvelope>,
}

impl ResyncBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an update.
    pub fn append(&mut self, envelope: SequencedEnvelope) {
        self.entries.push(envelope);
    }

    /// Returns the number of buffered updates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the buffered updates in arrival order.
    pub fn entries(&self) -> &[SequencedEnvelope] {
        &self.entries
    }

    /// Merges the peer's retransmission with the buffer and empties the buffer.
    ///
    /// The result is `reply` followed by the buffered entries, stably sorted
    /// by sequence. Entries that share a sequence keep that concatenation
    /// order, so the peer's copy comes first and local copies become
    /// duplicates for the sequencer to absorb.
    pub fn drain_merged_with(&mut self, reply: Vec<SequencedEnvelope>) -> Vec<SequencedEnvelope> {
        let mut merged = reply;
        merged.append(&mut self.entries);
        merged.sort_by_key(|envelope| envelope.sequence);
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqsync_protocol::SequenceNumber;
    use serde_json::json;

    fn local(n: u64) -> SequencedEnvelope {
        SequencedEnvelope::new("notify", SequenceNumber::new(n), json!({"origin": "local"}))
    }

    fn peer(n: u64) -> SequencedEnvelope {
        SequencedEnvelope::new("notify", SequenceNumber::new(n), json!({"origin": "peer"}))
    }

    #[test]
    fn peer_copy_precedes_local_copy() {
        let mut buffer = ResyncBuffer::new();
        buffer.append(local(11));
        buffer.append(local(13));

        let merged = buffer.drain_merged_with(vec![peer(11), peer(12), peer(13), peer(14)]);

        let order: Vec<(u64, &str)> = merged
            .iter()
            .map(|e| (e.sequence.get(), e.payload["origin"].as_str().unwrap()))
            .collect();
        assert_eq!(
            order,
            vec![
                (11, "peer"),
                (11, "local"),
                (12, "peer"),
                (13, "peer"),
                (13, "local"),
                (14, "peer"),
            ]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn out_of_order_arrivals_are_sorted() {
        let mut buffer = ResyncBuffer::new();
        buffer.append(local(5));
        buffer.append(local(3));
        buffer.append(local(4));

        let merged = buffer.drain_merged_with(Vec::new());
        let sequences: Vec<u64> = merged.iter().map(|e| e.sequence.get()).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
    }

    #[test]
    fn append_keeps_arrival_order() {
        let mut buffer = ResyncBuffer::new();
        buffer.append(local(9));
        buffer.append(local(8));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.entries()[0].sequence, SequenceNumber::new(9));
    }
}
