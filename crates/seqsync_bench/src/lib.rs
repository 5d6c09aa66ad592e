//! Benchmark utilities.

#![warn(missing_docs)]

use rand::seq::SliceRandom;
use rand::Rng;
use seqsync_protocol::{SequenceNumber, SequencedEnvelope};
use serde_json::json;

/// Builds a retransmitted notification.
pub fn envelope(sequence: u64) -> SequencedEnvelope {
    SequencedEnvelope::new(
        "notify",
        SequenceNumber::new(sequence),
        json!({"message": "bench"}),
    )
}

/// Builds the sequences `first..=last` as envelopes.
pub fn range(first: u64, last: u64) -> Vec<SequencedEnvelope> {
    (first..=last).map(envelope).collect()
}

/// Returns `1..=len` in a random order, with about `duplicate_ratio` of the
/// entries delivered twice.
pub fn shuffled_arrivals(len: u64, duplicate_ratio: f64) -> Vec<u64> {
    let mut rng = rand::thread_rng();
    let mut arrivals: Vec<u64> = (1..=len).collect();
    for n in 1..=len {
        if rng.gen_bool(duplicate_ratio) {
            arrivals.push(n);
        }
    }
    arrivals.shuffle(&mut rng);
    arrivals
}

/// Returns a reply covering `1..=len` and a live tail `cut..=len` buffered
/// while the reply was in flight.
pub fn overlapping_resync(
    len: u64,
    cut: u64,
) -> (Vec<SequencedEnvelope>, Vec<SequencedEnvelope>) {
    (range(1, len), range(cut.max(1), len))
}
