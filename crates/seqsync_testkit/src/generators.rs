//! Property-based test generators using proptest.
//!
//! Strategies produce well-formed updates, numbered streams, and the
//! reordered or lossy arrival patterns a resyncing client has to survive.

use proptest::prelude::*;
use seqsync_protocol::{
    DownloadRequest, ElementPatch, Notification, OpenTarget, RunJavascript, SequenceNumber,
    Update, UpdateEnvelope,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Strategy for element patches touching up to eight elements.
pub fn element_patch_strategy() -> impl Strategy<Value = ElementPatch> {
    prop::collection::btree_map(
        0u64..64,
        prop::option::weighted(
            0.8,
            "[a-z]{1,8}".prop_map(|tag| json!({"tag": tag, "children": []})),
        ),
        1..8,
    )
    .prop_map(|map: BTreeMap<u64, Option<Value>>| ElementPatch(map))
}

/// Strategy for any typed update.
pub fn update_strategy() -> impl Strategy<Value = Update> {
    prop_oneof![
        4 => element_patch_strategy().prop_map(Update::Elements),
        1 => "[a-z]{1,12}\\(\\)".prop_map(|code| Update::RunJavascript(RunJavascript {
            code,
            request_id: None,
        })),
        1 => ("/[a-z]{0,12}", any::<bool>())
            .prop_map(|(path, new_tab)| Update::Open(OpenTarget { path, new_tab })),
        1 => ("/files/[a-z]{1,8}", prop::option::of("[a-z]{1,8}\\.txt"))
            .prop_map(|(src, filename)| Update::Download(DownloadRequest {
                src,
                filename,
                media_type: None,
            })),
        2 => "[ -~]{0,24}".prop_map(|message| Update::Notify(Notification {
            message: Some(Value::String(message)),
            options: Map::new(),
        })),
    ]
}

/// Strategy for a numbered stream `1..=len` of random updates.
pub fn envelope_stream_strategy(
    min_len: u64,
    max_len: u64,
) -> impl Strategy<Value = Vec<UpdateEnvelope>> {
    (min_len..=max_len)
        .prop_flat_map(|len| prop::collection::vec(update_strategy(), len as usize))
        .prop_map(|updates| {
            updates
                .iter()
                .zip(1u64..)
                .filter_map(|(update, n)| {
                    UpdateEnvelope::from_update(update, Some(SequenceNumber::new(n))).ok()
                })
                .collect()
        })
}

/// Strategy for the sequences `1..=len` in a random order with up to
/// `max_duplicates` repeats mixed in.
pub fn arrival_order_strategy(
    max_len: u64,
    max_duplicates: usize,
) -> impl Strategy<Value = (u64, Vec<u64>)> {
    (1..=max_len).prop_flat_map(move |len| {
        let unique: Vec<u64> = (1..=len).collect();
        let repeats = prop::collection::vec(1..=len, 0..=max_duplicates);
        (Just(len), repeats, Just(unique))
            .prop_flat_map(|(len, repeats, mut all)| {
                all.extend(repeats);
                (Just(len), Just(all).prop_shuffle())
            })
    })
}

/// Strategy for a set of sequences in `1..len` to lose in transit.
///
/// The last sequence is never included: nothing follows it on the live
/// stream, so its loss cannot be noticed.
pub fn loss_set_strategy(len: u64, max_lost: usize) -> impl Strategy<Value = BTreeSet<u64>> {
    if len < 2 {
        return Just(BTreeSet::new()).boxed();
    }
    prop::collection::btree_set(1..len, 0..=max_lost).boxed()
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for end-to-end runs that spin up a runtime
    /// per case.
    #[must_use]
    pub fn session() -> Self {
        Self {
            cases: 16,
            max_shrink_iters: 32,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn updates_decode_from_their_own_payload(update in update_strategy()) {
            let payload = update.to_payload().unwrap();
            prop_assert_eq!(Update::decode(update.kind(), payload).unwrap(), update);
        }

        #[test]
        fn streams_are_numbered_from_one(stream in envelope_stream_strategy(1, 20)) {
            for (envelope, n) in stream.iter().zip(1u64..) {
                prop_assert_eq!(envelope.sequence, Some(SequenceNumber::new(n)));
            }
        }

        #[test]
        fn arrival_orders_cover_every_sequence((len, order) in arrival_order_strategy(30, 10)) {
            let seen: BTreeSet<u64> = order.iter().copied().collect();
            prop_assert_eq!(seen, (1..=len).collect::<BTreeSet<u64>>());
        }

        #[test]
        fn loss_sets_spare_the_last(lost in loss_set_strategy(12, 5)) {
            prop_assert!(lost.iter().all(|&n| (1..12).contains(&n)));
        }
    }
}
