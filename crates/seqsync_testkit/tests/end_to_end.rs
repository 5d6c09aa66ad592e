//! End-to-end runs of an outbox and a client over a loopback link.

use proptest::prelude::*;
use seqsync_client::{
    ChaosConfig, Client, ClientConfig, DuplicatePolicy, FatalReason, GapPolicy, MemoryHost,
    MemoryRenderer, MockTransport, SeededRandom, SessionState, Transport,
};
use seqsync_outbox::OutboxConfig;
use seqsync_protocol::{ResumeReply, SequenceNumber, Update, UpdateEnvelope};
use seqsync_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn outbox_config(client_id: &str) -> OutboxConfig {
    OutboxConfig::new(client_id)
        .with_loop_intervals(Duration::from_millis(50), Duration::from_millis(5))
}

fn resync_session(client_id: &str, seed: u64) -> LoopbackSession {
    LoopbackSession::start(
        ClientConfig::new(client_id).with_gap_policy(GapPolicy::Resync),
        outbox_config(client_id),
        Arc::new(SeededRandom::new(seed)),
    )
}

#[tokio::test]
async fn messages_queued_before_connect_arrive_after_first_resync() {
    let session = LoopbackSession::start_default("page-1");
    session.send_notifications(3);

    session.connect().await.unwrap();
    assert!(session.wait_for_sequence(SequenceNumber::new(3), Duration::from_secs(5)).await);
    session.settle().await.unwrap();

    assert_eq!(session.renderer.sequences(), vec![1, 2, 3]);
    assert_eq!(session.client.state(), SessionState::Connected);
    assert!(!session.host.reconnecting());
    assert_eq!(session.host.reload_count(), 0);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn live_updates_after_connect_are_applied_in_order() {
    let session = LoopbackSession::start_default("page-1");
    session.connect().await.unwrap();

    session.outbox.enqueue_update(7, serde_json::json!({"tag": "div"}));
    session.send_notifications(4);
    assert!(session.wait_for_sequence(SequenceNumber::new(5), Duration::from_secs(5)).await);
    session.settle().await.unwrap();

    let applied = session.renderer.applied();
    assert_eq!(session.renderer.sequences(), vec![1, 2, 3, 4, 5]);
    assert_eq!(applied[0].update.kind().as_str(), "update");
    assert_eq!(session.client.stats().live_dispatches, 5);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn lost_updates_are_recovered_by_resync() {
    let session = resync_session("page-2", 11);
    session.connect().await.unwrap();

    for lost in [3, 7, 11] {
        session.link.drop_sequence(SequenceNumber::new(lost));
    }
    session.send_notifications(15);

    assert!(session.wait_for_sequence(SequenceNumber::new(15), Duration::from_secs(5)).await);
    session.settle().await.unwrap();

    assert_eq!(session.renderer.sequences(), (1..=15).collect::<Vec<_>>());
    assert_eq!(session.host.reload_count(), 0);
    assert_eq!(session.link.stats().dropped, 3);
    assert!(session.client.stats().resyncs >= 2);
    assert!(!session.host.reconnecting());

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn lost_update_reloads_once_by_default() {
    let session = LoopbackSession::start_default("page-3");
    session.connect().await.unwrap();
    session.send_notifications(1);
    assert!(session.wait_for_sequence(SequenceNumber::new(1), Duration::from_secs(5)).await);
    session.settle().await.unwrap();

    session.link.drop_sequence(SequenceNumber::new(2));
    session.send_notifications(3);
    session.settle().await.unwrap();

    assert!(session.client.is_fatal());
    assert_eq!(
        session.host.reloads(),
        vec![FatalReason::SequenceGap {
            expected: SequenceNumber::new(2),
            received: SequenceNumber::new(3),
        }]
    );
    assert_eq!(session.renderer.sequences(), vec![1]);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn evicted_history_forces_a_reload() {
    let session = LoopbackSession::start(
        ClientConfig::new("page-4"),
        outbox_config("page-4").with_history_max_length(5),
        Arc::new(SeededRandom::new(4)),
    );
    session.connect().await.unwrap();

    session.link.disconnect().await.unwrap();
    session.send_notifications(10);
    session.outbox.flush().await;
    assert_eq!(session.outbox.message_count(), SequenceNumber::new(10));

    session.link.connect().await.unwrap();
    session.settle().await.unwrap();

    assert_eq!(session.host.reloads(), vec![FatalReason::HandshakeRejected]);
    assert!(session.renderer.is_empty());

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn updates_sent_while_disconnected_are_replayed() {
    let session = LoopbackSession::start_default("page-5");
    session.connect().await.unwrap();
    session.send_notifications(2);
    assert!(session.wait_for_sequence(SequenceNumber::new(2), Duration::from_secs(5)).await);

    session.link.disconnect().await.unwrap();
    session.send_notifications(3);
    session.outbox.flush().await;
    session.client.settle().await.unwrap();
    assert!(session.host.reconnecting());

    session.link.connect().await.unwrap();
    assert!(session.wait_for_sequence(SequenceNumber::new(5), Duration::from_secs(5)).await);
    session.settle().await.unwrap();

    assert_eq!(session.renderer.sequences(), vec![1, 2, 3, 4, 5]);
    assert_eq!(session.client.stats().replayed_dispatches, 3);
    assert!(!session.host.reconnecting());
    assert_eq!(session.host.indicator_history().last(), Some(&false));

    session.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn chaos_disconnects_never_lose_or_reorder_updates() {
    let chaos = ChaosConfig::enabled()
        .with_max_disconnect_after(Duration::from_millis(120))
        .with_reconnect_steps(Duration::from_millis(15), 5);
    let session = LoopbackSession::start(
        ClientConfig::new("page-6").with_chaos(chaos),
        outbox_config("page-6"),
        Arc::new(SeededRandom::new(6)),
    );
    session.connect().await.unwrap();

    for _ in 0..50 {
        session.send_notifications(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(session.wait_for_sequence(SequenceNumber::new(50), Duration::from_secs(30)).await);
    session.client.settle().await.unwrap();

    assert_eq!(session.renderer.sequences(), (1..=50).collect::<Vec<_>>());
    assert_eq!(session.host.reload_count(), 0);
    assert!(session.client.stats().handshake_attempts > 1);

    session.shutdown().await.unwrap();
}

struct Arrivals {
    rendered: Vec<Update>,
    sequences: Vec<u64>,
    absorbed: u64,
    reloads: usize,
    state: SessionState,
}

/// Delivers `order` to a client as indexes into `stream`, either while the
/// first handshake is outstanding or after it has resynced.
async fn deliver(stream: &[UpdateEnvelope], order: &[u64], while_desynced: bool) -> Arrivals {
    let transport = Arc::new(MockTransport::new());
    let renderer = Arc::new(MemoryRenderer::new());
    let host = Arc::new(MemoryHost::new());
    let client = Client::new(
        ClientConfig::new("page-8").with_duplicate_policy(DuplicatePolicy::Absorb),
        transport.clone(),
        renderer.clone(),
        host.clone(),
    )
    .with_random(Arc::new(SeededRandom::new(8)))
    .spawn();
    transport.attach(client.sender());

    transport.connect().await.unwrap();
    client.settle().await.unwrap();
    let token = transport.requests().last().unwrap().resume_token;
    let reply = ResumeReply {
        resume_token: token,
        latest_sequence: SequenceNumber::ZERO,
        messages: Vec::new(),
    };

    let sender = client.sender();
    if !while_desynced {
        sender.resume_reply(reply.clone()).unwrap();
        client.settle().await.unwrap();
    }
    for &n in order {
        sender.update(stream[(n - 1) as usize].clone()).unwrap();
    }
    if while_desynced {
        sender.resume_reply(reply).unwrap();
    }
    client.settle().await.unwrap();

    let arrivals = Arrivals {
        rendered: renderer.applied().into_iter().map(|r| r.update).collect(),
        sequences: renderer.sequences(),
        absorbed: client.stats().absorbed_duplicates,
        reloads: host.reload_count(),
        state: client.state(),
    };
    client.shutdown().await.unwrap();
    arrivals
}

proptest! {
    #![proptest_config(PropTestConfig::session().to_proptest_config())]

    #[test]
    fn any_arrival_order_renders_each_update_once_in_sequence(
        (stream, order) in arrival_order_strategy(24, 8).prop_flat_map(|(len, order)| {
            (envelope_stream_strategy(len, len), Just(order))
        }),
        while_desynced in any::<bool>(),
    ) {
        // Live arrivals must already be in order; only the buffer reorders.
        let mut order = order;
        if !while_desynced {
            order.sort_unstable();
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let arrivals = runtime.block_on(deliver(&stream, &order, while_desynced));

        let len = stream.len() as u64;
        let expected: Vec<Update> = stream.iter().map(|e| e.decode().unwrap()).collect();
        prop_assert_eq!(arrivals.sequences, (1..=len).collect::<Vec<_>>());
        prop_assert_eq!(arrivals.rendered, expected);
        prop_assert_eq!(arrivals.absorbed, order.len() as u64 - len);
        prop_assert_eq!(arrivals.reloads, 0);
        prop_assert_eq!(arrivals.state, SessionState::Connected);
    }

    #[test]
    fn random_losses_are_always_recovered(
        (len, lost) in (2u64..40).prop_flat_map(|len| (Just(len), loss_set_strategy(len, 6))),
        seed in any::<u64>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        let (sequences, reloads) = runtime.block_on(async {
            let session = resync_session("page-7", seed);
            session.connect().await.unwrap();
            for &n in &lost {
                session.link.drop_sequence(SequenceNumber::new(n));
            }
            session.send_notifications(len);

            session
                .wait_for_sequence(SequenceNumber::new(len), Duration::from_secs(10))
                .await;
            session.settle().await.unwrap();

            let result = (session.renderer.sequences(), session.host.reload_count());
            session.shutdown().await.unwrap();
            result
        });

        prop_assert_eq!(sequences, (1..=len).collect::<Vec<_>>());
        prop_assert_eq!(reloads, 0);
    }
}
