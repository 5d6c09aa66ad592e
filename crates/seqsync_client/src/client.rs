//! Tokio runtime for a client session.

use crate::chaos::{self, ChaosPlan};
use crate::config::ClientConfig;
use crate::dispatch::{DispatchQueue, DispatchStats, TaskYielder};
use crate::entropy::{OsRandom, RandomSource};
use crate::error::{ClientError, ClientResult};
use crate::monitor::{FatalMarker, SessionState};
use crate::render::{render_envelope, DispatchContext, Host, Renderer};
use crate::session::{Effect, SessionCore, SessionEvent, SessionStats};
use crate::tab::{MemoryTabStore, TabStore};
use crate::transport::Transport;
use parking_lot::Mutex;
use seqsync_protocol::{HandshakeRequest, ResumeReply, SequenceNumber, UpdateEnvelope};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

enum Inbound {
    Event(SessionEvent),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable handle for feeding transport events into a session.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl EventSender {
    /// Sends an event.
    pub fn send(&self, event: SessionEvent) -> ClientResult<()> {
        self.tx
            .send(Inbound::Event(event))
            .map_err(|_| ClientError::Closed)
    }

    /// Reports a (re)connect.
    pub fn connected(&self) -> ClientResult<()> {
        self.send(SessionEvent::Connected)
    }

    /// Reports a lost connection.
    pub fn disconnected(&self) -> ClientResult<()> {
        self.send(SessionEvent::Disconnected)
    }

    /// Reports a failed connect attempt.
    pub fn connect_error(&self, timed_out: bool) -> ClientResult<()> {
        self.send(SessionEvent::ConnectError { timed_out })
    }

    /// Reports that the transport gave up reconnecting.
    pub fn try_reconnect(&self) -> ClientResult<()> {
        self.send(SessionEvent::TryReconnect)
    }

    /// Delivers an inbound update.
    pub fn update(&self, envelope: UpdateEnvelope) -> ClientResult<()> {
        self.send(SessionEvent::Update(envelope))
    }

    /// Delivers a resume reply.
    pub fn resume_reply(&self, reply: ResumeReply) -> ClientResult<()> {
        self.send(SessionEvent::ResumeReply(reply))
    }

    /// Returns true once the session task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Default)]
struct Shared {
    stats: Mutex<SessionStats>,
    last_accepted: AtomicU64,
    processed: AtomicU64,
    in_flight: AtomicUsize,
}

/// Builder for a client session.
pub struct Client<T, R, H> {
    config: ClientConfig,
    transport: Arc<T>,
    renderer: Arc<R>,
    host: Arc<H>,
    random: Arc<dyn RandomSource>,
    tab_store: Arc<dyn TabStore>,
}

impl<T: Transport, R: Renderer, H: Host> Client<T, R, H> {
    /// Creates a client with OS randomness and an in-memory tab store.
    pub fn new(config: ClientConfig, transport: Arc<T>, renderer: Arc<R>, host: Arc<H>) -> Self {
        Self {
            config,
            transport,
            renderer,
            host,
            random: Arc::new(OsRandom),
            tab_store: Arc::new(MemoryTabStore::new()),
        }
    }

    /// Sets the random source.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Sets the tab identity store.
    pub fn with_tab_store(mut self, tab_store: Arc<dyn TabStore>) -> Self {
        self.tab_store = tab_store;
        self
    }

    /// Starts the session and dispatch tasks on the current tokio runtime.
    pub fn spawn(self) -> ClientHandle {
        let core = SessionCore::new(&self.config, self.random, self.tab_store);
        let marker = core.fatal_marker();
        let (state_tx, state_rx) = watch::channel(core.state());
        let (tx, rx) = mpsc::unbounded_channel();

        let queue = DispatchQueue::new(self.config.dispatch.batch_size, marker.clone());
        let drain = tokio::spawn(
            queue
                .clone()
                .run(TaskYielder::new(self.config.dispatch.yield_pause)),
        );

        let shared = Arc::new(Shared::default());
        let driver = Driver {
            core,
            queue: queue.clone(),
            transport: self.transport,
            renderer: self.renderer,
            host: self.host,
            inbox: rx,
            loopback: tx.downgrade(),
            shared: shared.clone(),
            state: state_tx,
            chaos: None,
        };
        let driver = tokio::spawn(driver.run());

        info!(client_id = %self.config.client_id, "client session started");
        ClientHandle {
            sender: EventSender { tx },
            state: state_rx,
            shared,
            queue,
            marker,
            driver,
            drain,
        }
    }
}

struct Driver<T, R, H> {
    core: SessionCore,
    queue: DispatchQueue,
    transport: Arc<T>,
    renderer: Arc<R>,
    host: Arc<H>,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    loopback: mpsc::WeakUnboundedSender<Inbound>,
    shared: Arc<Shared>,
    state: watch::Sender<SessionState>,
    chaos: Option<JoinHandle<()>>,
}

impl<T: Transport, R: Renderer, H: Host> Driver<T, R, H> {
    async fn run(mut self) {
        while let Some(inbound) = self.inbox.recv().await {
            match inbound {
                Inbound::Event(event) => {
                    let effects = self.core.handle(event);
                    for effect in effects {
                        self.execute(effect);
                    }
                    *self.shared.stats.lock() = self.core.stats();
                    self.shared
                        .last_accepted
                        .store(self.core.last_accepted().get(), Ordering::Release);
                    let current = self.core.state();
                    self.state.send_if_modified(|state| {
                        let changed = *state != current;
                        *state = current;
                        changed
                    });
                    self.shared.processed.fetch_add(1, Ordering::AcqRel);
                }
                Inbound::Flush(done) => {
                    let _ = done.send(());
                }
                Inbound::Shutdown => break,
            }
        }

        if let Some(chaos) = self.chaos.take() {
            chaos.abort();
        }
        debug!("session task stopped");
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Dispatch { envelope, origin } => {
                let renderer = self.renderer.clone();
                let ctx = DispatchContext {
                    sequence: envelope.sequence,
                    origin,
                };
                self.queue
                    .enqueue(Box::new(move || render_envelope(renderer.as_ref(), &ctx, &envelope)));
            }
            Effect::ShowReconnecting(visible) => {
                let host = self.host.clone();
                self.queue.enqueue(Box::new(move || {
                    host.set_reconnecting(visible);
                    Ok(())
                }));
            }
            Effect::SendHandshake(request) => self.send_handshake(request),
            Effect::ScheduleChaos(plan) => self.schedule_chaos(plan),
            Effect::Reconnect => self.reconnect(),
            Effect::Reload(reason) => {
                warn!(%reason, "reloading");
                self.host.reload(&reason);
            }
        }
    }

    fn send_handshake(&self, request: HandshakeRequest) {
        let transport = self.transport.clone();
        let loopback = self.loopback.clone();
        let shared = self.shared.clone();
        let token = request.resume_token;

        shared.in_flight.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            let ok = match transport.handshake(request).await {
                Ok(ok) => ok,
                Err(err) => {
                    warn!(error = %err, %token, "handshake failed");
                    false
                }
            };
            if let Some(tx) = loopback.upgrade() {
                let _ = tx.send(Inbound::Event(SessionEvent::HandshakeAcknowledged { token, ok }));
            }
            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }

    fn schedule_chaos(&mut self, plan: ChaosPlan) {
        if let Some(previous) = self.chaos.take() {
            previous.abort();
        }
        let transport = self.transport.clone();
        let marker = self.core.fatal_marker();
        self.chaos = Some(tokio::spawn(chaos::execute(transport, plan, marker)));
    }

    fn reconnect(&self) {
        let transport = self.transport.clone();
        let shared = self.shared.clone();

        shared.in_flight.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(async move {
            if let Err(err) = transport.disconnect().await {
                warn!(error = %err, "disconnect for resync failed");
            }
            if let Err(err) = transport.connect().await {
                warn!(error = %err, "reconnect for resync failed");
            }
            shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

/// Handle to a running client session.
pub struct ClientHandle {
    sender: EventSender,
    state: watch::Receiver<SessionState>,
    shared: Arc<Shared>,
    queue: DispatchQueue,
    marker: FatalMarker,
    driver: JoinHandle<()>,
    drain: JoinHandle<()>,
}

impl ClientHandle {
    /// Returns a sender for transport events.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Returns true once the session is fatal.
    pub fn is_fatal(&self) -> bool {
        self.marker.is_set()
    }

    /// Returns a snapshot of the session counters.
    pub fn stats(&self) -> SessionStats {
        *self.shared.stats.lock()
    }

    /// Returns the last accepted sequence.
    pub fn last_accepted(&self) -> SequenceNumber {
        SequenceNumber::new(self.shared.last_accepted.load(Ordering::Acquire))
    }

    /// Returns a snapshot of the dispatch counters.
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.queue.stats()
    }

    /// Waits until every event sent so far has been handled.
    pub async fn flush(&self) -> ClientResult<()> {
        let (done, wait) = oneshot::channel();
        self.sender
            .tx
            .send(Inbound::Flush(done))
            .map_err(|_| ClientError::Closed)?;
        wait.await.map_err(|_| ClientError::Closed)
    }

    /// Waits until the session is quiescent.
    ///
    /// Quiescent means every sent event was handled, no handshake or resync
    /// reconnect is in flight, and the dispatch queue is idle. Pending chaos
    /// timers are not waited for.
    pub async fn settle(&self) -> ClientResult<()> {
        loop {
            self.flush().await?;
            self.queue.wait_idle().await;
            if self.shared.in_flight.load(Ordering::Acquire) > 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
                continue;
            }

            let mark = self.shared.processed.load(Ordering::Acquire);
            self.flush().await?;
            self.queue.wait_idle().await;
            if self.shared.processed.load(Ordering::Acquire) == mark
                && self.shared.in_flight.load(Ordering::Acquire) == 0
            {
                return Ok(());
            }
        }
    }

    /// Stops the session once queued events and handlers have run.
    pub async fn shutdown(self) -> ClientResult<()> {
        self.settle().await?;
        let _ = self.sender.tx.send(Inbound::Shutdown);
        let _ = self.driver.await;
        self.queue.close();
        let _ = self.drain.await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChaosConfig, DispatchConfig};
    use crate::entropy::SeededRandom;
    use crate::monitor::FatalReason;
    use crate::render::{MemoryHost, MemoryRenderer};
    use crate::transport::MockTransport;
    use seqsync_protocol::SequencedEnvelope;
    use serde_json::json;

    struct Harness {
        transport: Arc<MockTransport>,
        renderer: Arc<MemoryRenderer>,
        host: Arc<MemoryHost>,
        handle: ClientHandle,
    }

    fn start(config: ClientConfig) -> Harness {
        let transport = Arc::new(MockTransport::new());
        let renderer = Arc::new(MemoryRenderer::new());
        let host = Arc::new(MemoryHost::new());
        let handle = Client::new(config, transport.clone(), renderer.clone(), host.clone())
            .with_random(Arc::new(SeededRandom::new(5)))
            .spawn();
        transport.attach(handle.sender());
        Harness {
            transport,
            renderer,
            host,
            handle,
        }
    }

    fn notify(n: u64) -> UpdateEnvelope {
        UpdateEnvelope::sequenced(
            "notify",
            SequenceNumber::new(n),
            json!({"message": n.to_string()}),
        )
    }

    async fn connect(harness: &Harness, messages: Vec<SequencedEnvelope>, latest: u64) {
        harness.transport.connect().await.unwrap();
        harness.handle.settle().await.unwrap();
        let token = harness
            .transport
            .requests()
            .last()
            .map(|request| request.resume_token)
            .unwrap();
        harness
            .handle
            .sender()
            .resume_reply(ResumeReply {
                resume_token: token,
                latest_sequence: SequenceNumber::new(latest),
                messages,
            })
            .unwrap();
        harness.handle.settle().await.unwrap();
    }

    #[tokio::test]
    async fn live_updates_render_in_order() {
        let harness = start(ClientConfig::new("c"));
        connect(&harness, Vec::new(), 0).await;
        assert_eq!(harness.handle.state(), SessionState::Connected);

        let sender = harness.handle.sender();
        for n in 1..=30 {
            sender.update(notify(n)).unwrap();
        }
        harness.handle.settle().await.unwrap();

        assert_eq!(harness.renderer.sequences(), (1..=30).collect::<Vec<_>>());
        assert_eq!(harness.handle.last_accepted(), SequenceNumber::new(30));
        assert_eq!(harness.handle.stats().live_dispatches, 30);
        assert!(harness.handle.dispatch_stats().yields > 0);
        assert_eq!(harness.host.indicator_history(), vec![false]);
    }

    #[tokio::test]
    async fn concurrent_producers_are_serialized() {
        let harness = start(
            ClientConfig::new("c").with_duplicate_policy(crate::config::DuplicatePolicy::Absorb),
        );
        connect(&harness, Vec::new(), 0).await;

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let sender = harness.handle.sender();
            tasks.push(tokio::spawn(async move {
                for n in 1..=20 {
                    if sender.update(notify(n)).is_err() {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        harness.handle.settle().await.unwrap();

        assert_eq!(harness.renderer.sequences(), (1..=20).collect::<Vec<_>>());
        assert_eq!(harness.handle.stats().absorbed_duplicates, 60);
        assert!(!harness.handle.is_fatal());
    }

    #[tokio::test]
    async fn resync_after_disconnect_replays_missing_updates() {
        let harness = start(ClientConfig::new("c"));
        connect(&harness, Vec::new(), 0).await;

        let sender = harness.handle.sender();
        for n in 1..=10 {
            sender.update(notify(n)).unwrap();
        }
        harness.transport.disconnect().await.unwrap();
        sender.update(notify(11)).unwrap();
        sender.update(notify(13)).unwrap();
        harness.handle.settle().await.unwrap();
        assert_eq!(harness.handle.state(), SessionState::Desynced);
        assert!(harness.host.reconnecting());

        let replay = (11..=14)
            .map(|n| SequencedEnvelope::new("notify", SequenceNumber::new(n), json!({})))
            .collect();
        connect(&harness, replay, 14).await;

        assert_eq!(harness.renderer.sequences(), (1..=14).collect::<Vec<_>>());
        assert_eq!(harness.handle.stats().replayed_dispatches, 4);
        assert!(!harness.host.reconnecting());
        assert_eq!(
            harness.transport.requests().last().unwrap().last_accepted_sequence,
            SequenceNumber::new(10)
        );
    }

    #[tokio::test]
    async fn gap_reloads_once_and_stops_dispatch() {
        let harness = start(ClientConfig::new("c"));
        connect(&harness, Vec::new(), 0).await;

        let sender = harness.handle.sender();
        for n in 1..=5 {
            sender.update(notify(n)).unwrap();
        }
        harness.handle.settle().await.unwrap();
        for n in [7, 6, 8] {
            sender.update(notify(n)).unwrap();
        }
        harness.handle.settle().await.unwrap();

        assert_eq!(
            harness.host.reloads(),
            vec![FatalReason::SequenceGap {
                expected: SequenceNumber::new(6),
                received: SequenceNumber::new(7),
            }]
        );
        assert!(harness.handle.is_fatal());
        assert_eq!(harness.handle.state(), SessionState::Fatal);
        assert_eq!(harness.renderer.sequences(), vec![1, 2, 3, 4, 5]);

        let stats = harness.handle.dispatch_stats();
        assert_eq!(stats.executed, 5);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn rejected_handshake_reloads() {
        let harness = start(ClientConfig::new("c"));
        harness.transport.set_accept(false);

        harness.transport.connect().await.unwrap();
        harness.handle.settle().await.unwrap();

        assert_eq!(harness.host.reloads(), vec![FatalReason::HandshakeRejected]);
    }

    #[tokio::test]
    async fn failed_handshake_counts_as_rejection() {
        let harness = start(ClientConfig::new("c"));
        harness.transport.fail_handshakes("peer unreachable");

        harness.transport.connect().await.unwrap();
        harness.handle.settle().await.unwrap();

        assert_eq!(harness.host.reloads(), vec![FatalReason::HandshakeRejected]);
    }

    #[tokio::test]
    async fn handler_failure_is_skipped() {
        let harness = start(ClientConfig::new("c"));
        harness.renderer.fail_on(SequenceNumber::new(2));
        connect(&harness, Vec::new(), 0).await;

        let sender = harness.handle.sender();
        for n in 1..=3 {
            sender.update(notify(n)).unwrap();
        }
        harness.handle.settle().await.unwrap();

        assert_eq!(harness.renderer.sequences(), vec![1, 3]);
        assert_eq!(harness.handle.dispatch_stats().failed, 1);
        assert!(!harness.handle.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn chaos_cycles_the_connection() {
        let chaos = ChaosConfig::enabled()
            .with_max_disconnect_after(Duration::from_millis(50))
            .with_reconnect_steps(Duration::from_millis(10), 3);
        let harness = start(
            ClientConfig::new("c")
                .with_chaos(chaos)
                .with_dispatch(DispatchConfig::new(10)),
        );
        connect(&harness, Vec::new(), 0).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        harness.handle.settle().await.unwrap();

        assert!(harness.transport.disconnects() >= 1);
        assert!(harness.transport.connects() >= 2);
        assert!(harness.transport.requests().len() >= 2);
    }

    #[tokio::test]
    async fn shutdown_closes_the_sender() {
        let harness = start(ClientConfig::new("c"));
        let sender = harness.handle.sender();

        harness.handle.shutdown().await.unwrap();
        assert!(matches!(sender.connected(), Err(ClientError::Closed)));
    }
}
