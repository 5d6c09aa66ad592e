//! Test fixtures and session helpers.
//!
//! Provides a fully wired loopback session.

use crate::loopback::LoopbackLink;
use seqsync_client::{
    Client, ClientConfig, ClientHandle, ClientResult, MemoryHost, MemoryRenderer, OsRandom,
    RandomSource, Transport,
};
use seqsync_outbox::{Outbox, OutboxConfig};
use seqsync_protocol::SequenceNumber;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// An outbox, a loopback link and a client running together.
pub struct LoopbackSession {
    /// The link.
    pub link: Arc<LoopbackLink>,
    /// The peer outbox.
    pub outbox: Arc<Outbox<LoopbackLink>>,
    /// What the client rendered.
    pub renderer: Arc<MemoryRenderer>,
    /// Reloads and indicator changes.
    pub host: Arc<MemoryHost>,
    /// The client session.
    pub client: ClientHandle,
    outbox_task: JoinHandle<()>,
}

impl LoopbackSession {
    /// Starts a session. Both configs must name the same client id.
    pub fn start(
        client_config: ClientConfig,
        outbox_config: OutboxConfig,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let link = LoopbackLink::new();
        let outbox = Arc::new(Outbox::new(outbox_config, link.clone()));
        link.bind_outbox(&outbox);

        let renderer = Arc::new(MemoryRenderer::new());
        let host = Arc::new(MemoryHost::new());
        let client = Client::new(client_config, link.clone(), renderer.clone(), host.clone())
            .with_random(random)
            .spawn();
        link.attach_client(client.sender());

        let outbox_task = {
            let outbox = outbox.clone();
            tokio::spawn(async move { outbox.run().await })
        };

        Self {
            link,
            outbox,
            renderer,
            host,
            client,
            outbox_task,
        }
    }

    /// Starts a session with default configuration.
    pub fn start_default(client_id: &str) -> Self {
        Self::start(
            ClientConfig::new(client_id),
            OutboxConfig::new(client_id)
                .with_loop_intervals(Duration::from_millis(50), Duration::from_millis(5)),
            Arc::new(OsRandom),
        )
    }

    /// Opens the link and waits for the first resync.
    pub async fn connect(&self) -> ClientResult<()> {
        self.link.connect().await?;
        self.settle().await
    }

    /// Queues `count` notifications on the outbox.
    pub fn send_notifications(&self, count: u64) {
        for n in 0..count {
            self.outbox
                .enqueue_message("notify", json!({"message": format!("burst {n}")}));
        }
    }

    /// Waits until the outbox has nothing it can deliver and the client is
    /// quiescent.
    pub async fn settle(&self) -> ClientResult<()> {
        let mut quiet_rounds = 0;
        while quiet_rounds < 2 {
            self.client.settle().await?;
            if self.outbox.has_pending() && self.link.is_up() {
                quiet_rounds = 0;
            } else {
                quiet_rounds += 1;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }

    /// Waits until the client has accepted `target`, or the session is fatal,
    /// or `limit` elapses. Returns true if `target` was reached.
    pub async fn wait_for_sequence(&self, target: SequenceNumber, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.client.last_accepted() >= target {
                return true;
            }
            if self.client.is_fatal() {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.client.last_accepted() >= target
    }

    /// Stops the outbox and the client.
    pub async fn shutdown(self) -> ClientResult<()> {
        self.outbox.stop();
        let _ = self.outbox_task.await;
        self.client.shutdown().await
    }
}
