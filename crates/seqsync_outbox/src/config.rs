//! Outbox configuration.

use seqsync_protocol::ClientId;
use std::time::Duration;

/// History kept for shared clients, which have no single reconnect window.
const SHARED_HISTORY: Duration = Duration::from_secs(30);

/// Configuration for a client outbox.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Client this outbox serves.
    pub client_id: ClientId,
    /// Explicit history window; derived from the connection timings if unset.
    pub history_duration: Option<Duration>,
    /// Maximum number of history entries.
    pub history_max_length: usize,
    /// Whether the client is shared between several browsers.
    pub shared: bool,
    /// Socket ping interval.
    pub ping_interval: Duration,
    /// Socket ping timeout.
    pub ping_timeout: Duration,
    /// How long the client waits before giving up on a reconnect.
    pub reconnect_timeout: Duration,
    /// Longest wait for new work before the loop re-checks its stop flag.
    pub idle_wait: Duration,
    /// Poll interval while the emitter is disconnected.
    pub disconnected_poll: Duration,
}

impl OutboxConfig {
    /// Creates a configuration for a client.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: ClientId::new(client_id),
            history_duration: None,
            history_max_length: 1000,
            shared: false,
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(20),
            reconnect_timeout: Duration::from_secs(3),
            idle_wait: Duration::from_secs(1),
            disconnected_poll: Duration::from_millis(100),
        }
    }

    /// Sets an explicit history window. Zero disables the history.
    pub fn with_history_duration(mut self, duration: Duration) -> Self {
        self.history_duration = Some(duration);
        self
    }

    /// Sets the maximum number of history entries.
    pub fn with_history_max_length(mut self, length: usize) -> Self {
        self.history_max_length = length;
        self
    }

    /// Marks the client as shared.
    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    /// Sets the socket timings the history window is derived from.
    pub fn with_timings(
        mut self,
        ping_interval: Duration,
        ping_timeout: Duration,
        reconnect_timeout: Duration,
    ) -> Self {
        self.ping_interval = ping_interval;
        self.ping_timeout = ping_timeout;
        self.reconnect_timeout = reconnect_timeout;
        self
    }

    /// Sets the loop wait and poll intervals.
    pub fn with_loop_intervals(mut self, idle_wait: Duration, disconnected_poll: Duration) -> Self {
        self.idle_wait = idle_wait;
        self.disconnected_poll = disconnected_poll;
        self
    }

    /// Returns the effective history window.
    pub fn resolved_history_duration(&self) -> Duration {
        match self.history_duration {
            Some(duration) => duration,
            None if self.shared => SHARED_HISTORY,
            None => self.ping_interval + self.ping_timeout + self.reconnect_timeout,
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self::new("")
    }
}
