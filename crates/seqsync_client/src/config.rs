//! Configuration for the client.

use seqsync_protocol::ClientId;
use std::time::Duration;

/// How a duplicate on the live stream is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Escalate to FATAL and reload.
    #[default]
    Fatal,
    /// Drop the duplicate and keep going.
    Absorb,
}

/// How a gap on the live stream is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GapPolicy {
    /// Escalate to FATAL and reload.
    #[default]
    Reload,
    /// Buffer the update and force a reconnect so the handshake can fill the gap.
    Resync,
}

/// Configuration for a client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client page id assigned by the peer.
    pub client_id: ClientId,
    /// Dispatch queue settings.
    pub dispatch: DispatchConfig,
    /// Simulated disconnect settings.
    pub chaos: ChaosConfig,
    /// Live duplicate handling.
    pub duplicate_policy: DuplicatePolicy,
    /// Live gap handling.
    pub gap_policy: GapPolicy,
}

impl ClientConfig {
    /// Creates a new client configuration.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: ClientId::new(client_id),
            dispatch: DispatchConfig::default(),
            chaos: ChaosConfig::default(),
            duplicate_policy: DuplicatePolicy::default(),
            gap_policy: GapPolicy::default(),
        }
    }

    /// Sets the dispatch configuration.
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Sets the chaos configuration.
    pub fn with_chaos(mut self, chaos: ChaosConfig) -> Self {
        self.chaos = chaos;
        self
    }

    /// Sets the live duplicate policy.
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Sets the live gap policy.
    pub fn with_gap_policy(mut self, policy: GapPolicy) -> Self {
        self.gap_policy = policy;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Configuration for the dispatch queue.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of handlers run between cooperative yields.
    pub batch_size: usize,
    /// Pause at each yield; zero yields to the scheduler without sleeping.
    pub yield_pause: Duration,
}

impl DispatchConfig {
    /// Creates a dispatch configuration.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            yield_pause: Duration::ZERO,
        }
    }

    /// Sets the pause at each yield.
    pub fn with_yield_pause(mut self, pause: Duration) -> Self {
        self.yield_pause = pause;
        self
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Configuration for the periodic simulated disconnect.
///
/// After every confirmed handshake the client disconnects at a random time
/// within `max_disconnect_after`, then reconnects after
/// `reconnect_step * k` for a random `k` below `max_reconnect_steps`.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Whether the hook runs at all.
    pub enabled: bool,
    /// Upper bound of the delay before the simulated disconnect.
    pub max_disconnect_after: Duration,
    /// Granularity of the reconnect delay.
    pub reconnect_step: Duration,
    /// Exclusive upper bound of reconnect steps.
    pub max_reconnect_steps: u32,
}

impl ChaosConfig {
    /// Creates an enabled chaos configuration with default timings.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Sets the upper bound of the disconnect delay.
    pub fn with_max_disconnect_after(mut self, delay: Duration) -> Self {
        self.max_disconnect_after = delay;
        self
    }

    /// Sets the reconnect delay granularity and step count.
    pub fn with_reconnect_steps(mut self, step: Duration, max_steps: u32) -> Self {
        self.reconnect_step = step;
        self.max_reconnect_steps = max_steps;
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_disconnect_after: Duration::from_secs(30),
            reconnect_step: Duration::from_secs(1),
            max_reconnect_steps: 10,
        }
    }
}
