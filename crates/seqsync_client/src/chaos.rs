//! Periodic simulated disconnects.

use crate::config::ChaosConfig;
use crate::entropy::RandomSource;
use crate::monitor::FatalMarker;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Timings for one simulated disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChaosPlan {
    /// Delay before disconnecting.
    pub disconnect_after: Duration,
    /// Delay between disconnecting and reconnecting.
    pub reconnect_after: Duration,
}

impl ChaosPlan {
    /// Draws random timings within the configured bounds.
    pub fn draw(config: &ChaosConfig, random: &dyn RandomSource) -> Self {
        let max_ms = u64::try_from(config.max_disconnect_after.as_millis()).unwrap_or(u64::MAX);
        let disconnect_after = Duration::from_millis(1 + random.below(max_ms));

        let steps = random.below(u64::from(config.max_reconnect_steps));
        let reconnect_after = config
            .reconnect_step
            .saturating_mul(u32::try_from(steps).unwrap_or(u32::MAX));

        Self {
            disconnect_after,
            reconnect_after,
        }
    }
}

/// Runs a plan against the transport, stopping early once the session is fatal.
pub(crate) async fn execute<T: Transport>(transport: Arc<T>, plan: ChaosPlan, marker: FatalMarker) {
    tokio::time::sleep(plan.disconnect_after).await;
    if marker.is_set() {
        return;
    }
    debug!(after = ?plan.disconnect_after, "simulated disconnect");
    if let Err(err) = transport.disconnect().await {
        warn!(error = %err, "simulated disconnect failed");
    }

    tokio::time::sleep(plan.reconnect_after).await;
    if marker.is_set() {
        return;
    }
    debug!(after = ?plan.reconnect_after, "simulated reconnect");
    if let Err(err) = transport.connect().await {
        warn!(error = %err, "simulated reconnect failed");
    }
}
