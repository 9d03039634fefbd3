//! Periodic eviction of closed channels from the registry.

use std::sync::Weak;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::registry::ChannelRegistry;

/// Sweep `registry` every `period` after `initial_delay`.
///
/// Exits on its own once the registry is dropped; otherwise it is aborted by
/// shutdown. `period` must be non-zero.
pub(crate) async fn run<M: Send + 'static>(
    registry: Weak<ChannelRegistry<M>>,
    initial_delay: Duration,
    period: Duration,
) {
    let mut ticker = time::interval_at(Instant::now() + initial_delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(registry) = registry.upgrade() else {
            break;
        };
        let evicted = registry.sweep();
        if evicted > 0 {
            debug!(evicted, remaining = registry.len(), "swept closed channels");
        }
    }
}
