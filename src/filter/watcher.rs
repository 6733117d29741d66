//! Hot-reload watcher.
//!
//! Polls every registered module source on a fixed interval and lets the
//! registry swap in new generations. File reads happen on the runtime
//! thread; sources are small rule files and reloads are rare, so blocking
//! here is acceptable.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::registry::FilterRegistry;

/// Spawn the reload watcher task.
pub fn spawn(
    registry: Arc<FilterRegistry>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; discovery already loaded
        // everything, so skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("reload watcher stopping");
                    break;
                }
                _ = ticker.tick() => {
                    registry.poll();
                }
            }
        }
    })
}
