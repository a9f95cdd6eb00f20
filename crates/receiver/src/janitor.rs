//! Periodic eviction of stale terminal sessions.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::CleanupConfig;
use crate::registry::StatusRegistry;
use crate::store::ChunkStore;

/// Spawns the cleanup sweep task. Every `sweep_interval` it evicts
/// terminal sessions older than `cleanup_delay` and removes their temp
/// directories. Runs until the token is cancelled.
pub fn spawn_janitor(
    registry: Arc<StatusRegistry>,
    store: ChunkStore,
    config: CleanupConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.sweep_interval);
        interval.tick().await; // Skip immediate first tick.

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let evicted = registry.cleanup_older_than(config.cleanup_delay);
                    for id in &evicted {
                        store.cleanup(id).await;
                    }
                    if !evicted.is_empty() {
                        tracing::info!(count = evicted.len(), "janitor sweep evicted sessions");
                    }
                }
            }
        }
    })
}
