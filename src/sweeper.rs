use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Periodically anonymize bookings past the retention horizon.
/// The first sweep runs immediately.
pub async fn run_retention_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.anonymize_expired().await {
            Ok(0) => debug!("retention sweep: nothing to anonymize"),
            Ok(n) => info!("retention sweep anonymized {n} booking(s)"),
            // retried on the next tick
            Err(e) => warn!("retention sweep failed: {e}"),
        }
    }
}

/// Compact the WAL once it has grown by `threshold` appends.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    run_compactor_every(engine, threshold, Duration::from_secs(30)).await
}

async fn run_compactor_every(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if compact_if_due(&engine, threshold).await {
            info!("WAL compacted (threshold {threshold})");
        }
    }
}

async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if threshold == 0 || appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            warn!("WAL compaction after {appends} appends failed: {e}");
            false
        }
    }
}
