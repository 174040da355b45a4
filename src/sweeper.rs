use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Background task that persists time-driven status changes.
/// Reads stay correct without it; it only keeps stored rows from lagging.
pub async fn run_sweeper(engine: Arc<Engine>, period: Duration, shutdown: CancellationToken) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        match engine.sweep(engine.clock.now()).await {
            Ok(0) => {}
            Ok(n) => debug!("sweep updated {n} bookings"),
            Err(e) => warn!("sweep failed: {e}"),
        }
    }
    info!("sweeper stopped");
}

/// Background task that drops day-off and suppressed-slot entries in the past.
pub async fn run_retention(engine: Arc<Engine>, period: Duration, shutdown: CancellationToken) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        if let Err(e) = engine.purge_expired_overrides(engine.clock.today()).await {
            warn!("override retention failed: {e}");
        }
    }
    info!("retention stopped");
}

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(
    engine: Arc<Engine>,
    period: Duration,
    threshold: u64,
    shutdown: CancellationToken,
) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        debug!("{appends} appends since last compaction, compacting");
        if let Err(e) = engine.compact_wal().await {
            warn!("WAL compaction failed: {e}");
        }
    }
    info!("compactor stopped");
}
