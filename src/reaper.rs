use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::observability;
use crate::rate_limit::LocalWindows;
use crate::store::WalStore;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Rewrite the booking WAL once it has grown past `threshold` appends.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, cancel: CancellationToken) {
    run_compactor_every(store, threshold, COMPACT_CHECK_INTERVAL, cancel).await;
}

async fn run_compactor_every(
    store: Arc<WalStore>,
    threshold: u64,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let appends = store.appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact().await {
            Ok(()) => {
                metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
                info!("compacted booking WAL after {appends} appends");
            }
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}

/// Drop in-process rate-limit windows that have closed.
pub async fn run_rate_limit_sweeper(windows: Arc<LocalWindows>, cancel: CancellationToken) {
    run_sweeper_every(windows, SWEEP_INTERVAL, cancel).await;
}

async fn run_sweeper_every(
    windows: Arc<LocalWindows>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let live = windows.sweep();
        metrics::gauge!(observability::RATE_LIMIT_LOCAL_KEYS).set(live as f64);
        tracing::debug!("rate-limit sweep: {live} windows live");
    }
}
