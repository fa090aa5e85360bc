//! Diff-based stats flushing.
//!
//! Samples the node's published stats at a fixed cadence and writes to the
//! store only when the sample differs from the last *successful* write. A
//! failed write leaves that baseline untouched, so the next tick retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::node::stats::NodeStats;
use crate::observability::metrics;
use crate::store::StatsStore;

/// What the flusher did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub writes: u64,
    pub failures: u64,
}

/// Run until `cancel` fires.
///
/// `baseline` is the record already in the store when the flusher starts.
pub async fn run_stat_flusher(
    stats: watch::Receiver<NodeStats>,
    baseline: NodeStats,
    store: Arc<dyn StatsStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> FlushSummary {
    let mut summary = FlushSummary::default();
    let mut last_written = baseline;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let sample = stats.borrow().clone();
        if sample.same_sample(&last_written) {
            continue;
        }

        match store.update(&sample).await {
            Ok(()) => {
                tracing::trace!(
                    node_id = %sample.id,
                    state = %sample.state,
                    connections = sample.connections,
                    "Stats flushed"
                );
                metrics::record_store_write("flush", true);
                summary.writes += 1;
                last_written = sample;
            }
            Err(e) => {
                tracing::warn!(node_id = %sample.id, error = %e, "Stats flush failed, will retry");
                metrics::record_store_write("flush", false);
                summary.failures += 1;
            }
        }
    }

    summary
}
