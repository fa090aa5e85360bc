//! Fleet registry.
//!
//! # Responsibilities
//! - Keep the latest `FleetSnapshot` read from the stats store
//! - Poll the store on a fixed interval (the staleness bound)
//! - Answer selections lock-free from the current snapshot
//!
//! # Design Decisions
//! - Snapshot swapped atomically via `ArcSwap`; readers never block the poller
//! - A failed refresh keeps the previous snapshot rather than emptying the fleet
//! - `observe` lets the matchmaker add a node it just started without waiting
//!   for the next poll

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::FleetError;
use crate::fleet::selector::{LeastLoaded, NodeSelector};
use crate::fleet::snapshot::FleetSnapshot;
use crate::node::stats::NodeStats;
use crate::observability::metrics;
use crate::store::{StatsStore, StoreError};

pub struct FleetRegistry {
    store: Arc<dyn StatsStore>,
    current: ArcSwap<FleetSnapshot>,
    selector: Box<dyn NodeSelector>,
}

impl FleetRegistry {
    pub fn new(store: Arc<dyn StatsStore>) -> Self {
        Self::with_selector(store, Box::new(LeastLoaded::new()))
    }

    pub fn with_selector(store: Arc<dyn StatsStore>, selector: Box<dyn NodeSelector>) -> Self {
        Self {
            store,
            current: ArcSwap::from_pointee(FleetSnapshot::empty()),
            selector,
        }
    }

    pub fn snapshot(&self) -> Arc<FleetSnapshot> {
        self.current.load_full()
    }

    /// Re-read the store and swap in the result.
    pub async fn refresh(&self) -> Result<Arc<FleetSnapshot>, StoreError> {
        let stats = self.store.snapshot().await?;
        let snapshot = Arc::new(FleetSnapshot::from_stats(stats));
        self.current.store(Arc::clone(&snapshot));
        metrics::record_fleet_size(snapshot.len());
        tracing::trace!(nodes = snapshot.len(), "Fleet snapshot refreshed");
        Ok(snapshot)
    }

    /// Insert or replace one node in the current snapshot.
    pub fn observe(&self, stats: NodeStats) {
        self.current.rcu(|current| current.with_node(stats.clone()));
    }

    /// Pick a node under `ceiling` from the current snapshot.
    pub fn select_node(&self, ceiling: f64) -> Result<NodeStats, FleetError> {
        let snapshot = self.current.load();
        match self.selector.select(&snapshot, ceiling) {
            Some(node) => {
                metrics::record_selection("selected");
                tracing::debug!(
                    node_id = %node.id,
                    load = node.load,
                    ceiling,
                    snapshot_age_ms = snapshot.age().as_millis() as u64,
                    "Node selected"
                );
                Ok(node.clone())
            }
            None => {
                metrics::record_selection("no_capacity");
                tracing::debug!(nodes = snapshot.len(), ceiling, "No node has capacity");
                Err(FleetError::NoCapacity)
            }
        }
    }

    /// Poll the store every `interval` until `cancel` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_ms = interval.as_millis() as u64, "Fleet registry polling");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        tracing::warn!(
                            error = %e,
                            snapshot_age_ms = self.snapshot().age().as_millis() as u64,
                            "Fleet refresh failed, keeping previous snapshot"
                        );
                    }
                }
            }
        }
        tracing::debug!("Fleet registry stopped");
    }
}
