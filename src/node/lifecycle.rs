//! Node lifecycle state machine.
//!
//! ```text
//!   Ready ──(idle window, 0 conns)──▶ Idle ──(idle window again, 0 conns)──▶ Closed
//!     ▲                                 │
//!     └─────────────(admit)─────────────┘
//!
//!   Ready / Idle ──(cancellation)──▶ Closed        Closed is terminal
//! ```
//!
//! `NodeLifecycle` is owned by exactly one task (the node's run loop), so it
//! needs no lock: counter updates and transitions arrive as messages to that
//! task and are applied one at a time. Every transition is written to the
//! stats store before the triggering call returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::FleetError;
use crate::node::stats::{NodeState, NodeStats};
use crate::observability::metrics;
use crate::store::StatsStore;

pub struct NodeLifecycle {
    stats: NodeStats,
    unit_load: f64,
    idle_timeout: Duration,
    close_after_idle_for: Duration,
    store: Arc<dyn StatsStore>,
    publisher: watch::Sender<NodeStats>,
}

impl NodeLifecycle {
    pub fn new(
        stats: NodeStats,
        unit_load: f64,
        idle_timeout: Duration,
        close_after_idle_for: Duration,
        store: Arc<dyn StatsStore>,
    ) -> Self {
        let (publisher, _) = watch::channel(stats.clone());
        Self {
            stats,
            unit_load,
            idle_timeout,
            close_after_idle_for,
            store,
            publisher,
        }
    }

    pub fn state(&self) -> NodeState {
        self.stats.state
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Receives every in-memory change; the stat flusher samples this.
    pub fn subscribe(&self) -> watch::Receiver<NodeStats> {
        self.publisher.subscribe()
    }

    /// How long the idle timer should run from now.
    pub fn idle_window(&self) -> Duration {
        match self.stats.state {
            NodeState::Idle => self.close_after_idle_for,
            NodeState::Ready | NodeState::Closed => self.idle_timeout,
        }
    }

    /// Apply a counter delta without touching the state.
    pub fn adjust_connections(&mut self, delta: i64) -> Result<(), FleetError> {
        self.stats.adjust(delta, self.unit_load)?;
        self.publish();
        metrics::record_node_connections(&self.stats.id, self.stats.connections);
        Ok(())
    }

    /// Count a new connection, reviving an idle node.
    ///
    /// A `StoreWrite` error means the connection was counted and the node is
    /// `Ready` in memory, but the store still shows the old state.
    pub async fn admit(&mut self) -> Result<(), FleetError> {
        if self.stats.state == NodeState::Closed {
            return Err(FleetError::InvariantViolation(format!(
                "node {} received a connection after closing",
                self.stats.id
            )));
        }
        self.adjust_connections(1)?;
        if self.stats.state == NodeState::Idle {
            self.transition(NodeState::Ready).await?;
        }
        Ok(())
    }

    /// The idle timer fired. Returns the state after handling it.
    pub async fn on_idle_timer(&mut self) -> Result<NodeState, FleetError> {
        if self.stats.connections > 0 {
            return Ok(self.stats.state);
        }
        match self.stats.state {
            NodeState::Ready => self.transition(NodeState::Idle).await?,
            NodeState::Idle => self.transition(NodeState::Closed).await?,
            NodeState::Closed => {}
        }
        Ok(self.stats.state)
    }

    /// Enter `Closed` and persist the final record. Also used to re-persist
    /// after the stat flusher has stopped, so the store ends on this value.
    pub async fn close(&mut self) -> Result<(), FleetError> {
        if self.stats.connections > 0 {
            tracing::error!(
                node_id = %self.stats.id,
                connections = self.stats.connections,
                "Closing with live connections"
            );
        }
        self.transition(NodeState::Closed).await
    }

    /// Set, publish, then persist. The in-memory state is not rolled back if
    /// the write fails; the flusher retries on its next sample.
    async fn transition(&mut self, to: NodeState) -> Result<(), FleetError> {
        let from = self.stats.state;
        self.stats.state = to;
        self.publish();
        metrics::record_node_state(&self.stats.id, to);

        if from != to {
            tracing::info!(
                node_id = %self.stats.id,
                from = %from,
                to = %to,
                connections = self.stats.connections,
                "Node state changed"
            );
        }

        match self.store.update(&self.stats).await {
            Ok(()) => {
                metrics::record_store_write("transition", true);
                Ok(())
            }
            Err(e) => {
                metrics::record_store_write("transition", false);
                Err(FleetError::StoreWrite(e))
            }
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.stats.clone());
    }
}
