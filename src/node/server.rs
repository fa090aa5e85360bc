//! Game server node.
//!
//! # Responsibilities
//! - Bind the node listener and publish the initial `Ready` record
//! - Own the lifecycle state machine on a single task
//! - Admit accepted connections and spawn their handlers
//! - Run the idle timer and the stat flusher
//! - Shut down in order: stop accepting, drain handlers, persist `Closed`
//!
//! # Design Decisions
//! - Handlers never touch the counters; they report through `NodeEvent`s so
//!   every mutation happens on the owning task in arrival order
//! - The idle timer is one deadline, re-armed on every connect, disconnect
//!   and transition

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::NodeConfig;
use crate::error::{CloseReason, FleetError};
use crate::net::{Accepted, ConnectionIdAllocator, Listener};
use crate::node::flusher::run_stat_flusher;
use crate::node::handler::{handle_connection, ConnectionGuard, NodeEvent};
use crate::node::lifecycle::NodeLifecycle;
use crate::node::stats::{NodeState, NodeStats};
use crate::store::StatsStore;

pub struct GameServer {
    listener: Listener,
    node: Node,
}

/// Everything the owning task mutates.
struct Node {
    config: NodeConfig,
    lifecycle: NodeLifecycle,
    store: Arc<dyn StatsStore>,
    connection_ids: ConnectionIdAllocator,
    errors: Option<mpsc::UnboundedSender<FleetError>>,
}

/// Channels and tasks that only exist while the node runs.
struct Runtime {
    cancel: CancellationToken,
    events_tx: mpsc::UnboundedSender<NodeEvent>,
    events_rx: mpsc::UnboundedReceiver<NodeEvent>,
    handlers: JoinSet<CloseReason>,
}

impl GameServer {
    /// Bind the listener and persist the initial `Ready` record.
    pub async fn bind(config: NodeConfig, store: Arc<dyn StatsStore>) -> Result<Self, FleetError> {
        let listener = Listener::bind(&config.listen_host, config.listen_port, config.accept_queue_depth).await?;
        let local_addr = listener.local_addr();
        let host = advertised_host(&config, local_addr);

        let stats = NodeStats::new(config.id.clone(), host, local_addr.port());
        store.update(&stats).await.map_err(FleetError::StoreWrite)?;

        tracing::info!(
            node_id = %stats.id,
            address = %stats.address(),
            "Game server ready"
        );

        let lifecycle = NodeLifecycle::new(
            stats,
            config.unit_load,
            config.idle_timeout(),
            config.close_after_idle_for(),
            Arc::clone(&store),
        );

        Ok(Self {
            listener,
            node: Node {
                config,
                lifecycle,
                store,
                connection_ids: ConnectionIdAllocator::new(),
                errors: None,
            },
        })
    }

    /// Forward non-fatal lifecycle errors (store write failures) to `tx`.
    pub fn with_error_channel(mut self, tx: mpsc::UnboundedSender<FleetError>) -> Self {
        self.node.errors = Some(tx);
        self
    }

    pub fn id(&self) -> &str {
        &self.node.config.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> NodeStats {
        self.node.lifecycle.stats().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeStats> {
        self.node.lifecycle.subscribe()
    }

    /// Serve until the node closes itself or `cancel` fires.
    ///
    /// Returns the final stats, or the fatal error that stopped the node.
    pub async fn run(self, cancel: CancellationToken) -> Result<NodeStats, FleetError> {
        let GameServer { listener, node } = self;
        node.run(listener, cancel).await
    }
}

impl Node {
    async fn run(mut self, listener: Listener, cancel: CancellationToken) -> Result<NodeStats, FleetError> {
        let node_cancel = cancel.child_token();
        let span = tracing::info_span!("node", node_id = %self.config.id);

        let (mut accepted, accept_task) = listener.spawn_accept_loop(node_cancel.child_token());

        let flusher_cancel = CancellationToken::new();
        let flusher = tokio::spawn(
            run_stat_flusher(
                self.lifecycle.subscribe(),
                self.lifecycle.stats().clone(),
                Arc::clone(&self.store),
                self.config.stat_flush_interval(),
                flusher_cancel.clone(),
            )
            .instrument(span.clone()),
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut rt = Runtime {
            cancel: node_cancel.clone(),
            events_tx,
            events_rx,
            handlers: JoinSet::new(),
        };

        let outcome = self
            .serve(&mut accepted, &mut rt)
            .instrument(span.clone())
            .await;

        // Stop accepting. Connections still queued were never admitted.
        node_cancel.cancel();
        accepted.close();
        let mut rejected = 0usize;
        while let Some(conn) = accepted.recv().await {
            tracing::debug!(peer_addr = %conn.peer, "Rejecting queued connection");
            rejected += 1;
        }
        if let Err(e) = accept_task.await {
            tracing::warn!(error = %e, "Accept task ended abnormally");
        }

        self.drain(&mut rt).instrument(span.clone()).await;

        flusher_cancel.cancel();
        match flusher.await {
            Ok(summary) => tracing::debug!(
                node_id = %self.config.id,
                writes = summary.writes,
                failures = summary.failures,
                "Stat flusher stopped"
            ),
            Err(e) => tracing::warn!(error = %e, "Stat flusher ended abnormally"),
        }

        // Last write wins over anything the flusher had in flight.
        if let Err(e) = self.lifecycle.close().await {
            self.report(e);
        }

        let final_stats = self.lifecycle.stats().clone();
        tracing::info!(
            node_id = %final_stats.id,
            connections_added = final_stats.connections_added,
            connections_removed = final_stats.connections_removed,
            rejected,
            "Game server stopped"
        );

        outcome.map(|()| final_stats)
    }

    async fn serve(&mut self, accepted: &mut mpsc::Receiver<Accepted>, rt: &mut Runtime) -> Result<(), FleetError> {
        let idle = tokio::time::sleep(self.lifecycle.idle_window());
        tokio::pin!(idle);

        loop {
            tokio::select! {
                _ = rt.cancel.cancelled() => {
                    tracing::info!(node_id = %self.config.id, "Cancellation received");
                    return Ok(());
                }
                Some(event) = rt.events_rx.recv() => {
                    self.apply_event(event)?;
                    idle.as_mut().reset(Instant::now() + self.lifecycle.idle_window());
                }
                Some(conn) = accepted.recv() => {
                    self.admit(conn, rt).await?;
                    idle.as_mut().reset(Instant::now() + self.lifecycle.idle_window());
                }
                Some(joined) = rt.handlers.join_next(), if !rt.handlers.is_empty() => {
                    log_handler_exit(joined);
                }
                _ = &mut idle => {
                    let result = self.lifecycle.on_idle_timer().await;
                    match result {
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => self.report(e),
                        Ok(_) => {}
                    }
                    if self.lifecycle.state() == NodeState::Closed {
                        return Ok(());
                    }
                    idle.as_mut().reset(Instant::now() + self.lifecycle.idle_window());
                }
            }
        }
    }

    async fn admit(&mut self, conn: Accepted, rt: &mut Runtime) -> Result<(), FleetError> {
        match self.lifecycle.admit().await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            // Counted and Ready in memory; only the store is behind.
            Err(e) => self.report(e),
        }

        let connection_id = self.connection_ids.next_id();
        let guard = ConnectionGuard::new(connection_id, rt.events_tx.clone());
        let span = tracing::debug_span!(
            "connection",
            connection_id = %connection_id,
            peer_addr = %conn.peer
        );
        rt.handlers
            .spawn(handle_connection(conn.stream, guard, rt.cancel.child_token()).instrument(span));
        Ok(())
    }

    fn apply_event(&mut self, event: NodeEvent) -> Result<(), FleetError> {
        match event {
            NodeEvent::Disconnected { connection_id } => {
                tracing::trace!(connection_id = %connection_id, "Disconnect recorded");
                self.lifecycle.adjust_connections(-1)
            }
        }
    }

    /// Wait for every handler to finish and apply their decrements.
    async fn drain(&mut self, rt: &mut Runtime) {
        rt.cancel.cancel();
        let drain_timeout = self.config.drain_timeout();

        let drained = tokio::time::timeout(drain_timeout, async {
            while let Some(joined) = rt.handlers.join_next().await {
                log_handler_exit(joined);
            }
        })
        .await;

        if drained.is_err() {
            tracing::error!(
                node_id = %self.config.id,
                remaining = rt.handlers.len(),
                timeout_ms = drain_timeout.as_millis() as u64,
                "Handlers did not drain in time, aborting them"
            );
            rt.handlers.abort_all();
            while rt.handlers.join_next().await.is_some() {}
        }

        // Every guard has been dropped, so every decrement is queued.
        while let Ok(event) = rt.events_rx.try_recv() {
            if let Err(e) = self.apply_event(event) {
                self.report(e);
            }
        }
    }

    fn report(&self, err: FleetError) {
        tracing::error!(node_id = %self.config.id, error = %err, "Node error");
        if let Some(tx) = &self.errors {
            let _ = tx.send(err);
        }
    }
}

fn log_handler_exit(joined: Result<CloseReason, JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "Connection handler panicked");
        }
    }
}

fn advertised_host(config: &NodeConfig, local_addr: SocketAddr) -> String {
    if let Some(host) = &config.advertise_host {
        return host.clone();
    }
    if local_addr.ip().is_unspecified() {
        "127.0.0.1".to_string()
    } else {
        local_addr.ip().to_string()
    }
}
