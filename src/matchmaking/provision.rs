//! On-demand node provisioning.
//!
//! When the registry has no node under the ceiling, the matchmaker may ask a
//! `Provisioner` for a new one instead of rejecting the player.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::FleetError;
use crate::node::server::GameServer;
use crate::node::stats::NodeStats;
use crate::store::StatsStore;

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Start a node and return its initial (already persisted) stats.
    async fn provision(&self) -> Result<NodeStats, FleetError>;
}

/// Starts nodes inside the current process on ephemeral ports.
pub struct LocalProvisioner {
    template: NodeConfig,
    store: Arc<dyn StatsStore>,
    cancel: CancellationToken,
    nodes: Mutex<JoinSet<()>>,
}

impl LocalProvisioner {
    /// Nodes are built from `template` with a fresh id and port 0, share
    /// `store`, and stop when `cancel` fires.
    pub fn new(template: NodeConfig, store: Arc<dyn StatsStore>, cancel: CancellationToken) -> Self {
        Self {
            template,
            store,
            cancel,
            nodes: Mutex::new(JoinSet::new()),
        }
    }

    /// Nodes started so far that have not yet stopped.
    pub async fn running(&self) -> usize {
        let mut nodes = self.nodes.lock().await;
        reap(&mut nodes);
        nodes.len()
    }

    /// Wait for every provisioned node to stop.
    pub async fn wait(&self) {
        let mut nodes = self.nodes.lock().await;
        while nodes.join_next().await.is_some() {}
    }
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn provision(&self) -> Result<NodeStats, FleetError> {
        let mut config = self.template.clone();
        config.id = format!("local-{}", uuid::Uuid::new_v4().simple());
        config.listen_port = 0;

        let server = GameServer::bind(config, Arc::clone(&self.store)).await?;
        let stats = server.stats();
        let node_id = stats.id.clone();
        let cancel = self.cancel.child_token();

        let mut nodes = self.nodes.lock().await;
        reap(&mut nodes);
        nodes.spawn(async move {
            match server.run(cancel).await {
                Ok(final_stats) => tracing::info!(
                    node_id = %node_id,
                    connections_added = final_stats.connections_added,
                    "Provisioned node exited"
                ),
                Err(e) => tracing::error!(node_id = %node_id, error = %e, "Provisioned node failed"),
            }
        });
        drop(nodes);

        tracing::info!(node_id = %stats.id, address = %stats.address(), "Provisioned local node");
        Ok(stats)
    }
}

/// Drop the tasks of nodes that have already stopped.
fn reap(nodes: &mut JoinSet<()>) {
    while let Some(joined) = nodes.try_join_next() {
        if let Err(e) = joined {
            if e.is_panic() {
                tracing::error!(error = %e, "Provisioned node task panicked");
            }
        }
    }
}
