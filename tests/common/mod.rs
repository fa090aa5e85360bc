//! Shared utilities for fleet integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use gamefleet::client::SessionIdAllocator;
use gamefleet::config::{MatchmakingConfig, NodeConfig};
use gamefleet::fleet::FleetRegistry;
use gamefleet::matchmaking::{LocalProvisioner, MatchmakingServer};
use gamefleet::node::{GameServer, NodeStats};
use gamefleet::protocol::{opcode, Command, CommandCodec};
use gamefleet::store::StatsStore;
use gamefleet::FleetError;

pub const DEADLINE: Duration = Duration::from_secs(5);

/// Node settings tuned for tests: ephemeral port, fast flushes, long idle.
pub fn node_config(id: &str) -> NodeConfig {
    NodeConfig {
        id: id.to_string(),
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        stat_flush_interval_ms: 10,
        idle_timeout_ms: 30_000,
        close_after_idle_for_ms: 30_000,
        drain_timeout_ms: 1_000,
        ..NodeConfig::default()
    }
}

pub fn matchmaker_config() -> MatchmakingConfig {
    MatchmakingConfig {
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        refresh_interval_ms: 10,
        handshake_timeout_ms: 1_000,
        ..MatchmakingConfig::default()
    }
}

pub struct TestNode {
    pub id: String,
    pub addr: SocketAddr,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<Result<NodeStats, FleetError>>,
}

pub async fn start_node(config: NodeConfig, store: Arc<dyn StatsStore>) -> TestNode {
    let server = GameServer::bind(config, store).await.unwrap();
    let id = server.id().to_string();
    let addr = server.local_addr();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(server.run(cancel.clone()));
    TestNode {
        id,
        addr,
        cancel,
        handle,
    }
}

pub struct TestMatchmaker {
    pub addr: SocketAddr,
    pub registry: Arc<FleetRegistry>,
    pub cancel: CancellationToken,
    pub provisioner: Option<Arc<LocalProvisioner>>,
    pub handle: JoinHandle<Result<(), FleetError>>,
}

impl TestMatchmaker {
    pub async fn stop(self) {
        self.cancel.cancel();
        self.handle.await.unwrap().unwrap();
        if let Some(provisioner) = self.provisioner {
            provisioner.wait().await;
        }
    }
}

/// Start a matchmaker; with `provision_from` set, empty capacity starts
/// in-process nodes built from that template.
pub async fn start_matchmaker(
    config: MatchmakingConfig,
    store: Arc<dyn StatsStore>,
    provision_from: Option<NodeConfig>,
) -> TestMatchmaker {
    let cancel = CancellationToken::new();
    let mut server = MatchmakingServer::bind(config, Arc::clone(&store)).await.unwrap();

    let provisioner = provision_from.map(|template| Arc::new(LocalProvisioner::new(template, store, cancel.child_token())));
    if let Some(provisioner) = &provisioner {
        server = server.with_provisioner(provisioner.clone());
    }

    let addr = server.local_addr();
    let registry = Arc::clone(server.registry());
    let handle = tokio::spawn(server.run(cancel.clone()));
    TestMatchmaker {
        addr,
        registry,
        cancel,
        provisioner,
        handle,
    }
}

/// Poll the store until `id` satisfies `predicate`; panics with the last
/// value seen once `deadline` passes.
pub async fn wait_for_stats<F>(store: &dyn StatsStore, id: &str, predicate: F, deadline: Duration) -> NodeStats
where
    F: Fn(&NodeStats) -> bool,
{
    let started = tokio::time::Instant::now();
    loop {
        let current = store.get(id).await.unwrap();
        if let Some(stats) = &current {
            if predicate(stats) {
                return stats.clone();
            }
        }
        if started.elapsed() > deadline {
            panic!("node {} never matched, last seen: {:?}", id, current);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn counters_are(connections: u64, added: u64, removed: u64) -> impl Fn(&NodeStats) -> bool {
    move |s| s.counters() == (connections, added, removed)
}

/// Dial a node directly and complete the handshake.
pub async fn raw_player(addr: SocketAddr, ids: &SessionIdAllocator) -> Framed<TcpStream, CommandCodec> {
    let mut framed = Framed::new(TcpStream::connect(addr).await.unwrap(), CommandCodec::new());
    framed.send(Command::auth(ids.next_id())).await.unwrap();
    let reply = framed.next().await.unwrap().unwrap();
    assert_eq!(reply.opcode, opcode::READY);
    framed
}
