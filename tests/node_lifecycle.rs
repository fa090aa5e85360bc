//! Node lifecycle against real sockets: counters, idle close, shutdown.

use std::sync::Arc;

use futures_util::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gamefleet::client::SessionIdAllocator;
use gamefleet::node::{GameServer, NodeState};
use gamefleet::protocol::Command;
use gamefleet::FleetError;
use gamefleet::store::{FileStatsStore, MemoryStatsStore, StatsStore};

mod common;

use common::{counters_are, node_config, raw_player, start_node, wait_for_stats, DEADLINE};

#[tokio::test]
async fn idle_node_closes_after_two_windows() {
    let store = MemoryStatsStore::new();
    let mut config = node_config("idle-node");
    config.idle_timeout_ms = 150;
    config.close_after_idle_for_ms = 150;
    let node = start_node(config, Arc::new(store.clone())).await;

    let ids = SessionIdAllocator::new();
    let mut player = raw_player(node.addr, &ids).await;
    let stats = wait_for_stats(&store, &node.id, counters_are(1, 1, 0), DEADLINE).await;
    assert_eq!(stats.state, NodeState::Ready);

    player.send(Command::close()).await.unwrap();
    wait_for_stats(&store, &node.id, counters_are(0, 1, 1), DEADLINE).await;
    wait_for_stats(&store, &node.id, |s| s.state == NodeState::Idle, DEADLINE).await;
    wait_for_stats(&store, &node.id, |s| s.state == NodeState::Closed, DEADLINE).await;

    // The node stops on its own once closed.
    let final_stats = node.handle.await.unwrap().unwrap();
    assert_eq!(final_stats.state, NodeState::Closed);
    assert_eq!(final_stats.counters(), (0, 1, 1));
}

#[tokio::test]
async fn new_connection_revives_idle_node() {
    let store = MemoryStatsStore::new();
    let mut config = node_config("revived");
    config.idle_timeout_ms = 100;
    config.close_after_idle_for_ms = 2_000;
    let node = start_node(config, Arc::new(store.clone())).await;

    wait_for_stats(&store, &node.id, |s| s.state == NodeState::Idle, DEADLINE).await;

    let ids = SessionIdAllocator::new();
    let _player = raw_player(node.addr, &ids).await;
    let stats = wait_for_stats(&store, &node.id, |s| s.state == NodeState::Ready, DEADLINE).await;
    assert_eq!(stats.connections, 1);

    node.cancel.cancel();
    node.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn cancellation_drains_connections_and_persists_closed() {
    let store = MemoryStatsStore::new();
    let node = start_node(node_config("cancelled"), Arc::new(store.clone())).await;

    let ids = SessionIdAllocator::new();
    let mut players = Vec::new();
    for _ in 0..3 {
        players.push(raw_player(node.addr, &ids).await);
    }
    wait_for_stats(&store, &node.id, counters_are(3, 3, 0), DEADLINE).await;

    node.cancel.cancel();
    let final_stats = node.handle.await.unwrap().unwrap();
    assert_eq!(final_stats.state, NodeState::Closed);
    assert_eq!(final_stats.counters(), (0, 3, 3));

    let stored = store.get(&node.id).await.unwrap().unwrap();
    assert_eq!(stored.state, NodeState::Closed);
    assert_eq!(stored.counters(), (0, 3, 3));
}

#[tokio::test]
async fn malformed_frame_still_releases_connection() {
    let store = MemoryStatsStore::new();
    let node = start_node(node_config("malformed"), Arc::new(store.clone())).await;

    let mut stream = TcpStream::connect(node.addr).await.unwrap();
    // Opcode 0x05 with a 4 GiB length.
    stream.write_all(&[0x05, 0xFF, 0xFF, 0xFF, 0xFF]).await.unwrap();

    wait_for_stats(&store, &node.id, counters_are(0, 1, 1), DEADLINE).await;

    node.cancel.cancel();
    node.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn churn_keeps_counters_conserved() {
    let store = MemoryStatsStore::new();
    let node = start_node(node_config("churn"), Arc::new(store.clone())).await;
    let ids = SessionIdAllocator::new();

    let mut tasks = Vec::new();
    for i in 0..40 {
        let ids = ids.clone();
        let addr = node.addr;
        tasks.push(tokio::spawn(async move {
            let mut player = raw_player(addr, &ids).await;
            if i % 2 == 0 {
                player.send(Command::close()).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let stats = wait_for_stats(&store, &node.id, counters_are(0, 40, 40), DEADLINE).await;
    assert!(stats.is_conserved());

    node.cancel.cancel();
    node.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn file_store_tracks_node() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStatsStore::new(dir.path()));
    let node = start_node(node_config("on-disk"), store.clone()).await;

    let ids = SessionIdAllocator::new();
    let player = raw_player(node.addr, &ids).await;
    wait_for_stats(&*store, &node.id, counters_are(1, 1, 0), DEADLINE).await;
    drop(player);
    wait_for_stats(&*store, &node.id, counters_are(0, 1, 1), DEADLINE).await;

    node.cancel.cancel();
    node.handle.await.unwrap().unwrap();

    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].state, NodeState::Closed);
}

#[tokio::test]
async fn store_outage_reaches_error_channel_without_blocking_transitions() {
    let store = MemoryStatsStore::new();
    let mut config = node_config("outage");
    config.idle_timeout_ms = 50;
    config.close_after_idle_for_ms = 50;

    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
    let server = GameServer::bind(config, Arc::new(store.clone()))
        .await
        .unwrap()
        .with_error_channel(errors_tx);
    let id = server.id().to_string();
    store.set_fail_writes(true);

    let final_stats = server.run(CancellationToken::new()).await.unwrap();
    assert_eq!(final_stats.state, NodeState::Closed);

    // Ready -> Idle, Idle -> Closed, and the final Closed write.
    let mut errors = Vec::new();
    while let Some(err) = errors_rx.recv().await {
        errors.push(err);
    }
    assert_eq!(errors.len(), 3, "{:?}", errors);
    assert!(errors.iter().all(|e| matches!(e, FleetError::StoreWrite(_))));

    // Nothing failed silently into the store either.
    let stored = store.get(&id).await.unwrap().unwrap();
    assert_eq!(stored.state, NodeState::Ready);
}
