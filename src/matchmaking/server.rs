//! Matchmaking entry point.
//!
//! # Responsibilities
//! - Accept player connections and read their AUTH frame
//! - Select a node under the load ceiling (provisioning one if allowed)
//! - Proxy the session to the node, or redirect the player to it
//! - Reject with a distinguishable code instead of hanging
//!
//! # Design Decisions
//! - One task per player; the registry is shared and lock-free to read
//! - Provisioning is serialised so a burst of players shares one new node
//! - Proxy mode splices raw bytes once the handshake is forwarded; the
//!   matchmaker never interprets game traffic

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::client::SessionId;
use crate::config::{MatchmakingConfig, MatchmakingMode};
use crate::error::{CloseReason, FleetError};
use crate::fleet::FleetRegistry;
use crate::matchmaking::provision::Provisioner;
use crate::net::{Accepted, Listener};
use crate::node::stats::NodeStats;
use crate::observability::metrics;
use crate::protocol::{opcode, AssignMode, Assignment, Command, CommandCodec, RejectCode, Rejection};
use crate::store::StatsStore;

type PlayerStream = Framed<TcpStream, CommandCodec>;

pub struct MatchmakingServer {
    config: MatchmakingConfig,
    listener: Listener,
    registry: Arc<FleetRegistry>,
    provisioner: Option<Arc<dyn Provisioner>>,
}

/// State shared by every player task.
struct Context {
    config: MatchmakingConfig,
    registry: Arc<FleetRegistry>,
    provisioner: Option<Arc<dyn Provisioner>>,
    provision_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl MatchmakingServer {
    pub async fn bind(config: MatchmakingConfig, store: Arc<dyn StatsStore>) -> Result<Self, FleetError> {
        let listener = Listener::bind(&config.listen_host, config.listen_port, config.accept_queue_depth).await?;
        tracing::info!(
            address = %listener.local_addr(),
            mode = ?config.mode,
            max_load = config.max_load,
            "Matchmaker bound"
        );
        Ok(Self {
            config,
            listener,
            registry: Arc::new(FleetRegistry::new(store)),
            provisioner: None,
        })
    }

    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &Arc<FleetRegistry> {
        &self.registry
    }

    /// Serve players until `cancel` fires, then wait for their tasks.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), FleetError> {
        let MatchmakingServer {
            config,
            listener,
            registry,
            provisioner,
        } = self;

        if let Err(e) = registry.refresh().await {
            tracing::warn!(error = %e, "Initial fleet refresh failed, starting empty");
        }
        let poller = tokio::spawn(Arc::clone(&registry).run(config.refresh_interval(), cancel.child_token()));
        let (mut accepted, accept_task) = listener.spawn_accept_loop(cancel.child_token());

        let ctx = Arc::new(Context {
            config,
            registry,
            provisioner,
            provision_lock: Mutex::new(()),
            cancel: cancel.clone(),
        });
        let mut players = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(conn) = accepted.recv() => {
                    let span = tracing::debug_span!("player", peer_addr = %conn.peer);
                    players.spawn(handle_player(Arc::clone(&ctx), conn).instrument(span));
                }
                Some(joined) = players.join_next(), if !players.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "Player task panicked");
                        }
                    }
                }
            }
        }

        accepted.close();
        while accepted.recv().await.is_some() {}
        if let Err(e) = accept_task.await {
            tracing::warn!(error = %e, "Accept task ended abnormally");
        }
        while players.join_next().await.is_some() {}
        if let Err(e) = poller.await {
            tracing::warn!(error = %e, "Fleet poller ended abnormally");
        }

        tracing::info!("Matchmaker stopped");
        Ok(())
    }
}

async fn handle_player(ctx: Arc<Context>, conn: Accepted) {
    let mut player = Framed::new(conn.stream, CommandCodec::new());

    let session = match read_auth(&ctx, &mut player).await {
        Ok(session) => session,
        Err(FleetError::SessionClosed(reason)) => {
            tracing::debug!(reason = %reason, "Player left before authenticating");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Player handshake failed");
            reject(&mut player, RejectCode::Protocol, e.to_string()).await;
            return;
        }
    };

    let node = match ctx.select_or_provision().await {
        Ok(node) => node,
        Err(FleetError::NoCapacity) => {
            tracing::info!(session_id = %session, max_load = ctx.config.max_load, "No capacity for player");
            let message = format!("no node below max load {}", ctx.config.max_load);
            reject(&mut player, RejectCode::NoCapacity, message).await;
            return;
        }
        Err(e) => {
            tracing::error!(session_id = %session, error = %e, "Node provisioning failed");
            reject(&mut player, RejectCode::ProvisionFailed, e.to_string()).await;
            return;
        }
    };

    let result = match ctx.config.mode {
        MatchmakingMode::Redirect => redirect(player, &node).await,
        MatchmakingMode::Proxy => proxy(&ctx, player, session, &node).await,
    };
    match result {
        Ok(()) => tracing::debug!(session_id = %session, node_id = %node.id, "Player session finished"),
        Err(e) => tracing::warn!(session_id = %session, node_id = %node.id, error = %e, "Player session failed"),
    }
}

/// Wait for the player's AUTH frame.
async fn read_auth(ctx: &Context, player: &mut PlayerStream) -> Result<SessionId, FleetError> {
    let timeout = ctx.config.handshake_timeout();
    let frame = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(FleetError::SessionClosed(CloseReason::Cancelled)),
        frame = tokio::time::timeout(timeout, player.next()) => {
            frame.map_err(|_| FleetError::Timeout(timeout))?
        }
    };

    match frame {
        None => Err(FleetError::SessionClosed(CloseReason::PeerHangup)),
        Some(Err(e)) => Err(e.into()),
        Some(Ok(cmd)) if cmd.is_close() => Err(FleetError::SessionClosed(CloseReason::CloseCommand)),
        Some(Ok(cmd)) if cmd.opcode == opcode::AUTH => cmd.session_id(),
        Some(Ok(cmd)) => Err(FleetError::Protocol(format!(
            "expected AUTH, got opcode {:#04x}",
            cmd.opcode
        ))),
    }
}

impl Context {
    async fn select_or_provision(&self) -> Result<NodeStats, FleetError> {
        let ceiling = self.config.max_load;
        match self.registry.select_node(ceiling) {
            Err(FleetError::NoCapacity) => {}
            other => return other,
        }

        let Some(provisioner) = &self.provisioner else {
            return Err(FleetError::NoCapacity);
        };

        let _guard = self.provision_lock.lock().await;
        // Another player may have provisioned while we waited.
        if let Ok(node) = self.registry.select_node(ceiling) {
            return Ok(node);
        }

        let node = provisioner.provision().await?;
        self.registry.observe(node.clone());
        metrics::record_selection("provisioned");
        Ok(node)
    }
}

async fn redirect(mut player: PlayerStream, node: &NodeStats) -> Result<(), FleetError> {
    let assignment = Assignment {
        node_id: node.id.clone(),
        host: node.host.clone(),
        port: node.port,
        mode: AssignMode::Redirect,
    };
    player.send(Command::assign(&assignment)?).await?;
    Ok(())
}

async fn proxy(ctx: &Context, mut player: PlayerStream, session: SessionId, node: &NodeStats) -> Result<(), FleetError> {
    let timeout = ctx.config.connect_timeout();
    let connected = tokio::time::timeout(timeout, TcpStream::connect((node.host.as_str(), node.port))).await;
    let stream = match connected {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            reject(&mut player, RejectCode::NodeUnreachable, e.to_string()).await;
            return Err(FleetError::Transport(e));
        }
        Err(_) => {
            reject(&mut player, RejectCode::NodeUnreachable, "connect timed out").await;
            return Err(FleetError::Timeout(timeout));
        }
    };

    let mut upstream = Framed::new(stream, CommandCodec::new());
    if let Err(e) = upstream.send(Command::auth(session)).await {
        reject(&mut player, RejectCode::NodeUnreachable, e.to_string()).await;
        return Err(e.into());
    }

    let assignment = Assignment {
        node_id: node.id.clone(),
        host: node.host.clone(),
        port: node.port,
        mode: AssignMode::Proxied,
    };
    player.send(Command::assign(&assignment)?).await?;

    // Bytes already decoded into the codec buffers belong to the other side.
    let player = player.into_parts();
    let upstream = upstream.into_parts();
    let mut player_io = player.io;
    let mut node_io = upstream.io;
    if !player.read_buf.is_empty() {
        node_io.write_all(&player.read_buf).await?;
    }
    if !upstream.read_buf.is_empty() {
        player_io.write_all(&upstream.read_buf).await?;
    }

    tracing::debug!(session_id = %session, node_id = %node.id, "Proxying player");
    tokio::select! {
        _ = ctx.cancel.cancelled() => {
            tracing::debug!(session_id = %session, "Proxy cancelled");
        }
        res = tokio::io::copy_bidirectional(&mut player_io, &mut node_io) => {
            let (to_node, to_player) = res?;
            tracing::debug!(session_id = %session, to_node, to_player, "Proxy closed");
        }
    }
    Ok(())
}

async fn reject(player: &mut PlayerStream, code: RejectCode, message: impl Into<String>) {
    let cmd = match Command::reject(&Rejection::new(code, message)) {
        Ok(cmd) => cmd,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode rejection");
            return;
        }
    };
    if let Err(e) = player.send(cmd).await {
        tracing::debug!(error = %e, "Failed to send rejection");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::SessionIdAllocator;
    use crate::store::MemoryStatsStore;

    fn test_config() -> MatchmakingConfig {
        MatchmakingConfig {
            listen_port: 0,
            refresh_interval_ms: 20,
            handshake_timeout_ms: 200,
            ..MatchmakingConfig::default()
        }
    }

    async fn start(config: MatchmakingConfig, store: MemoryStatsStore) -> (SocketAddr, CancellationToken) {
        let server = MatchmakingServer::bind(config, Arc::new(store)).await.unwrap();
        let addr = server.local_addr();
        let cancel = CancellationToken::new();
        tokio::spawn(server.run(cancel.clone()));
        (addr, cancel)
    }

    async fn dial(addr: SocketAddr) -> PlayerStream {
        Framed::new(TcpStream::connect(addr).await.unwrap(), CommandCodec::new())
    }

    #[tokio::test]
    async fn empty_fleet_rejects_with_no_capacity() {
        let (addr, cancel) = start(test_config(), MemoryStatsStore::new()).await;
        let mut player = dial(addr).await;
        player.send(Command::auth(SessionIdAllocator::new().next_id())).await.unwrap();

        let reply = player.next().await.unwrap().unwrap();
        assert_eq!(reply.opcode, opcode::REJECT);
        assert_eq!(reply.rejection().unwrap().code, RejectCode::NoCapacity);
        cancel.cancel();
    }

    struct BrokenProvisioner;

    #[async_trait::async_trait]
    impl Provisioner for BrokenProvisioner {
        async fn provision(&self) -> Result<NodeStats, FleetError> {
            Err(FleetError::Config("no node binary".to_string()))
        }
    }

    #[tokio::test]
    async fn provisioning_failure_is_not_reported_as_no_capacity() {
        let server = MatchmakingServer::bind(test_config(), Arc::new(MemoryStatsStore::new()))
            .await
            .unwrap()
            .with_provisioner(Arc::new(BrokenProvisioner));
        let addr = server.local_addr();
        let cancel = CancellationToken::new();
        tokio::spawn(server.run(cancel.clone()));

        let mut player = dial(addr).await;
        player.send(Command::auth(SessionIdAllocator::new().next_id())).await.unwrap();
        let reply = player.next().await.unwrap().unwrap();
        assert_eq!(reply.rejection().unwrap().code, RejectCode::ProvisionFailed);

        // The client surfaces it as a closed session, not as NoCapacity.
        let factory = crate::client::ClientFactory::new(addr, SessionIdAllocator::starting_at(100));
        match factory.connect_one().await {
            Err(FleetError::SessionClosed(CloseReason::Rejected { code, .. })) => {
                assert_eq!(code, "provision_failed")
            }
            other => panic!("unexpected outcome: {:?}", other.map(|s| s.id())),
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn silent_player_times_out_with_protocol_rejection() {
        let (addr, cancel) = start(test_config(), MemoryStatsStore::new()).await;
        let mut player = dial(addr).await;

        let reply = tokio::time::timeout(Duration::from_secs(2), player.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply.rejection().unwrap().code, RejectCode::Protocol);
        cancel.cancel();
    }

    #[tokio::test]
    async fn redirect_mode_hands_out_node_address() {
        let store = MemoryStatsStore::new();
        store.update(&NodeStats::new("node-a", "127.0.0.1", 4100)).await.unwrap();
        let config = MatchmakingConfig {
            mode: MatchmakingMode::Redirect,
            ..test_config()
        };
        let (addr, cancel) = start(config, store).await;

        let mut player = dial(addr).await;
        player.send(Command::auth(SessionIdAllocator::new().next_id())).await.unwrap();
        let assignment = player.next().await.unwrap().unwrap().assignment().unwrap();
        assert_eq!(assignment.node_id, "node-a");
        assert_eq!(assignment.port, 4100);
        assert_eq!(assignment.mode, AssignMode::Redirect);
        assert!(player.next().await.is_none());
        cancel.cancel();
    }

    #[tokio::test]
    async fn unreachable_node_is_reported() {
        // Bind and drop to get a port nothing listens on.
        let port = {
            let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().unwrap().port()
        };
        let store = MemoryStatsStore::new();
        store.update(&NodeStats::new("gone", "127.0.0.1", port)).await.unwrap();
        let (addr, cancel) = start(test_config(), store).await;

        let mut player = dial(addr).await;
        player.send(Command::auth(SessionIdAllocator::new().next_id())).await.unwrap();
        let reply = player.next().await.unwrap().unwrap();
        assert_eq!(reply.rejection().unwrap().code, RejectCode::NodeUnreachable);
        cancel.cancel();
    }
}
