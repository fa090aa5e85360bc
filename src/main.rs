//! gamefleet
//!
//! Runs either a game server node or the matchmaking entry point. Both share
//! one stats store: nodes write their stats, the matchmaker reads them.
//!
//! # Architecture Overview
//!
//! ```text
//!     player ──▶ matchmaker ──select (load < max_load)──▶ FleetRegistry
//!                   │                                          ▲
//!                   │ proxy / redirect                         │ poll
//!                   ▼                                          │
//!                 node ── lifecycle (Ready/Idle/Closed) ──▶ StatsStore
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use gamefleet::config::{load_config, validate_config, ConfigError, FleetConfig, LogFormat, MatchmakingMode};
use gamefleet::lifecycle::signals::spawn_signal_handler;
use gamefleet::lifecycle::startup::build_store;
use gamefleet::lifecycle::Shutdown;
use gamefleet::matchmaking::{LocalProvisioner, MatchmakingServer};
use gamefleet::node::GameServer;
use gamefleet::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "gamefleet")]
#[command(about = "Game server fleet node and matchmaker", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one game server node
    Node {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Address written to the stats store for players to reach.
        #[arg(long)]
        advertise_host: Option<String>,
        #[arg(long)]
        idle_timeout_ms: Option<u64>,
    },
    /// Run the matchmaking entry point
    Matchmaker {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        max_load: Option<f64>,
        /// `proxy` or `redirect`
        #[arg(long)]
        mode: Option<String>,
        /// Start in-process nodes when the fleet is full.
        #[arg(long)]
        provision: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => FleetConfig::default(),
    };
    apply_overrides(&mut config, &cli)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gamefleet starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let signals = spawn_signal_handler(shutdown.clone());
    let store = build_store(&config.store);

    match cli.command {
        Commands::Node { .. } => {
            let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
            let server = GameServer::bind(config.node.clone(), store)
                .await?
                .with_error_channel(errors_tx);

            tokio::spawn(async move {
                while let Some(err) = errors_rx.recv().await {
                    tracing::warn!(error = %err, "Node reported error");
                }
            });

            let final_stats = server.run(shutdown.child()).await?;
            tracing::info!(
                node_id = %final_stats.id,
                state = %final_stats.state,
                connections = final_stats.connections,
                "Node finished"
            );
        }
        Commands::Matchmaker { .. } => {
            let mut server = MatchmakingServer::bind(config.matchmaking.clone(), Arc::clone(&store)).await?;

            let provisioner = if config.matchmaking.provision_local_nodes {
                let provisioner = Arc::new(LocalProvisioner::new(config.node.clone(), store, shutdown.child()));
                server = server.with_provisioner(provisioner.clone());
                Some(provisioner)
            } else {
                None
            };

            server.run(shutdown.child()).await?;
            if let Some(provisioner) = provisioner {
                shutdown.trigger();
                provisioner.wait().await;
            }
        }
    }

    // The node may stop on its own (idle close) before any signal arrives.
    shutdown.trigger();
    let _ = signals.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn apply_overrides(config: &mut FleetConfig, cli: &Cli) -> Result<(), ConfigError> {
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    if cli.json_logs {
        config.observability.log_format = LogFormat::Json;
    }

    match &cli.command {
        Commands::Node {
            id,
            host,
            port,
            advertise_host,
            idle_timeout_ms,
        } => {
            let node = &mut config.node;
            if let Some(id) = id {
                node.id = id.clone();
            }
            if let Some(host) = host {
                node.listen_host = host.clone();
            }
            if let Some(port) = port {
                node.listen_port = *port;
            }
            if advertise_host.is_some() {
                node.advertise_host = advertise_host.clone();
            }
            if let Some(ms) = idle_timeout_ms {
                node.idle_timeout_ms = *ms;
                node.close_after_idle_for_ms = *ms;
            }
        }
        Commands::Matchmaker {
            host,
            port,
            max_load,
            mode,
            provision,
        } => {
            let mm = &mut config.matchmaking;
            if let Some(host) = host {
                mm.listen_host = host.clone();
            }
            if let Some(port) = port {
                mm.listen_port = *port;
            }
            if let Some(max_load) = max_load {
                mm.max_load = *max_load;
            }
            if let Some(mode) = mode {
                mm.mode = parse_mode(mode)?;
            }
            if *provision {
                mm.provision_local_nodes = true;
            }
        }
    }
    Ok(())
}

fn parse_mode(mode: &str) -> Result<MatchmakingMode, ConfigError> {
    match mode {
        "proxy" => Ok(MatchmakingMode::Proxy),
        "redirect" => Ok(MatchmakingMode::Redirect),
        other => Err(ConfigError::Validation(vec![gamefleet::config::ValidationError {
            field: "matchmaking.mode".to_string(),
            message: format!("unknown mode '{}', expected proxy or redirect", other),
        }])),
    }
}
