//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for nodes and the
//! matchmaker. All types derive Serde traits for deserialization from config
//! files, and every field has a default so an empty file is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FleetConfig {
    /// Game server node settings.
    pub node: NodeConfig,

    /// Matchmaking entry point settings.
    pub matchmaking: MatchmakingConfig,

    /// Stats store engine.
    pub store: StoreConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Game server node configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Stable node identifier written to the stats store.
    pub id: String,

    /// Bind host.
    pub listen_host: String,

    /// Bind port (0 picks an ephemeral port).
    pub listen_port: u16,

    /// Host players should dial; defaults to the bound address.
    pub advertise_host: Option<String>,

    /// Zero-connection window before Ready → Idle.
    pub idle_timeout_ms: u64,

    /// Second zero-connection window before Idle → Closed.
    pub close_after_idle_for_ms: u64,

    /// Cadence of the diff-based stats flush.
    pub stat_flush_interval_ms: u64,

    /// Load contributed by a single connection.
    pub unit_load: f64,

    /// Accepted connections buffered between the listener and the lifecycle
    /// task. Once full, the listener stops accepting.
    pub accept_queue_depth: usize,

    /// Upper bound on waiting for handlers during shutdown.
    pub drain_timeout_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            listen_host: "127.0.0.1".to_string(),
            listen_port: 0,
            advertise_host: None,
            idle_timeout_ms: 30_000,
            close_after_idle_for_ms: 30_000,
            stat_flush_interval_ms: 200,
            unit_load: 0.001,
            accept_queue_depth: 10,
            drain_timeout_ms: 5_000,
        }
    }
}

impl NodeConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn close_after_idle_for(&self) -> Duration {
        Duration::from_millis(self.close_after_idle_for_ms)
    }

    pub fn stat_flush_interval(&self) -> Duration {
        Duration::from_millis(self.stat_flush_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// How the matchmaker binds a player to its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchmakingMode {
    /// Splice the player's connection through to the node.
    #[default]
    Proxy,
    /// Tell the player where to go and hang up.
    Redirect,
}

/// Matchmaking entry point configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    pub listen_host: String,
    pub listen_port: u16,

    /// Selection ceiling; nodes at or above it are skipped.
    pub max_load: f64,

    /// Registry poll period; bounds how stale a selection can be.
    pub refresh_interval_ms: u64,

    /// Time allowed for the player's AUTH frame.
    pub handshake_timeout_ms: u64,

    /// Time allowed to reach the chosen node in proxy mode.
    pub connect_timeout_ms: u64,

    pub mode: MatchmakingMode,

    /// Start in-process nodes when no node has capacity.
    pub provision_local_nodes: bool,

    pub accept_queue_depth: usize,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 42069,
            max_load: 0.9,
            refresh_interval_ms: 250,
            handshake_timeout_ms: 5_000,
            connect_timeout_ms: 2_000,
            mode: MatchmakingMode::Proxy,
            provision_local_nodes: false,
            accept_queue_depth: 64,
        }
    }
}

impl MatchmakingConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
}

/// Stats store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Directory for the file backend.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: "/tmp/gamefleet/stats".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
