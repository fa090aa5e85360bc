//! Stats store subsystem.
//!
//! # Data Flow
//! ```text
//! Node lifecycle (transitions) ─┐
//!                               ├─→ StatsStore::update (upsert keyed by node id)
//! Stat flusher (diffs) ─────────┘
//!
//! Fleet registry poller ───────→ StatsStore::snapshot → FleetSnapshot
//! ```
//!
//! # Design Decisions
//! - The core only depends on the trait; engines are interchangeable
//! - `update` is an idempotent upsert, safe for concurrent writers
//! - memory.rs serves single-process fleets and tests, file.rs lets
//!   separate node and matchmaker processes share a directory

pub mod file;
pub mod memory;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::node::stats::NodeStats;

pub use file::FileStatsStore;
pub use memory::MemoryStatsStore;

/// Errors raised by a stats store engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode stats for {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Read/write contract the core needs from a stats store.
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Upsert the record for `stats.id`.
    async fn update(&self, stats: &NodeStats) -> Result<(), StoreError>;

    /// Every record currently stored.
    async fn snapshot(&self) -> Result<Vec<NodeStats>, StoreError>;

    /// One record by node id.
    async fn get(&self, id: &str) -> Result<Option<NodeStats>, StoreError> {
        Ok(self.snapshot().await?.into_iter().find(|s| s.id == id))
    }
}
