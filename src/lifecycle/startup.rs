//! Startup helpers shared by the binaries.

use std::sync::Arc;

use crate::config::{StoreBackend, StoreConfig};
use crate::store::{FileStatsStore, MemoryStatsStore, StatsStore};

/// Build the stats store engine selected in configuration.
pub fn build_store(config: &StoreConfig) -> Arc<dyn StatsStore> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!(backend = "memory", "Stats store ready");
            Arc::new(MemoryStatsStore::new())
        }
        StoreBackend::File => {
            tracing::info!(backend = "file", path = %config.path, "Stats store ready");
            Arc::new(FileStatsStore::new(&config.path))
        }
    }
}
