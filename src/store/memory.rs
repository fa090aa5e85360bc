//! In-process stats store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{StatsStore, StoreError};
use crate::node::stats::NodeStats;

/// Concurrent map of node id to its latest stats.
///
/// Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatsStore {
    inner: Arc<DashMap<String, NodeStats>>,
    writes: Arc<AtomicU64>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStatsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful `update` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Make every subsequent `update` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl StatsStore for MemoryStatsStore {
    async fn update(&self, stats: &NodeStats) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        self.inner.insert(stats.id.clone(), stats.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<NodeStats>, StoreError> {
        Ok(self.inner.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<NodeStats>, StoreError> {
        Ok(self.inner.get(id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repeated_update_is_idempotent() {
        let store = MemoryStatsStore::new();
        let mut stats = NodeStats::new("n1", "127.0.0.1", 4000);
        stats.adjust(2, 0.001).unwrap();

        store.update(&stats).await.unwrap();
        let first = store.snapshot().await.unwrap();
        store.update(&stats).await.unwrap();
        let second = store.snapshot().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len(), 1);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn failing_writes_leave_previous_record() {
        let store = MemoryStatsStore::new();
        let stats = NodeStats::new("n1", "127.0.0.1", 4000);
        store.update(&stats).await.unwrap();

        store.set_fail_writes(true);
        let mut changed = stats.clone();
        changed.adjust(1, 0.001).unwrap();
        assert!(store.update(&changed).await.is_err());
        assert_eq!(store.get("n1").await.unwrap(), Some(stats));
    }
}
