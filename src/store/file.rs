//! Directory-backed stats store.
//!
//! One JSON document per node (`<dir>/<node_id>.json`). Writes go to a
//! temporary file that is renamed into place, so readers never observe a
//! partially written record.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::{StatsStore, StoreError};
use crate::node::stats::NodeStats;

#[derive(Debug)]
pub struct FileStatsStore {
    dir: PathBuf,
    tmp_seq: AtomicU64,
}

impl FileStatsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tmp_seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the record for `id` lives.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn io_err(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl StatsStore for FileStatsStore {
    async fn update(&self, stats: &NodeStats) -> Result<(), StoreError> {
        let body = serde_json::to_vec_pretty(stats).map_err(|source| StoreError::Encode {
            id: stats.id.clone(),
            source,
        })?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::io_err(&self.dir, e))?;

        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!(".{}.{}.{}.tmp", stats.id, std::process::id(), seq));
        let target = self.path_for(&stats.id);

        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| Self::io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| Self::io_err(&target, e))?;
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<NodeStats>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err(&self.dir, e)),
        };

        let mut nodes = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Self::io_err(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                // removed between listing and reading
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::io_err(&path, e)),
            };
            match serde_json::from_slice::<NodeStats>(&raw) {
                Ok(stats) => nodes.push(stats),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable stats record");
                }
            }
        }
        Ok(nodes)
    }

    async fn get(&self, id: &str) -> Result<Option<NodeStats>, StoreError> {
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).map(Some).map_err(|e| {
                Self::io_err(&path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(&path, e)),
        }
    }
}
