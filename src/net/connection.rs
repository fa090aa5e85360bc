//! Connection identifiers.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Keep the counter owned by whoever accepts connections (one per node)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a connection within one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Allocates connection ids. Clones share the counter.
///
/// Relaxed ordering is sufficient since we only need uniqueness.
#[derive(Debug, Clone)]
pub struct ConnectionIdAllocator {
    next: Arc<AtomicU64>,
}

impl ConnectionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
