//! Point-in-time view of the fleet.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::node::stats::NodeStats;

/// Node id → last reported stats, as read at `taken_at`.
///
/// May lag the nodes' live state by up to one flush interval plus one
/// registry refresh interval.
#[derive(Debug, Clone)]
pub struct FleetSnapshot {
    nodes: BTreeMap<String, NodeStats>,
    taken_at: Instant,
}

impl FleetSnapshot {
    pub fn empty() -> Self {
        Self {
            nodes: BTreeMap::new(),
            taken_at: Instant::now(),
        }
    }

    pub fn from_stats(stats: impl IntoIterator<Item = NodeStats>) -> Self {
        Self {
            nodes: stats.into_iter().map(|s| (s.id.clone(), s)).collect(),
            taken_at: Instant::now(),
        }
    }

    /// Copy of this snapshot with one record replaced.
    pub fn with_node(&self, stats: NodeStats) -> Self {
        let mut nodes = self.nodes.clone();
        nodes.insert(stats.id.clone(), stats);
        Self {
            nodes,
            taken_at: self.taken_at,
        }
    }

    pub fn get(&self, id: &str) -> Option<&NodeStats> {
        self.nodes.get(id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeStats> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    pub fn age(&self) -> Duration {
        self.taken_at.elapsed()
    }
}

impl Default for FleetSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
