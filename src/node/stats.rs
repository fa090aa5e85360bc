//! Node status record.
//!
//! # Responsibilities
//! - Represent one node's externally visible status
//! - Apply counter updates while keeping `connections == added - removed`
//! - Decide whether two samples differ for diff-based flushing

use serde::{Deserialize, Serialize};

use crate::error::FleetError;

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Accepting new connections.
    Ready,
    /// No connections; waiting out the grace period.
    Idle,
    /// Terminal.
    Closed,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Ready => "ready",
            NodeState::Idle => "idle",
            NodeState::Closed => "closed",
        }
    }

    /// Numeric encoding for the state gauge.
    pub fn as_metric(&self) -> f64 {
        match self {
            NodeState::Ready => 0.0,
            NodeState::Idle => 1.0,
            NodeState::Closed => 2.0,
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node's reported status, keyed by `id` in the stats store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub state: NodeState,
    pub connections: u64,
    pub load: f64,
    pub connections_added: u64,
    pub connections_removed: u64,
}

impl NodeStats {
    /// A fresh `Ready` node with no traffic.
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            state: NodeState::Ready,
            connections: 0,
            load: 0.0,
            connections_added: 0,
            connections_removed: 0,
        }
    }

    /// Apply a connection delta.
    ///
    /// Positive deltas feed `connections_added`, negative ones
    /// `connections_removed`. Load is recomputed from the live count so it
    /// stays a strictly increasing function of `connections`.
    pub fn adjust(&mut self, delta: i64, unit_load: f64) -> Result<(), FleetError> {
        let magnitude = delta.unsigned_abs();
        if delta >= 0 {
            self.connections += magnitude;
            self.connections_added += magnitude;
        } else {
            if magnitude > self.connections {
                return Err(FleetError::InvariantViolation(format!(
                    "node {} would drop to {} connections",
                    self.id,
                    self.connections as i128 - magnitude as i128
                )));
            }
            self.connections -= magnitude;
            self.connections_removed += magnitude;
        }
        self.load = self.connections as f64 * unit_load;
        Ok(())
    }

    /// `(connections, connections_added, connections_removed)`.
    pub fn counters(&self) -> (u64, u64, u64) {
        (self.connections, self.connections_added, self.connections_removed)
    }

    /// True when `connections == added - removed`.
    pub fn is_conserved(&self) -> bool {
        self.connections_added.checked_sub(self.connections_removed) == Some(self.connections)
    }

    /// Whether the flushed tuple is identical.
    pub fn same_sample(&self, other: &NodeStats) -> bool {
        self.state == other.state
            && self.connections == other.connections
            && self.load == other.load
            && self.connections_added == other.connections_added
            && self.connections_removed == other.connections_removed
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
