//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define fleet metrics (connections, node state, store writes, selections)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `gamefleet_node_connections` (gauge): live connections per node
//! - `gamefleet_node_state` (gauge): 0=ready, 1=idle, 2=closed
//! - `gamefleet_connections_total` (counter): by `event` (opened/closed)
//! - `gamefleet_store_writes_total` (counter): by `source` and `outcome`
//! - `gamefleet_selections_total` (counter): by `outcome`
//! - `gamefleet_fleet_nodes` (gauge): nodes in the latest snapshot
//!
//! # Design Decisions
//! - Without an installed recorder every call is a no-op
//! - Labels are low-cardinality except `node_id`, bounded by fleet size

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::FleetError;
use crate::node::stats::NodeState;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), FleetError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| FleetError::Config(format!("metrics exporter: {}", e)))?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_node_connections(node_id: &str, connections: u64) {
    gauge!("gamefleet_node_connections", "node_id" => node_id.to_string()).set(connections as f64);
}

pub fn record_node_state(node_id: &str, state: NodeState) {
    gauge!("gamefleet_node_state", "node_id" => node_id.to_string()).set(state.as_metric());
}

pub fn record_connection_opened() {
    counter!("gamefleet_connections_total", "event" => "opened").increment(1);
}

pub fn record_connection_closed() {
    counter!("gamefleet_connections_total", "event" => "closed").increment(1);
}

/// `source` is `transition` or `flush`.
pub fn record_store_write(source: &'static str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("gamefleet_store_writes_total", "source" => source, "outcome" => outcome).increment(1);
}

/// `outcome` is `selected`, `no_capacity` or `provisioned`.
pub fn record_selection(outcome: &'static str) {
    counter!("gamefleet_selections_total", "outcome" => outcome).increment(1);
}

pub fn record_fleet_size(nodes: usize) {
    gauge!("gamefleet_fleet_nodes").set(nodes as f64);
}
