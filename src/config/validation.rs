//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ceilings finite)
//! - Check identifiers and addresses are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FleetConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{FleetConfig, StoreBackend};

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Characters allowed in a node id.
pub fn is_valid_node_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn validate_config(config: &FleetConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let node = &config.node;
    if !is_valid_node_id(&node.id) {
        errors.push(ValidationError::new(
            "node.id",
            "must be non-empty and contain only [A-Za-z0-9_-]",
        ));
    }
    if node.listen_host.trim().is_empty() {
        errors.push(ValidationError::new("node.listen_host", "must not be empty"));
    }
    if !(node.unit_load.is_finite() && node.unit_load > 0.0) {
        errors.push(ValidationError::new("node.unit_load", "must be a positive finite number"));
    }
    for (field, value) in [
        ("node.idle_timeout_ms", node.idle_timeout_ms),
        ("node.close_after_idle_for_ms", node.close_after_idle_for_ms),
        ("node.stat_flush_interval_ms", node.stat_flush_interval_ms),
        ("node.drain_timeout_ms", node.drain_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    if node.accept_queue_depth == 0 {
        errors.push(ValidationError::new("node.accept_queue_depth", "must be greater than 0"));
    }

    let mm = &config.matchmaking;
    if !(mm.max_load.is_finite() && mm.max_load > 0.0) {
        errors.push(ValidationError::new("matchmaking.max_load", "must be a positive finite number"));
    }
    for (field, value) in [
        ("matchmaking.refresh_interval_ms", mm.refresh_interval_ms),
        ("matchmaking.handshake_timeout_ms", mm.handshake_timeout_ms),
        ("matchmaking.connect_timeout_ms", mm.connect_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    if mm.accept_queue_depth == 0 {
        errors.push(ValidationError::new("matchmaking.accept_queue_depth", "must be greater than 0"));
    }

    if config.store.backend == StoreBackend::File && config.store.path.trim().is_empty() {
        errors.push(ValidationError::new("store.path", "required for the file backend"));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
