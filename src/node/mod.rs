//! Game server node subsystem.
//!
//! # Data Flow
//! ```text
//! Listener accept task
//!     → bounded queue
//!     → server.rs lifecycle task: lifecycle.rs admit (+1, Idle → Ready)
//!     → handler.rs per-connection task (AUTH → READY, game commands)
//!     → ConnectionGuard drop → NodeEvent::Disconnected → lifecycle (-1)
//!
//! Idle timer → lifecycle.rs (Ready → Idle → Closed)
//! Every transition → StatsStore::update (synchronous)
//! stats.rs watch channel → flusher.rs → StatsStore::update (on diff)
//! ```
//!
//! # Design Decisions
//! - One task owns the stats; everything else sends it messages
//! - Decrement-on-exit is a drop guard, so no exit path can skip it
//! - Store failures never roll back in-memory state

pub mod flusher;
pub mod handler;
pub mod lifecycle;
pub mod server;
pub mod stats;

pub use handler::{ConnectionGuard, NodeEvent};
pub use lifecycle::NodeLifecycle;
pub use server::GameServer;
pub use stats::{NodeState, NodeStats};
