//! Fleet view and node selection.
//!
//! # Data Flow
//! ```text
//! StatsStore::snapshot (every refresh_interval)
//!     → registry.rs (ArcSwap<FleetSnapshot>)
//!     → selector.rs (Ready, load < ceiling, lowest load, smallest id)
//!     → NodeStats of the chosen node, or NoCapacity
//! ```
//!
//! # Design Decisions
//! - Eventually consistent: selections read a snapshot that may be one
//!   flush + one refresh interval old
//! - No capacity is reserved; a burst of selections can overshoot the
//!   ceiling until the next refresh, and nodes enforce admission themselves
//! - Strategy is a trait so alternatives can be swapped in

pub mod registry;
pub mod selector;
pub mod snapshot;

pub use registry::FleetRegistry;
pub use selector::{LeastLoaded, NodeSelector};
pub use snapshot::FleetSnapshot;
