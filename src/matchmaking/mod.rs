//! Matchmaking entry point.
//!
//! # Data Flow
//! ```text
//! player → Listener → server.rs (AUTH within handshake_timeout)
//!     → FleetRegistry::select_node(max_load)
//!         → NoCapacity → provision.rs (optional) or REJECT no_capacity
//!     → proxy: connect node, forward AUTH, ASSIGN proxied, splice bytes
//!     → redirect: ASSIGN redirect, close
//! ```

pub mod provision;
pub mod server;

pub use provision::{LocalProvisioner, Provisioner};
pub use server::MatchmakingServer;
