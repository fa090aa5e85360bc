//! Player client subsystem.
//!
//! # Data Flow
//! ```text
//! ClientFactory → SessionIdAllocator (ids.rs) → ClientSession (session.rs)
//!     → matchmaker: AUTH
//!     ← ASSIGN (proxied: keep the connection / redirect: dial the node, AUTH again)
//!     ← READY from the node → Connected
//!     ← REJECT / CLOSE / EOF → Disconnected
//! ```
//!
//! # Design Decisions
//! - State is published through a watch channel; waiters use `wait_for`
//! - Sessions are single-use; a retry is a new session with a new id

pub mod factory;
pub mod ids;
pub mod session;

pub use factory::ClientFactory;
pub use ids::{SessionId, SessionIdAllocator};
pub use session::{ClientSession, ClientState, SessionStatus};
