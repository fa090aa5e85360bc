//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept task)
//!     → bounded mpsc queue (depth = accept_queue_depth)
//!     → owner task (node lifecycle or matchmaker) admits it
//!     → connection.rs (id for tracing)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue: when the owner falls behind, the listener blocks
//!   instead of buffering without limit
//! - Connection ids come from an owned allocator, one per node

pub mod connection;
pub mod listener;

pub use connection::{ConnectionId, ConnectionIdAllocator};
pub use listener::{Accepted, Listener, ListenerError};
