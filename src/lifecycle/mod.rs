//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build stats store → Bind listeners
//!
//! Shutdown (shutdown.rs):
//!     Trigger → root token cancelled → every child token cancelled
//!     → nodes stop accepting, drain handlers, persist Closed
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//! ```
//!
//! # Design Decisions
//! - A single cancellation token is the only stop condition
//! - Tasks receive child tokens so a subtree can stop on its own
//! - Cancellation is idempotent

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
