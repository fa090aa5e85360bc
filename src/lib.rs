//! Game server fleet: node lifecycle, connection accounting and
//! load-ceiling matchmaking over a shared stats store.

pub mod client;
pub mod config;
pub mod error;
pub mod fleet;
pub mod lifecycle;
pub mod matchmaking;
pub mod net;
pub mod node;
pub mod observability;
pub mod protocol;
pub mod store;

pub use config::schema::FleetConfig;
pub use error::{CloseReason, FleetError};
pub use lifecycle::Shutdown;
pub use matchmaking::MatchmakingServer;
pub use node::GameServer;
