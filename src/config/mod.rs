//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → FleetConfig (validated, immutable)
//!     → CLI overrides applied by the binaries
//!     → sections handed to node / matchmaker / store / observability
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Durations are stored as milliseconds with `Duration` accessors

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    FleetConfig, LogFormat, MatchmakingConfig, MatchmakingMode, NodeConfig, ObservabilityConfig,
    StoreBackend, StoreConfig,
};
pub use validation::{validate_config, ValidationError};
