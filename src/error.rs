//! Error taxonomy shared by every subsystem.
//!
//! # Design Decisions
//! - Connection-local failures (`Transport`, `Protocol`) end one connection only
//! - `NoCapacity` is an expected selection outcome, not a fault
//! - `InvariantViolation` is the only fatal variant; a node that hits one stops

use std::time::Duration;

use crate::client::ids::SessionId;
use crate::protocol::codec::CodecError;
use crate::store::StoreError;

/// Why a connection or session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent the reserved close command.
    CloseCommand,
    /// The peer hung up on a frame boundary.
    PeerHangup,
    /// The governing cancellation token fired.
    Cancelled,
    /// Local code asked for the disconnect.
    Requested,
    /// The matchmaker refused the player.
    Rejected { code: String, message: String },
    /// Malformed frame or unexpected command.
    Protocol(String),
    /// Read/write failure on the transport.
    Transport(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::CloseCommand => write!(f, "close command"),
            CloseReason::PeerHangup => write!(f, "peer hung up"),
            CloseReason::Cancelled => write!(f, "cancelled"),
            CloseReason::Requested => write!(f, "disconnect requested"),
            CloseReason::Rejected { code, message } => write!(f, "rejected ({}): {}", code, message),
            CloseReason::Protocol(e) => write!(f, "protocol error: {}", e),
            CloseReason::Transport(e) => write!(f, "transport error: {}", e),
        }
    }
}

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// Read, write or accept failure on a single connection.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Malformed frame or unexpected command.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Stats persistence failed.
    #[error("stats store write failed: {0}")]
    StoreWrite(#[source] StoreError),

    /// No node qualifies under the load ceiling.
    #[error("no node has capacity")]
    NoCapacity,

    /// A logic bug was detected; the affected node must stop.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// `connect` was called twice on the same session.
    #[error("session {0} was already used; allocate a new session")]
    SessionReused(SessionId),

    #[error("session closed: {0}")]
    SessionClosed(CloseReason),
}

impl FleetError {
    /// Whether the error should stop the owning node.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FleetError::InvariantViolation(_))
    }
}

impl From<CodecError> for FleetError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Io(e) => FleetError::Transport(e),
            other => FleetError::Protocol(other.to_string()),
        }
    }
}

pub type Result<T, E = FleetError> = std::result::Result<T, E>;
