//! Command type and control payloads.
//!
//! A command is one opcode byte plus an opaque payload. A handful of opcodes
//! are reserved for connection control; everything else belongs to the game
//! and passes through the core untouched.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::client::ids::SessionId;
use crate::error::FleetError;

/// Reserved opcodes.
pub mod opcode {
    /// Close the connection. Either side may send it.
    pub const CLOSE: u8 = 0x00;
    /// Player identifies its session (16-byte payload).
    pub const AUTH: u8 = 0x01;
    /// Node finished the handshake.
    pub const READY: u8 = 0x02;
    /// Matchmaker tells the player which node it landed on.
    pub const ASSIGN: u8 = 0x03;
    /// Matchmaker refused the player.
    pub const REJECT: u8 = 0x04;
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: u8,
    pub payload: Bytes,
}

impl Command {
    pub fn new(opcode: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    pub fn close() -> Self {
        Self::new(opcode::CLOSE, Bytes::new())
    }

    pub fn auth(session: SessionId) -> Self {
        Self::new(opcode::AUTH, Bytes::copy_from_slice(session.as_bytes()))
    }

    pub fn ready() -> Self {
        Self::new(opcode::READY, Bytes::new())
    }

    pub fn assign(assignment: &Assignment) -> Result<Self, FleetError> {
        let body = serde_json::to_vec(assignment)
            .map_err(|e| FleetError::Protocol(format!("encode assignment: {}", e)))?;
        Ok(Self::new(opcode::ASSIGN, body))
    }

    pub fn reject(rejection: &Rejection) -> Result<Self, FleetError> {
        let body = serde_json::to_vec(rejection)
            .map_err(|e| FleetError::Protocol(format!("encode rejection: {}", e)))?;
        Ok(Self::new(opcode::REJECT, body))
    }

    /// True for the reserved close opcode.
    pub fn is_close(&self) -> bool {
        self.opcode == opcode::CLOSE
    }

    /// Session id carried by an AUTH command.
    pub fn session_id(&self) -> Result<SessionId, FleetError> {
        if self.opcode != opcode::AUTH {
            return Err(FleetError::Protocol(format!(
                "expected AUTH, got opcode {:#04x}",
                self.opcode
            )));
        }
        SessionId::from_slice(&self.payload).ok_or_else(|| {
            FleetError::Protocol(format!(
                "AUTH payload must be 16 bytes, got {}",
                self.payload.len()
            ))
        })
    }

    pub fn assignment(&self) -> Result<Assignment, FleetError> {
        self.json_body(opcode::ASSIGN, "ASSIGN")
    }

    pub fn rejection(&self) -> Result<Rejection, FleetError> {
        self.json_body(opcode::REJECT, "REJECT")
    }

    fn json_body<T: serde::de::DeserializeOwned>(&self, expected: u8, name: &str) -> Result<T, FleetError> {
        if self.opcode != expected {
            return Err(FleetError::Protocol(format!(
                "expected {}, got opcode {:#04x}",
                name, self.opcode
            )));
        }
        serde_json::from_slice(&self.payload)
            .map_err(|e| FleetError::Protocol(format!("malformed {} payload: {}", name, e)))
    }
}

/// How the player reaches its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignMode {
    /// The matchmaker connection is spliced through to the node.
    Proxied,
    /// The player must dial `host:port` itself.
    Redirect,
}

/// Payload of an ASSIGN command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub mode: AssignMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    NoCapacity,
    NodeUnreachable,
    ProvisionFailed,
    Protocol,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCode::NoCapacity => "no_capacity",
            RejectCode::NodeUnreachable => "node_unreachable",
            RejectCode::ProvisionFailed => "provision_failed",
            RejectCode::Protocol => "protocol",
        }
    }
}

/// Payload of a REJECT command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: RejectCode,
    pub message: String,
}

impl Rejection {
    pub fn new(code: RejectCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
