//! Wire protocol subsystem.
//!
//! # Data Flow
//! ```text
//! TcpStream bytes
//!     → codec.rs (resumable opcode + length + payload framing)
//!     → command.rs (Command, reserved control opcodes)
//!     → node handler / matchmaker / client session
//! ```
//!
//! # Design Decisions
//! - Frames are self-delimiting so partial reads reassemble
//! - Only control opcodes (CLOSE, AUTH, READY, ASSIGN, REJECT) have meaning here
//! - Control payloads that carry structure are JSON

pub mod codec;
pub mod command;

pub use codec::{CodecError, CommandCodec};
pub use command::{opcode, AssignMode, Assignment, Command, RejectCode, Rejection};
