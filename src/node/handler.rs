//! Per-connection handler.
//!
//! # Responsibilities
//! - Drive the command framer for one connection
//! - Answer the AUTH handshake with READY
//! - Stop on CLOSE, EOF, a bad frame, a transport error or cancellation
//! - Guarantee the node hears about the disconnect on every exit path

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::error::{CloseReason, FleetError};
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::protocol::{opcode, Command, CommandCodec};

/// Messages from handlers to the node's lifecycle task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    Disconnected { connection_id: ConnectionId },
}

/// Decrements the node's connection count when dropped.
///
/// Created by the lifecycle task right after it counted the connection, and
/// moved into the handler. Dropping happens on return, on task abort and
/// during unwinding, so the decrement cannot be skipped.
#[derive(Debug)]
pub struct ConnectionGuard {
    connection_id: ConnectionId,
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl ConnectionGuard {
    pub fn new(connection_id: ConnectionId, events: mpsc::UnboundedSender<NodeEvent>) -> Self {
        metrics::record_connection_opened();
        Self {
            connection_id,
            events,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection_id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        metrics::record_connection_closed();
        // The lifecycle task is gone only after the node has closed.
        let _ = self.events.send(NodeEvent::Disconnected {
            connection_id: self.connection_id,
        });
        tracing::trace!(connection_id = %self.connection_id, "Connection released");
    }
}

/// Serve one connection until it ends. Returns why it ended.
pub async fn handle_connection<S>(stream: S, guard: ConnectionGuard, cancel: CancellationToken) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let connection_id = guard.id();
    let mut framed = Framed::new(stream, CommandCodec::new());
    tracing::debug!(connection_id = %connection_id, "Connection opened");

    let reason = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break CloseReason::Cancelled,
            frame = framed.next() => frame,
        };

        let cmd = match frame {
            None => break CloseReason::PeerHangup,
            Some(Err(e)) => break close_reason_for(FleetError::from(e)),
            Some(Ok(cmd)) => cmd,
        };

        match cmd.opcode {
            opcode::CLOSE => break CloseReason::CloseCommand,
            opcode::AUTH => {
                let session = match cmd.session_id() {
                    Ok(session) => session,
                    Err(e) => break close_reason_for(e),
                };
                tracing::debug!(connection_id = %connection_id, session_id = %session, "Session authenticated");
                if let Err(e) = framed.send(Command::ready()).await {
                    break close_reason_for(FleetError::from(e));
                }
            }
            other => {
                tracing::trace!(
                    connection_id = %connection_id,
                    opcode = other,
                    len = cmd.payload.len(),
                    "Command received"
                );
            }
        }
    };

    match &reason {
        CloseReason::Protocol(e) | CloseReason::Transport(e) => {
            tracing::warn!(connection_id = %connection_id, error = %e, "Connection failed");
        }
        _ => tracing::debug!(connection_id = %connection_id, reason = %reason, "Connection closed"),
    }

    drop(guard);
    reason
}

fn close_reason_for(err: FleetError) -> CloseReason {
    match err {
        FleetError::Transport(e) => CloseReason::Transport(e.to_string()),
        other => CloseReason::Protocol(other.to_string()),
    }
}
