//! Player-side session state machine.
//!
//! ```text
//! Connecting ──(READY from node)──▶ Connected ──▶ Disconnected
//!      └───────(REJECT / CLOSE / EOF / error / disconnect)────┘
//! ```
//!
//! States only move forward. A session is single-use: once `connect` has been
//! called, reconnecting requires a new session with a new id.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::client::ids::SessionId;
use crate::error::{CloseReason, FleetError};
use crate::protocol::{opcode, AssignMode, Assignment, Command, CommandCodec, RejectCode};

/// How long `disconnect` waits for the driver to wind down.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClientState {
    Connecting,
    Connected,
    Disconnected,
}

/// Everything observable about a session, published as one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: ClientState,
    pub assignment: Option<Assignment>,
    pub close_reason: Option<CloseReason>,
}

type CommandStream = Framed<TcpStream, CommandCodec>;

pub struct ClientSession {
    id: SessionId,
    matchmaker: SocketAddr,
    status: watch::Sender<SessionStatus>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status.borrow();
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("matchmaker", &self.matchmaker)
            .field("state", &status.state)
            .field("close_reason", &status.close_reason)
            .finish()
    }
}

impl ClientSession {
    /// A new session in `Connecting`. Nothing is dialled until `connect`.
    pub fn new(id: SessionId, matchmaker: SocketAddr) -> Arc<Self> {
        let (status, _) = watch::channel(SessionStatus {
            state: ClientState::Connecting,
            assignment: None,
            close_reason: None,
        });
        Arc::new(Self {
            id,
            matchmaker,
            status,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> ClientState {
        self.status.borrow().state
    }

    pub fn assignment(&self) -> Option<Assignment> {
        self.status.borrow().assignment.clone()
    }

    /// Id of the node the matchmaker placed this session on.
    pub fn assigned_node(&self) -> Option<String> {
        self.status.borrow().assignment.as_ref().map(|a| a.node_id.clone())
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.status.borrow().close_reason.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Dial the matchmaker and start the session driver.
    pub async fn connect(self: &Arc<Self>) -> Result<(), FleetError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(FleetError::SessionReused(self.id));
        }

        let stream = match TcpStream::connect(self.matchmaker).await {
            Ok(stream) => stream,
            Err(e) => {
                self.finish(CloseReason::Transport(e.to_string()));
                return Err(FleetError::Transport(e));
            }
        };

        let session = Arc::clone(self);
        tokio::spawn(async move {
            let reason = session.drive(Framed::new(stream, CommandCodec::new())).await;
            session.finish(reason);
        });
        Ok(())
    }

    /// Wait until the session leaves `Connecting`.
    ///
    /// `Ok` once connected. A rejection for capacity maps to `NoCapacity`;
    /// any other ending maps to `SessionClosed`.
    pub async fn wait_for_ready(&self, timeout: Duration) -> Result<(), FleetError> {
        let mut rx = self.status.subscribe();
        let waited = tokio::time::timeout(timeout, async move {
            rx.wait_for(|s| s.state != ClientState::Connecting)
                .await
                .map(|status| status.clone())
        })
        .await;
        let status = match waited {
            Err(_) => return Err(FleetError::Timeout(timeout)),
            Ok(Err(_)) => return Err(FleetError::SessionClosed(CloseReason::Requested)),
            Ok(Ok(status)) => status,
        };

        match status.state {
            ClientState::Connected => Ok(()),
            _ => match status.close_reason {
                Some(CloseReason::Rejected { code, .. }) if code == RejectCode::NoCapacity.as_str() => {
                    Err(FleetError::NoCapacity)
                }
                Some(reason) => Err(FleetError::SessionClosed(reason)),
                None => Err(FleetError::SessionClosed(CloseReason::Requested)),
            },
        }
    }

    /// Send CLOSE (best effort) and end the session.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        if !self.started.swap(true, Ordering::SeqCst) {
            self.finish(CloseReason::Requested);
            return;
        }
        let mut rx = self.status.subscribe();
        let finished = tokio::time::timeout(DISCONNECT_GRACE, async move {
            rx.wait_for(|s| s.state == ClientState::Disconnected).await.is_ok()
        })
        .await;
        if finished.is_err() {
            tracing::warn!(session_id = %self.id, "Session driver did not stop in time");
            self.finish(CloseReason::Requested);
        }
    }

    async fn drive(&self, mut framed: CommandStream) -> CloseReason {
        if let Err(e) = framed.send(Command::auth(self.id)).await {
            return reason_for(FleetError::from(e));
        }

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = framed.send(Command::close()).await;
                    return CloseReason::Requested;
                }
                frame = framed.next() => frame,
            };

            let cmd = match frame {
                None => return CloseReason::PeerHangup,
                Some(Err(e)) => return reason_for(FleetError::from(e)),
                Some(Ok(cmd)) => cmd,
            };

            match cmd.opcode {
                opcode::CLOSE => return CloseReason::CloseCommand,
                opcode::READY => self.advance(ClientState::Connected),
                opcode::ASSIGN => {
                    let assignment = match cmd.assignment() {
                        Ok(a) => a,
                        Err(e) => return reason_for(e),
                    };
                    tracing::debug!(
                        session_id = %self.id,
                        node_id = %assignment.node_id,
                        mode = ?assignment.mode,
                        "Assigned to node"
                    );
                    self.status.send_modify(|s| s.assignment = Some(assignment.clone()));

                    if assignment.mode == AssignMode::Redirect {
                        framed = match self.redirect(&assignment).await {
                            Ok(framed) => framed,
                            Err(reason) => return reason,
                        };
                    }
                }
                opcode::REJECT => {
                    return match cmd.rejection() {
                        Ok(r) => CloseReason::Rejected {
                            code: r.code.as_str().to_string(),
                            message: r.message,
                        },
                        Err(e) => reason_for(e),
                    };
                }
                other => {
                    tracing::trace!(session_id = %self.id, opcode = other, "Command received");
                }
            }
        }
    }

    /// Dial the assigned node directly and repeat the handshake there.
    async fn redirect(&self, assignment: &Assignment) -> Result<CommandStream, CloseReason> {
        let stream = tokio::select! {
            _ = self.cancel.cancelled() => return Err(CloseReason::Requested),
            res = TcpStream::connect((assignment.host.as_str(), assignment.port)) => {
                res.map_err(|e| CloseReason::Transport(e.to_string()))?
            }
        };
        let mut framed = Framed::new(stream, CommandCodec::new());
        framed
            .send(Command::auth(self.id))
            .await
            .map_err(|e| reason_for(FleetError::from(e)))?;
        Ok(framed)
    }

    /// Move forward only.
    fn advance(&self, to: ClientState) {
        let changed = self.status.send_if_modified(|s| {
            if to > s.state {
                s.state = to;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::debug!(session_id = %self.id, state = ?to, "Session state changed");
        }
    }

    fn finish(&self, reason: CloseReason) {
        let changed = self.status.send_if_modified(|s| {
            if s.state == ClientState::Disconnected {
                return false;
            }
            s.state = ClientState::Disconnected;
            s.close_reason.get_or_insert(reason.clone());
            true
        });
        if changed {
            tracing::debug!(session_id = %self.id, reason = %reason, "Session disconnected");
        }
    }
}

fn reason_for(err: FleetError) -> CloseReason {
    match err {
        FleetError::Transport(e) => CloseReason::Transport(e.to_string()),
        other => CloseReason::Protocol(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ids::SessionIdAllocator;
    use crate::protocol::Rejection;
    use tokio::net::TcpListener;

    async fn fake_peer() -> (SocketAddr, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        (listener.local_addr().unwrap(), listener)
    }

    #[tokio::test]
    async fn debug_shows_id_and_state() {
        let id = SessionIdAllocator::new().next_id();
        let session = ClientSession::new(id, "127.0.0.1:1".parse().unwrap());
        let shown = format!("{:?}", session);
        assert!(shown.contains("Connecting"), "{}", shown);
        assert!(shown.contains(&format!("{:?}", id)), "{}", shown);

        session.disconnect().await;
        assert!(format!("{:?}", session).contains("Disconnected"));
    }

    #[tokio::test]
    async fn ready_moves_to_connected() {
        let (addr, listener) = fake_peer().await;
        let session = ClientSession::new(SessionIdAllocator::new().next_id(), addr);
        session.connect().await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut peer = Framed::new(stream, CommandCodec::new());
        let auth = peer.next().await.unwrap().unwrap();
        assert_eq!(auth.session_id().unwrap(), session.id());
        peer.send(Command::ready()).await.unwrap();

        session.wait_for_ready(Duration::from_secs(2)).await.unwrap();
        assert_eq!(session.state(), ClientState::Connected);

        session.disconnect().await;
        assert_eq!(session.state(), ClientState::Disconnected);
        assert_eq!(session.close_reason(), Some(CloseReason::Requested));
        let close = peer.next().await.unwrap().unwrap();
        assert!(close.is_close());
    }

    #[tokio::test]
    async fn rejection_for_capacity_is_no_capacity() {
        let (addr, listener) = fake_peer().await;
        let session = ClientSession::new(SessionIdAllocator::new().next_id(), addr);
        session.connect().await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut peer = Framed::new(stream, CommandCodec::new());
        peer.next().await.unwrap().unwrap();
        let rejection = Rejection::new(RejectCode::NoCapacity, "fleet full");
        peer.send(Command::reject(&rejection).unwrap()).await.unwrap();

        let err = session.wait_for_ready(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, FleetError::NoCapacity));
        assert_eq!(session.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn session_cannot_be_reused() {
        let (addr, _listener) = fake_peer().await;
        let session = ClientSession::new(SessionIdAllocator::new().next_id(), addr);
        session.connect().await.unwrap();
        assert!(matches!(session.connect().await, Err(FleetError::SessionReused(_))));
    }

    #[tokio::test]
    async fn states_never_move_backwards() {
        let (addr, listener) = fake_peer().await;
        let session = ClientSession::new(SessionIdAllocator::new().next_id(), addr);
        session.connect().await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);

        let err = session.wait_for_ready(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, FleetError::SessionClosed(_)));
        session.advance(ClientState::Connected);
        session.advance(ClientState::Connecting);
        assert_eq!(session.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn waiting_times_out_without_handshake() {
        let (addr, _listener) = fake_peer().await;
        let session = ClientSession::new(SessionIdAllocator::new().next_id(), addr);
        session.connect().await.unwrap();
        let err = session.wait_for_ready(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, FleetError::Timeout(_)));
        assert_eq!(session.state(), ClientState::Connecting);
    }

    #[tokio::test]
    async fn unreachable_matchmaker_disconnects() {
        let (addr, listener) = fake_peer().await;
        drop(listener);
        let session = ClientSession::new(SessionIdAllocator::new().next_id(), addr);
        assert!(matches!(session.connect().await, Err(FleetError::Transport(_))));
        assert_eq!(session.state(), ClientState::Disconnected);
    }
}
