//! TCP listener with a bounded hand-off queue.
//!
//! # Responsibilities
//! - Bind to the configured host and port
//! - Accept incoming TCP connections on a dedicated task
//! - Hand them to the owner through a bounded queue (backpressure)
//! - Survive transient accept errors

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::FleetError;

/// Pause after a failed accept (e.g. EMFILE) before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<ListenerError> for FleetError {
    fn from(err: ListenerError) -> Self {
        match err {
            ListenerError::Bind { address, source } => FleetError::Transport(std::io::Error::new(
                source.kind(),
                format!("bind {}: {}", address, source),
            )),
        }
    }
}

/// A connection waiting to be admitted.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

/// A bound listener that has not started accepting yet.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    queue_depth: usize,
}

impl Listener {
    /// Bind to `host:port`. `queue_depth` is how many accepted connections may
    /// wait for their owner before the accept loop blocks.
    pub async fn bind(host: &str, port: u16, queue_depth: usize) -> Result<Self, ListenerError> {
        let address = format!("{}:{}", host, port);
        let inner = TcpListener::bind((host, port))
            .await
            .map_err(|source| ListenerError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = inner
            .local_addr()
            .map_err(|source| ListenerError::Bind { address, source })?;

        tracing::info!(
            address = %local_addr,
            queue_depth,
            "Listener bound"
        );

        Ok(Self {
            inner,
            local_addr,
            queue_depth: queue_depth.max(1),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start accepting on a background task.
    ///
    /// The task stops when `cancel` fires or the receiver is dropped. Dropping
    /// the task drops the socket, so no further connections are accepted.
    pub fn spawn_accept_loop(self, cancel: CancellationToken) -> (mpsc::Receiver<Accepted>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let handle = tokio::spawn(accept_loop(self.inner, tx, cancel));
        (rx, handle)
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<Accepted>, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            res = listener.accept() => res,
        };

        match accepted {
            Ok((stream, peer)) => {
                tracing::debug!(peer_addr = %peer, "Connection accepted");
                // Blocks while the queue is full.
                let sent = tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(Accepted { stream, peer }) => sent,
                };
                if sent.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
    tracing::debug!("Accept loop stopped");
}
