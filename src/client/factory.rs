//! Creates player sessions against one matchmaker.
//!
//! Used by the `fleet-client` binary and by load tests; both go through the
//! same `ClientSession` state machine as a real player.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use crate::client::ids::SessionIdAllocator;
use crate::client::session::ClientSession;
use crate::error::FleetError;

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ClientFactory {
    matchmaker: SocketAddr,
    ids: SessionIdAllocator,
    ready_timeout: Duration,
}

impl ClientFactory {
    pub fn new(matchmaker: SocketAddr, ids: SessionIdAllocator) -> Self {
        Self {
            matchmaker,
            ids,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// A fresh, unconnected session with the next id.
    pub fn session(&self) -> Arc<ClientSession> {
        ClientSession::new(self.ids.next_id(), self.matchmaker)
    }

    /// Connect one session and wait for it to be ready.
    pub async fn connect_one(&self) -> Result<Arc<ClientSession>, FleetError> {
        let session = self.session();
        session.connect().await?;
        if let Err(e) = session.wait_for_ready(self.ready_timeout).await {
            session.disconnect().await;
            return Err(e);
        }
        Ok(session)
    }

    /// Connect `count` sessions concurrently.
    ///
    /// Fails if any session fails; the ones that did connect are
    /// disconnected first.
    pub async fn connect_batch(&self, count: usize) -> Result<Vec<Arc<ClientSession>>, FleetError> {
        let results = join_all((0..count).map(|_| self.connect_one())).await;

        let mut sessions = Vec::with_capacity(count);
        let mut first_err = None;
        for result in results {
            match result {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        if let Some(err) = first_err {
            tracing::warn!(
                connected = sessions.len(),
                requested = count,
                error = %err,
                "Batch connect failed"
            );
            for session in &sessions {
                session.disconnect().await;
            }
            return Err(err);
        }

        tracing::debug!(count, "Batch connected");
        Ok(sessions)
    }
}
