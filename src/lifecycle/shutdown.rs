//! Shutdown coordination.

use tokio_util::sync::CancellationToken;

/// Root of the cancellation tree.
///
/// Every long-running task receives a child token; triggering the root
/// cancels all of them. Triggering twice is a no-op.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// The root token itself.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled together with the root, but cancellable on its own.
    pub fn child(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown triggered");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until shutdown is triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}
