//! Cooperative cancellation for polling loops.
//!
//! Polls and log follows check the token at every suspension point. Since
//! those loops only read remote state, stopping them never needs rollback.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shared cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Cancels every clone of this token.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes when the token is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone, so this only returns on cancel.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleeps for `duration`. Returns false if cancelled first.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = self.cancelled() => false,
        }
    }
}
