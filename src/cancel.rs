//! Caller-side cancellation for a pipeline run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cloneable cancellation signal.
///
/// All clones observe the same flag. Once raised it stays raised; a token is meant to be
/// used for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Raise the signal. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Raise the signal once `deadline` has elapsed.
    ///
    /// Must be called from within a tokio runtime. Aborting the returned handle disarms
    /// the deadline.
    pub fn cancel_after(&self, deadline: Duration) -> JoinHandle<()> {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            tracing::info!(deadline_ms = deadline.as_millis() as u64, "pipeline deadline reached");
            token.cancel();
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once the signal has been raised.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        let raised = receiver.wait_for(|cancelled| *cancelled).await.is_ok();
        if !raised {
            // The sender lives inside `self`, so the channel cannot close while we wait.
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
