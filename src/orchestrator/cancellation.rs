//! A single hierarchical cancellation token bound to one workflow.
//!
//! Wraps [`tokio_util::sync::CancellationToken`] directly rather than
//! reinventing cancellation propagation: child tokens (one per in-flight
//! LLM call or worker subtask) fire the moment the root fires, and the
//! bounded drain in [`WorkflowRunner::cancel`](super::runner::WorkflowRunner::cancel)
//! races completion against a fixed deadline the same way.

use tokio_util::sync::CancellationToken;

/// The cancellation root for one workflow run.
///
/// Cheaply `Clone`-able; every nested operation holds a clone (or a child
/// token derived from one), never the runner's own copy.
#[derive(Debug, Clone)]
pub struct CancellationRoot {
    token: CancellationToken,
}

impl CancellationRoot {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A child token that is cancelled when this root is cancelled, but can
    /// also be cancelled independently (used per-subtask so one worker's
    /// cancellation never cancels siblings).
    pub fn child(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Default for CancellationRoot {
    fn default() -> Self {
        Self::new()
    }
}
