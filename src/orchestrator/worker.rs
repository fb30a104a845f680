//! The injected browser-automation boundary.

use async_trait::async_trait;

use super::error::WorkerError;
use super::plan::SubtaskId;

/// An opaque handle to a worker's execution context (a browser-agent
/// session), created lazily at first dispatch and destroyed at workflow
/// termination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerSessionHandle(pub String);

/// The outcome of one `run_subtask` call.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtaskRunResult {
    pub output_text: String,
    pub tab_ids: Vec<u64>,
    pub ok: bool,
    pub error: Option<String>,
}

/// The injected browser-automation collaborator.
#[async_trait]
pub trait WorkerAgent: Send + Sync {
    /// Creates a worker session lazily at first dispatch.
    async fn create_session(
        &self,
        initial_instruction: &str,
        pretty_name: &str,
        parent_session_id: &str,
        top_level_task: &str,
        human_index: u32,
    ) -> WorkerSessionHandle;

    /// Runs one subtask in the given session, optionally reusing browser
    /// tabs opened by its predecessors.
    async fn run_subtask(
        &self,
        session: &WorkerSessionHandle,
        prompt: &str,
        tab_ids: &[u64],
        subtask_id: SubtaskId,
    ) -> Result<SubtaskRunResult, WorkerError>;

    /// Ends a worker session. Called exactly once per session that was
    /// created, regardless of how the workflow terminated.
    async fn end_session(&self, session: &WorkerSessionHandle, reason: &str);

    /// Best-effort, fire-and-forget cancellation of an in-flight subtask.
    async fn cancel(&self, session: &WorkerSessionHandle);
}
