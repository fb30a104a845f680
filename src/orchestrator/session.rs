//! `SessionState`: the mutable bookkeeping for one workflow invocation.
//!
//! Owned exclusively by [`WorkflowRunner`](super::runner::WorkflowRunner) and
//! mutated only by the dispatch loop's single logical thread of control —
//! concurrent subtask executions never touch it directly, they report back
//! over a channel.

use std::collections::{HashMap, HashSet};

use super::cancellation::CancellationRoot;
use super::plan::{SubtaskId, SubtaskOutput, SubtaskStatus, WorkerId};
use super::worker::WorkerSessionHandle;

pub struct SessionState {
    pub session_id: String,
    pub workflow_run_index: u32,
    pub status: HashMap<SubtaskId, SubtaskStatus>,
    pub outputs: HashMap<SubtaskId, SubtaskOutput>,
    pub worker_sessions: HashMap<WorkerId, WorkerSessionHandle>,
    pub busy_workers: HashSet<WorkerId>,
    pub cancelled: bool,
    pub cancel_root: CancellationRoot,
    /// `queue_pointer[w]`: the smallest index into `queues[w]` that may
    /// still be dispatchable.
    pub queue_pointer: HashMap<WorkerId, usize>,
    pub enqueued: HashSet<SubtaskId>,
    pub done: HashSet<SubtaskId>,
}

impl SessionState {
    pub fn new(session_id: String, workflow_run_index: u32, subtask_ids: impl Iterator<Item = SubtaskId>) -> Self {
        Self {
            session_id,
            workflow_run_index,
            status: subtask_ids.map(|id| (id, SubtaskStatus::NotStarted)).collect(),
            outputs: HashMap::new(),
            worker_sessions: HashMap::new(),
            busy_workers: HashSet::new(),
            cancelled: false,
            cancel_root: CancellationRoot::new(),
            queue_pointer: HashMap::new(),
            enqueued: HashSet::new(),
            done: HashSet::new(),
        }
    }

    pub fn mark_status(&mut self, id: SubtaskId, status: SubtaskStatus) {
        self.status.insert(id, status);
    }
}
