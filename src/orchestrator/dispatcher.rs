//! The dependency-driven dispatch loop.
//!
//! An event loop that posts `Tick` messages to itself instead of recursing
//! into `try_dispatch`: every subtask completion/failure enqueues one more
//! `Tick`, and the loop processes one dispatch pass per message. Each
//! worker's subtask runs as a separate `tokio::spawn`, reporting its
//! outcome back to the coordinator over an `mpsc` channel rather than
//! mutating shared state directly.

use std::collections::HashSet;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::mpsc;

use super::clock::Clock;
use super::event::{EventHandler, Graph, GraphEdge, GraphNode, WorkflowEvent};
use super::ledger::{LedgerEntry, TokenLedger};
use super::llm::{CallContext, CallRole, LlmOutput, Usage};
use super::plan::{SubtaskId, SubtaskOutput, SubtaskStatus, TaskPlan, WorkerId, WorkerQueues};
use super::session::SessionState;
use super::worker::{SubtaskRunResult, WorkerAgent};

/// Messages the coordinator's inbox holds. Every subtask outcome arrives
/// as one of these rather than through a callback held by the spawned
/// task, so there is never a cycle between runner, coordinator, and
/// worker.
pub enum CoordinatorMsg {
    SubtaskDone { subtask_id: SubtaskId, output: SubtaskOutput, worker: WorkerId, latency_ms: i64 },
    SubtaskFailed { subtask_id: SubtaskId, worker: WorkerId, error: String, self_cancel: bool, latency_ms: i64 },
    Tick,
}

/// How a dispatch run ended.
pub enum DispatchOutcome {
    FinalAnswer(String),
    AllDone,
    Cancelled,
    Failed(String),
}

const PRIOR_OUTPUT_SNIPPET_LIMIT: usize = 600;
const FINAL_ANSWER_CONCAT_LIMIT: usize = 4000;

/// Builds the dispatch prompt for `subtask`: header, inlined suggestions,
/// then the prior-outputs section for each predecessor.
pub fn build_prompt(plan: &TaskPlan, subtask_id: SubtaskId, state: &SessionState) -> String {
    let subtask = plan.subtask(subtask_id).expect("subtask id must exist in its own plan");

    let mut prompt = format!(
        "Your task is to {}. Specifically, you must: {}",
        subtask.title, subtask.prompt
    );

    if !subtask.suggested_urls.is_empty() {
        prompt.push_str(&format!("\n\nSuggested URLs: {}", subtask.suggested_urls.join(", ")));
    } else if !subtask.suggested_search_queries.is_empty() {
        prompt.push_str(&format!(
            "\n\nSuggested search queries: {}",
            subtask.suggested_search_queries.join(", ")
        ));
    }

    for &dep in &subtask.dependencies {
        let dep_title = plan.subtask(dep).map(|s| s.title.as_str()).unwrap_or("unknown task");
        let body = match state.outputs.get(&dep) {
            Some(output) => match &output.raw {
                Some(raw) => serde_json::to_string(raw).unwrap_or_default(),
                None => elide(&output.result, PRIOR_OUTPUT_SNIPPET_LIMIT),
            },
            None => String::new(),
        };
        let tab_ids = state
            .outputs
            .get(&dep)
            .map(|o| o.tab_ids.clone())
            .unwrap_or_default();
        prompt.push_str(&format!(
            "\n\nHere is the output from a previous task entitled {}: {} this task was carried out in tabs: {:?}",
            dep_title, body, tab_ids
        ));
    }

    prompt
}

fn elide(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    } else {
        text.to_string()
    }
}

/// Extracts the user-facing final answer from a final subtask's output,
/// preferring `raw.done.text`, then `raw.text`, then the plain result.
fn final_answer_from_output(output: &SubtaskOutput) -> String {
    if let Some(raw) = &output.raw {
        if let Some(text) = raw.get("done").and_then(|d| d.get("text")).and_then(|t| t.as_str()) {
            return text.to_string();
        }
        if let Some(text) = raw.get("text").and_then(|t| t.as_str()) {
            return text.to_string();
        }
    }
    output.result.clone()
}

/// Runs the dispatch loop to completion for one workflow invocation.
pub struct Dispatcher {
    pub worker_agent: Arc<dyn WorkerAgent>,
    pub events: Arc<dyn EventHandler>,
    pub ledger: TokenLedger,
    pub clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub async fn run(&self, plan: &TaskPlan, queues: &WorkerQueues, state: &mut SessionState) -> DispatchOutcome {
        let (tx, mut rx) = mpsc::channel::<CoordinatorMsg>(queues.queues.len().max(1) * 4 + 8);

        for w in queues.queues.keys() {
            state.queue_pointer.entry(*w).or_insert(0);
        }

        if tx.send(CoordinatorMsg::Tick).await.is_err() {
            return DispatchOutcome::Failed("dispatch channel closed before start".to_string());
        }

        loop {
            let msg = match rx.recv().await {
                Some(m) => m,
                None => return DispatchOutcome::Failed("dispatch channel closed".to_string()),
            };

            match msg {
                CoordinatorMsg::Tick => {
                    if state.cancelled {
                        return self.finish_cancelled(plan, state).await;
                    }
                    self.try_dispatch(plan, queues, state, &tx).await;
                    if let Some(outcome) = self.check_terminal(plan, state).await {
                        return outcome;
                    }
                }
                CoordinatorMsg::SubtaskDone { subtask_id, output, worker, latency_ms } => {
                    record_worker_usage(
                        &self.ledger,
                        &worker_call_context(&state.session_id, state.workflow_run_index, subtask_id),
                        worker,
                        Usage {
                            input_tokens: 0,
                            output_tokens: 0,
                            model_name: String::new(),
                            provider: String::new(),
                            cost: -1.0,
                            latency_ms,
                        },
                    );
                    state.busy_workers.remove(&worker);
                    state.outputs.insert(subtask_id, output);
                    state.mark_status(subtask_id, SubtaskStatus::Completed);
                    state.done.insert(subtask_id);
                    info!("subtask {} completed on worker {}", subtask_id, worker);
                    self.emit_graph_update(plan, queues, state).await;

                    if let Some(outcome) = self.check_terminal(plan, state).await {
                        return outcome;
                    }
                    let _ = tx.send(CoordinatorMsg::Tick).await;
                }
                CoordinatorMsg::SubtaskFailed { subtask_id, worker, error, self_cancel, latency_ms } => {
                    record_worker_usage(
                        &self.ledger,
                        &worker_call_context(&state.session_id, state.workflow_run_index, subtask_id),
                        worker,
                        Usage {
                            input_tokens: 0,
                            output_tokens: 0,
                            model_name: String::new(),
                            provider: String::new(),
                            cost: -1.0,
                            latency_ms,
                        },
                    );
                    state.busy_workers.remove(&worker);
                    state.cancelled = true;
                    state.cancel_root.cancel();
                    let status = if self_cancel {
                        SubtaskStatus::Cancelled
                    } else {
                        SubtaskStatus::Failed
                    };
                    state.mark_status(subtask_id, status);
                    state.done.insert(subtask_id);
                    if self_cancel {
                        warn!("subtask {} requested self-cancellation", subtask_id);
                    } else {
                        error!("subtask {} failed: {}", subtask_id, error);
                    }
                    self.mark_remaining_cancelled(plan, state);
                    self.emit_graph_update(plan, queues, state).await;
                    self.end_all_sessions(state, "workflow failed").await;

                    let message = if self_cancel {
                        "Cancelled by user".to_string()
                    } else {
                        error
                    };
                    self.emit(WorkflowEvent::WorkflowEnded {
                        session_id: state.session_id.clone(),
                        ok: false,
                        error: Some(message.clone()),
                        summary: Some(self.summarize(state)),
                    })
                    .await;
                    return if self_cancel {
                        DispatchOutcome::Cancelled
                    } else {
                        DispatchOutcome::Failed(message)
                    };
                }
            }
        }
    }

    async fn check_terminal(&self, plan: &TaskPlan, state: &mut SessionState) -> Option<DispatchOutcome> {
        if let Some(final_subtask) = plan.final_subtask() {
            if let Some(output) = state.outputs.get(&final_subtask.id) {
                let text = final_answer_from_output(output);
                self.end_all_sessions(state, "workflow completed").await;
                self.emit(WorkflowEvent::FinalAnswer {
                    session_id: state.session_id.clone(),
                    text: text.clone(),
                })
                .await;
                self.emit(WorkflowEvent::WorkflowEnded {
                    session_id: state.session_id.clone(),
                    ok: true,
                    error: None,
                    summary: Some(self.summarize(state)),
                })
                .await;
                return Some(DispatchOutcome::FinalAnswer(text));
            }
        } else if state.done.len() == plan.subtasks.len() {
            let text = self.concat_all_outputs(plan, state);
            self.end_all_sessions(state, "workflow completed").await;
            self.emit(WorkflowEvent::FinalAnswer {
                session_id: state.session_id.clone(),
                text: text.clone(),
            })
            .await;
            self.emit(WorkflowEvent::WorkflowEnded {
                session_id: state.session_id.clone(),
                ok: true,
                error: None,
                summary: Some(self.summarize(state)),
            })
            .await;
            return Some(DispatchOutcome::AllDone);
        }
        None
    }

    fn concat_all_outputs(&self, plan: &TaskPlan, state: &SessionState) -> String {
        let mut ids: Vec<SubtaskId> = plan.subtasks.iter().map(|s| s.id).collect();
        ids.sort();
        let joined = ids
            .into_iter()
            .filter_map(|id| state.outputs.get(&id).map(|o| o.result.clone()))
            .collect::<Vec<_>>()
            .join("\n\n");
        elide(&joined, FINAL_ANSWER_CONCAT_LIMIT)
    }

    /// One `try_dispatch` pass: for every worker not currently busy, scans
    /// forward from `queue_pointer[w]` for the first subtask whose
    /// dependencies are all done, and spawns it.
    async fn try_dispatch(
        &self,
        plan: &TaskPlan,
        queues: &WorkerQueues,
        state: &mut SessionState,
        tx: &mpsc::Sender<CoordinatorMsg>,
    ) {
        if state.cancelled {
            return;
        }

        let workers: Vec<WorkerId> = queues.queues.keys().copied().collect();
        for w in workers {
            if state.cancelled {
                return;
            }
            if state.busy_workers.contains(&w) {
                continue;
            }

            let queue = &queues.queues[&w];
            let start = *state.queue_pointer.get(&w).unwrap_or(&0);
            for i in start..queue.len() {
                let t = queue[i];
                if state.done.contains(&t) || state.enqueued.contains(&t) {
                    continue;
                }
                let deps = plan.dependencies.get(&t).cloned().unwrap_or_default();
                if deps.iter().all(|d| state.done.contains(d)) {
                    if state.cancelled {
                        state.mark_status(t, SubtaskStatus::Cancelled);
                        state.done.insert(t);
                        continue;
                    }
                    state.enqueued.insert(t);

                    if !state.worker_sessions.contains_key(&w) {
                        let handle = self
                            .worker_agent
                            .create_session(
                                &plan.subtasks.iter().find(|s| s.id == t).map(|s| s.prompt.clone()).unwrap_or_default(),
                                &format!("worker-{}", w + 1),
                                &state.session_id,
                                &plan.task,
                                w + 1,
                            )
                            .await;
                        self.emit(WorkflowEvent::WorkerSessionCreated {
                            session_id: state.session_id.clone(),
                            worker_id: w,
                            worker_session_id: handle.0.clone(),
                            color: super::event::worker_color(w),
                        })
                        .await;
                        state.worker_sessions.insert(w, handle);
                    }

                    state.busy_workers.insert(w);
                    state.mark_status(t, SubtaskStatus::Running);
                    state.queue_pointer.insert(w, i + 1);
                    self.emit_graph_update(plan, queues, state).await;
                    self.spawn_subtask(plan, t, w, state, tx.clone());
                    break;
                }
            }
        }
    }

    fn spawn_subtask(
        &self,
        plan: &TaskPlan,
        subtask_id: SubtaskId,
        worker: WorkerId,
        state: &SessionState,
        tx: mpsc::Sender<CoordinatorMsg>,
    ) {
        let prompt = build_prompt(plan, subtask_id, state);
        let dep_tab_ids: Vec<u64> = {
            let mut seen = HashSet::new();
            let mut ids = Vec::new();
            let deps = plan.dependencies.get(&subtask_id).cloned().unwrap_or_default();
            for d in deps {
                if let Some(output) = state.outputs.get(&d) {
                    for &tab in &output.tab_ids {
                        if seen.insert(tab) {
                            ids.push(tab);
                        }
                    }
                }
            }
            ids
        };
        let session = state.worker_sessions.get(&worker).cloned().expect("session created before spawn");
        let worker_agent = self.worker_agent.clone();
        let clock = self.clock.clone();

        tokio::spawn(async move {
            let started_at = clock.now_ms();
            let result = worker_agent.run_subtask(&session, &prompt, &dep_tab_ids, subtask_id).await;
            let latency_ms = clock.now_ms() - started_at;
            let msg = match result {
                Ok(SubtaskRunResult { output_text, tab_ids, ok: true, .. }) => {
                    if output_text.to_lowercase().contains("cancel") {
                        CoordinatorMsg::SubtaskFailed {
                            subtask_id,
                            worker,
                            error: "worker output indicated cancellation".to_string(),
                            self_cancel: true,
                            latency_ms,
                        }
                    } else {
                        let output = match LlmOutput::worker_done(output_text, tab_ids) {
                            LlmOutput::WorkerDone { text, tab_ids, raw } => {
                                SubtaskOutput { result: text, raw, tab_ids }
                            }
                            _ => unreachable!("LlmOutput::worker_done always returns LlmOutput::WorkerDone"),
                        };
                        CoordinatorMsg::SubtaskDone { subtask_id, output, worker, latency_ms }
                    }
                }
                Ok(SubtaskRunResult { ok: false, error, .. }) => CoordinatorMsg::SubtaskFailed {
                    subtask_id,
                    worker,
                    error: error.unwrap_or_else(|| "worker reported failure".to_string()),
                    self_cancel: false,
                    latency_ms,
                },
                Err(e) => CoordinatorMsg::SubtaskFailed {
                    subtask_id,
                    worker,
                    error: e.to_string(),
                    self_cancel: false,
                    latency_ms,
                },
            };
            let _ = tx.send(msg).await;
        });
    }

    fn mark_remaining_cancelled(&self, plan: &TaskPlan, state: &mut SessionState) {
        for subtask in &plan.subtasks {
            if !state.done.contains(&subtask.id) {
                state.mark_status(subtask.id, SubtaskStatus::Cancelled);
                state.done.insert(subtask.id);
            }
        }
    }

    async fn finish_cancelled(&self, plan: &TaskPlan, state: &mut SessionState) -> DispatchOutcome {
        self.mark_remaining_cancelled(plan, state);
        self.cancel_all_sessions_fire_and_forget(state);
        self.end_all_sessions(state, "cancelled by user").await;
        self.emit(WorkflowEvent::WorkflowEnded {
            session_id: state.session_id.clone(),
            ok: false,
            error: Some("Cancelled by user".to_string()),
            summary: Some(self.summarize(state)),
        })
        .await;
        DispatchOutcome::Cancelled
    }

    /// Asks every known worker session to cancel without waiting for the
    /// acknowledgement.
    fn cancel_all_sessions_fire_and_forget(&self, state: &SessionState) {
        for handle in state.worker_sessions.values().cloned() {
            let worker_agent = self.worker_agent.clone();
            tokio::spawn(async move { worker_agent.cancel(&handle).await });
        }
    }

    async fn end_all_sessions(&self, state: &SessionState, reason: &str) {
        for handle in state.worker_sessions.values() {
            self.worker_agent.end_session(handle, reason).await;
        }
    }

    async fn emit_graph_update(&self, plan: &TaskPlan, queues: &WorkerQueues, state: &SessionState) {
        let nodes: Vec<GraphNode> = plan
            .subtasks
            .iter()
            .map(|s| GraphNode {
                id: s.id,
                title: s.title.clone(),
                status: state.status.get(&s.id).copied().unwrap_or(SubtaskStatus::NotStarted),
                duration: plan.duration_of(s.id),
            })
            .collect();
        let mut edges = Vec::new();
        for s in &plan.subtasks {
            for &dep in &s.dependencies {
                edges.push(GraphEdge { from: dep, to: s.id });
            }
        }
        let _ = queues;
        self.emit(WorkflowEvent::WorkflowGraphUpdate {
            session_id: state.session_id.clone(),
            graph: Graph { nodes, edges },
        })
        .await;
    }

    async fn emit(&self, event: WorkflowEvent) {
        self.events.on_event(&event).await;
    }

    fn summarize(&self, state: &SessionState) -> super::event::UsageSummary {
        let entries = self.ledger.for_session(&state.session_id);
        let total_cost = TokenLedger::sum_cost(&entries);
        let total_input_tokens: u64 = entries.iter().map(|e| e.usage.input_tokens).sum();
        let total_output_tokens: u64 = entries.iter().map(|e| e.usage.output_tokens).sum();
        let total_latency_ms: i64 = entries.iter().map(|e| e.usage.latency_ms).sum();
        // Worker usages are recorded with a blank model/provider (they're
        // opaque browser automation, not billed LLM calls) and are always
        // appended last, so picking the literal last entry would leave the
        // summary's model/provider blank on every normal completion. Walk
        // back to the most recent entry that actually named a model.
        let last_named = entries.iter().rev().find(|e| !e.usage.model_name.is_empty());
        let model_name = last_named.map(|e| e.usage.model_name.clone()).unwrap_or_default();
        let provider = last_named.map(|e| e.usage.provider.clone()).unwrap_or_default();
        super::event::UsageSummary {
            total_input_tokens,
            total_output_tokens,
            total_cost,
            total_latency_ms,
            api_call_count: entries.len() as u64,
            model_name,
            provider,
        }
    }
}

/// A [`CallContext`] for a worker-role usage record (workers don't
/// necessarily call an LLM directly in this crate's scope, but the worker
/// agent may report usage through the same ledger if its implementation
/// wraps an LLM call internally).
pub fn worker_call_context(session_id: &str, workflow_run_index: u32, subtask_id: SubtaskId) -> CallContext {
    CallContext::new(session_id, CallRole::Worker, workflow_run_index).with_subtask(subtask_id)
}

pub fn record_worker_usage(ledger: &TokenLedger, ctx: &CallContext, worker_index: WorkerId, usage: Usage) {
    ledger.add(LedgerEntry {
        task_id: ctx.session_id.clone(),
        session_id: ctx.session_id.clone(),
        worker_index: Some(worker_index),
        workflow_run_index: ctx.workflow_run_index,
        role: ctx.role,
        subtask_id: ctx.subtask_id,
        usage,
    });
}
