//! Top-level coordinator. Owns `SessionState` and the token ledger for one
//! session, and exposes `start`/`set_refiner_model`/`cancel`.
//!
//! One runner per chat session, holding the injected collaborator handles
//! plus the session-level state; `start()` drives a fixed pipeline of
//! stages — plan → schedule → merge → refine → dispatch.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::task::JoinHandle;

use super::cancellation::CancellationRoot;
use super::config::RunnerConfig;
use super::dispatcher::Dispatcher;
use super::event::{EventHandler, PlanDataset, WorkflowEvent};
use super::ledger::TokenLedger;
use super::llm::Llm;
use super::merger::{collapse, collapse_queues};
use super::plan::TaskPlan;
use super::scheduler;
use super::session::SessionState;
use super::worker::WorkerAgent;
use super::{planner, refiner};

/// A no-op [`EventHandler`], used when a host starts a runner without
/// wiring up an event sink yet.
struct NoopEventHandler;

#[async_trait::async_trait]
impl EventHandler for NoopEventHandler {
    async fn on_event(&self, _event: &WorkflowEvent) {}
}

/// The top-level entry point: one runner per chat session.
pub struct WorkflowRunner {
    config: RunnerConfig,
    worker_agent: Arc<dyn WorkerAgent>,
    events: Arc<dyn EventHandler>,
    ledger: TokenLedger,
    refiner_llm: Option<Arc<dyn Llm>>,
    session_id: String,
    workflow_run_index: u32,
    in_flight: Option<JoinHandle<()>>,
    active_cancel_root: Option<CancellationRoot>,
}

impl WorkflowRunner {
    pub fn new(config: RunnerConfig, worker_agent: Arc<dyn WorkerAgent>) -> Self {
        Self::with_session_id(config, worker_agent, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_session_id(config: RunnerConfig, worker_agent: Arc<dyn WorkerAgent>, session_id: String) -> Self {
        Self {
            config,
            worker_agent,
            events: Arc::new(NoopEventHandler),
            ledger: TokenLedger::new(),
            refiner_llm: None,
            session_id,
            workflow_run_index: 0,
            in_flight: None,
            active_cancel_root: None,
        }
    }

    pub fn with_event_handler(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = events;
        self
    }

    pub fn set_refiner_model(&mut self, llm: Arc<dyn Llm>) {
        self.refiner_llm = Some(llm);
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    /// Starts a new workflow run for `query`. Non-blocking: progress is
    /// reported through the event handler supplied at construction.
    ///
    /// Concurrent `start()` calls on the same runner are disallowed: any
    /// prior in-flight workflow is aborted and its cancellation root reset
    /// before the new run begins.
    pub async fn start(&mut self, query: String, planner_llm: Arc<dyn Llm>) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
        if let Some(root) = &self.active_cancel_root {
            root.cancel();
        }

        let run_index = self.ledger.increment_run(&self.session_id);
        self.workflow_run_index = run_index;

        let cancel_root = CancellationRoot::new();
        self.active_cancel_root = Some(cancel_root.clone());

        let config = Arc::new(RunnerConfigSnapshot {
            max_workers: self.config.max_workers,
            llm_call_timeout: self.config.llm_call_timeout,
            cancel_drain_deadline: self.config.cancel_drain_deadline,
        });
        let worker_agent = self.worker_agent.clone();
        let events = self.events.clone();
        let ledger = self.ledger.clone();
        let refiner_llm = self.refiner_llm.clone();
        let session_id = self.session_id.clone();

        let handle = tokio::spawn(run_workflow(
            query,
            planner_llm,
            refiner_llm,
            worker_agent,
            events,
            ledger,
            session_id,
            run_index,
            cancel_root,
            config,
        ));

        self.in_flight = Some(handle);
    }

    /// Cancels the in-flight workflow, if any. Returns within the
    /// configured drain deadline (default 3s) even if workers are stuck.
    pub async fn cancel(&mut self) {
        let Some(root) = self.active_cancel_root.clone() else {
            return;
        };
        root.cancel();

        if let Some(handle) = self.in_flight.take() {
            match tokio::time::timeout(self.config.cancel_drain_deadline, handle).await {
                Ok(_) => info!("workflow task drained within cancellation deadline"),
                Err(_) => warn!("workflow task did not drain within the cancellation deadline; abandoning it"),
            }
        }
    }
}

struct RunnerConfigSnapshot {
    max_workers: u32,
    llm_call_timeout: Duration,
    cancel_drain_deadline: Duration,
}

#[allow(clippy::too_many_arguments)]
async fn run_workflow(
    query: String,
    planner_llm: Arc<dyn Llm>,
    refiner_llm: Option<Arc<dyn Llm>>,
    worker_agent: Arc<dyn WorkerAgent>,
    events: Arc<dyn EventHandler>,
    ledger: TokenLedger,
    session_id: String,
    workflow_run_index: u32,
    cancel_root: CancellationRoot,
    config: Arc<RunnerConfigSnapshot>,
) {
    let token = cancel_root.child();

    let plan_result = planner::plan(
        &query,
        planner_llm.as_ref(),
        config.max_workers,
        None,
        planner::call_context(&session_id, workflow_run_index),
        &token,
        config.llm_call_timeout,
        &ledger,
    )
    .await;

    let plan = match plan_result {
        Ok(p) => p,
        Err(e) => {
            warn!("planning failed for session {}: {}", session_id, e);
            events
                .on_event(&WorkflowEvent::WorkflowEnded {
                    session_id: session_id.clone(),
                    ok: false,
                    error: Some(e.to_string()),
                    summary: None,
                })
                .await;
            return;
        }
    };

    let schedule = scheduler::schedule(&plan.dependencies, &plan.durations, config.max_workers);
    let (collapsed_plan, id_to_canonical) = collapse(&plan, &schedule);
    let queues = collapse_queues(&schedule, &id_to_canonical);

    let refined_plan = if let Some(llm) = &refiner_llm {
        let events_for_progress = events.clone();
        let session_for_progress = session_id.clone();
        refiner::refine(
            &collapsed_plan,
            llm.as_ref(),
            refiner::call_context(&session_id, workflow_run_index),
            &token,
            config.llm_call_timeout,
            &ledger,
            move |event| {
                let events = events_for_progress.clone();
                let _ = &session_for_progress;
                tokio::spawn(async move { events.on_event(&event).await });
            },
        )
        .await
    } else {
        collapsed_plan.clone()
    };

    events
        .on_event(&WorkflowEvent::WorkflowPlanDataset {
            session_id: session_id.clone(),
            dataset: PlanDataset {
                task: refined_plan.task.clone(),
                graph: super::merger::viz_merge(&plan, &schedule, &std::collections::HashMap::new()),
                worker_queues: queues.queues.clone(),
            },
        })
        .await;

    let mut state = SessionState::new(
        session_id.clone(),
        workflow_run_index,
        refined_plan.subtasks.iter().map(|s| s.id),
    );
    state.cancel_root = cancel_root.clone();

    let dispatcher = Dispatcher {
        worker_agent,
        events: events.clone(),
        ledger: ledger.clone(),
        clock: Arc::new(super::clock::SystemClock::new()),
    };

    tokio::select! {
        _ = dispatcher.run(&refined_plan, &queues, &mut state) => {}
        _ = token.cancelled() => {
            state.cancelled = true;
            dispatcher.run(&refined_plan, &queues, &mut state).await;
        }
    }
}
