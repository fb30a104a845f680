use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskflow_core::orchestrator::config::RunnerConfig;
use taskflow_core::orchestrator::error::{LlmError, WorkerError};
use taskflow_core::orchestrator::event::{ChannelEventHandler, WorkflowEvent};
use taskflow_core::orchestrator::llm::{CallContext, Llm, Message, Usage};
use taskflow_core::orchestrator::plan::{Subtask, SubtaskId, TaskPlan};
use taskflow_core::orchestrator::runner::WorkflowRunner;
use taskflow_core::orchestrator::worker::{SubtaskRunResult, WorkerAgent, WorkerSessionHandle};

struct FixedPlanLlm {
    plan: TaskPlan,
}

#[async_trait]
impl Llm for FixedPlanLlm {
    async fn invoke(&self, _messages: &[Message], _ctx: &CallContext) -> Result<(String, Usage), LlmError> {
        let body = serde_json::to_string(&self.plan).unwrap();
        Ok((
            format!("```json\n{}\n```", body),
            Usage {
                input_tokens: 50,
                output_tokens: 100,
                model_name: "mock-planner".to_string(),
                provider: "mock".to_string(),
                cost: 0.01,
                latency_ms: 1,
            },
        ))
    }
}

fn linear_plan() -> TaskPlan {
    let subtasks = vec![
        Subtask::new(1, "Open site", "Navigate to the site"),
        Subtask::new(2, "Checkout", "Complete checkout")
            .with_dependencies(vec![1])
            .with_final(true),
    ];
    let dependencies = subtasks.iter().map(|s| (s.id, s.dependencies.clone())).collect();
    TaskPlan {
        task: "buy an item".to_string(),
        subtasks,
        dependencies,
        durations: HashMap::new(),
    }
}

struct InstantWorkerAgent;

#[async_trait]
impl WorkerAgent for InstantWorkerAgent {
    async fn create_session(
        &self,
        _initial_instruction: &str,
        pretty_name: &str,
        _parent_session_id: &str,
        _top_level_task: &str,
        _human_index: u32,
    ) -> WorkerSessionHandle {
        WorkerSessionHandle(pretty_name.to_string())
    }

    async fn run_subtask(
        &self,
        _session: &WorkerSessionHandle,
        _prompt: &str,
        _tab_ids: &[u64],
        subtask_id: SubtaskId,
    ) -> Result<SubtaskRunResult, WorkerError> {
        Ok(SubtaskRunResult {
            output_text: format!("finished subtask {}", subtask_id),
            tab_ids: vec![],
            ok: true,
            error: None,
        })
    }

    async fn end_session(&self, _session: &WorkerSessionHandle, _reason: &str) {}

    async fn cancel(&self, _session: &WorkerSessionHandle) {}
}

struct HangingWorkerAgent {
    sessions_created: AtomicU32,
}

#[async_trait]
impl WorkerAgent for HangingWorkerAgent {
    async fn create_session(
        &self,
        _initial_instruction: &str,
        pretty_name: &str,
        _parent_session_id: &str,
        _top_level_task: &str,
        _human_index: u32,
    ) -> WorkerSessionHandle {
        self.sessions_created.fetch_add(1, Ordering::SeqCst);
        WorkerSessionHandle(pretty_name.to_string())
    }

    async fn run_subtask(
        &self,
        _session: &WorkerSessionHandle,
        _prompt: &str,
        _tab_ids: &[u64],
        _subtask_id: SubtaskId,
    ) -> Result<SubtaskRunResult, WorkerError> {
        // Simulates a worker that never responds to cooperative
        // cancellation; the runner's cancel() bound must still return.
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(SubtaskRunResult {
            output_text: "too late".to_string(),
            tab_ids: vec![],
            ok: true,
            error: None,
        })
    }

    async fn end_session(&self, _session: &WorkerSessionHandle, _reason: &str) {}

    async fn cancel(&self, _session: &WorkerSessionHandle) {}
}

#[tokio::test]
async fn a_linear_workflow_runs_to_a_final_answer() {
    let (handler, mut receiver) = ChannelEventHandler::new();
    let mut runner = WorkflowRunner::new(RunnerConfig::default(), Arc::new(InstantWorkerAgent))
        .with_event_handler(Arc::new(handler));

    let planner_llm = Arc::new(FixedPlanLlm { plan: linear_plan() });
    runner.start("buy an item".to_string(), planner_llm).await;

    let mut saw_final_answer = false;
    let mut saw_ended_ok = false;
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("workflow did not emit WorkflowEnded in time")
    {
        match event {
            WorkflowEvent::FinalAnswer { text, .. } => {
                assert!(text.contains("finished subtask 2"));
                saw_final_answer = true;
            }
            WorkflowEvent::WorkflowEnded { ok, .. } => {
                saw_ended_ok = ok;
                break;
            }
            _ => {}
        }
    }

    assert!(saw_final_answer);
    assert!(saw_ended_ok);
}

#[tokio::test]
async fn cancel_returns_within_the_drain_deadline_even_with_a_stuck_worker() {
    let (handler, mut receiver) = ChannelEventHandler::new();
    let mut config = RunnerConfig::default();
    config.cancel_drain_deadline = Duration::from_millis(200);

    let worker_agent = Arc::new(HangingWorkerAgent {
        sessions_created: AtomicU32::new(0),
    });
    let mut runner = WorkflowRunner::new(config, worker_agent).with_event_handler(Arc::new(handler));

    let planner_llm = Arc::new(FixedPlanLlm { plan: linear_plan() });
    runner.start("buy an item".to_string(), planner_llm).await;

    // Give the workflow a moment to plan, schedule, and dispatch the first
    // subtask onto the (now stuck) worker.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = tokio::time::Instant::now();
    runner.cancel().await;
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_secs(1),
        "cancel() took {:?}, expected it to return near the drain deadline",
        elapsed
    );

    let mut saw_ended_not_ok = false;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(1), receiver.recv()).await {
        if let WorkflowEvent::WorkflowEnded { ok, .. } = event {
            saw_ended_not_ok = !ok;
            break;
        }
    }
    assert!(saw_ended_not_ok);
}
