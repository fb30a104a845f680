use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use taskflow_core::orchestrator::error::LlmError;
use taskflow_core::orchestrator::ledger::TokenLedger;
use taskflow_core::orchestrator::llm::{CallContext, Llm, Message, Usage};
use taskflow_core::orchestrator::plan::{Subtask, TaskPlan};
use taskflow_core::orchestrator::refiner::{call_context, refine};

struct ScriptedLlm {
    response: String,
}

#[async_trait]
impl Llm for ScriptedLlm {
    async fn invoke(&self, _messages: &[Message], _ctx: &CallContext) -> Result<(String, Usage), LlmError> {
        Ok((
            self.response.clone(),
            Usage {
                input_tokens: 10,
                output_tokens: 20,
                model_name: "mock-model".to_string(),
                provider: "mock".to_string(),
                cost: 0.001,
                latency_ms: 5,
            },
        ))
    }
}

struct FailingLlm;

#[async_trait]
impl Llm for FailingLlm {
    async fn invoke(&self, _messages: &[Message], _ctx: &CallContext) -> Result<(String, Usage), LlmError> {
        Err(LlmError::Transport("connection reset".to_string()))
    }
}

fn two_step_plan() -> TaskPlan {
    let subtasks = vec![
        Subtask::new(1, "Open site", "Navigate to the site"),
        Subtask::new(2, "Search", "Search for the item")
            .with_dependencies(vec![1])
            .with_final(true),
    ];
    let dependencies = subtasks.iter().map(|s| (s.id, s.dependencies.clone())).collect();
    TaskPlan {
        task: "buy an item".to_string(),
        subtasks,
        dependencies,
        durations: [(1, 2), (2, 1)].into_iter().collect::<HashMap<_, _>>(),
    }
}

#[tokio::test]
async fn a_valid_refinement_replaces_titles_and_prompts() {
    let plan = two_step_plan();
    let mut refined = plan.clone();
    refined.subtasks[0].title = "Go to the store's website".to_string();
    refined.subtasks[1].title = "Find and add the item to the cart".to_string();
    let response = format!("```json\n{}\n```", serde_json::to_string(&refined).unwrap());

    let llm = ScriptedLlm { response };
    let ledger = TokenLedger::new();
    let token = tokio_util::sync::CancellationToken::new();
    let mut progress_messages = Vec::new();

    let result = refine(
        &plan,
        &llm,
        call_context("session-1", 1),
        &token,
        Duration::from_secs(5),
        &ledger,
        |event| progress_messages.push(event),
    )
    .await;

    assert_eq!(result.subtasks[0].title, "Go to the store's website");
    assert_eq!(result.subtasks[1].title, "Find and add the item to the cart");
    assert!(progress_messages.is_empty());
    assert_eq!(ledger.for_session("session-1").len(), 1);
}

#[tokio::test]
async fn a_refinement_that_drops_a_subtask_is_rejected_and_the_original_plan_survives() {
    let plan = two_step_plan();
    let mut broken = plan.clone();
    broken.subtasks.remove(1);
    broken.dependencies.remove(&2);
    let response = format!("```json\n{}\n```", serde_json::to_string(&broken).unwrap());

    let llm = ScriptedLlm { response };
    let ledger = TokenLedger::new();
    let token = tokio_util::sync::CancellationToken::new();
    let mut progress_messages = Vec::new();

    let result = refine(
        &plan,
        &llm,
        call_context("session-2", 1),
        &token,
        Duration::from_secs(5),
        &ledger,
        |event| progress_messages.push(event),
    )
    .await;

    assert_eq!(result, plan);
    assert_eq!(progress_messages.len(), 1);
}

#[tokio::test]
async fn a_refinement_that_changes_dependencies_is_rejected() {
    let plan = two_step_plan();
    let mut broken = plan.clone();
    broken.subtasks[1].dependencies.clear();
    broken.dependencies.insert(2, Vec::new());
    let response = format!("```json\n{}\n```", serde_json::to_string(&broken).unwrap());

    let llm = ScriptedLlm { response };
    let ledger = TokenLedger::new();
    let token = tokio_util::sync::CancellationToken::new();
    let mut progress_messages = Vec::new();

    let result = refine(
        &plan,
        &llm,
        call_context("session-3", 1),
        &token,
        Duration::from_secs(5),
        &ledger,
        |event| progress_messages.push(event),
    )
    .await;

    assert_eq!(result, plan);
    assert_eq!(progress_messages.len(), 1);
}

#[tokio::test]
async fn a_failing_llm_call_falls_back_to_the_original_plan() {
    let plan = two_step_plan();
    let llm = FailingLlm;
    let ledger = TokenLedger::new();
    let token = tokio_util::sync::CancellationToken::new();
    let mut progress_messages = Vec::new();

    let result = refine(
        &plan,
        &llm,
        call_context("session-4", 1),
        &token,
        Duration::from_secs(5),
        &ledger,
        |event| progress_messages.push(event),
    )
    .await;

    assert_eq!(result, plan);
    assert_eq!(progress_messages.len(), 1);
    assert!(ledger.for_session("session-4").is_empty());
}

#[tokio::test]
async fn a_cancelled_token_short_circuits_to_the_original_plan() {
    let plan = two_step_plan();
    let llm = ScriptedLlm {
        response: "won't be reached in time".to_string(),
    };
    let ledger = TokenLedger::new();
    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let mut progress_messages = Vec::new();

    let result = refine(
        &plan,
        &llm,
        call_context("session-5", 1),
        &token,
        Duration::from_secs(5),
        &ledger,
        |event| progress_messages.push(event),
    )
    .await;

    assert_eq!(result, plan);
}
