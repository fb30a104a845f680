//! Calls an injected LLM to produce a [`TaskPlan`] from the user query.
//!
//! The flow is always build prompt → send → parse → validate → record
//! usage; every invocation carries an explicit [`CallContext`] so usage is
//! attributed to the right session/run without any ambient state.

use log::{info, warn};
use tokio::time::timeout;

use super::error::{LlmError, OrchestrationError};
use super::ledger::{LedgerEntry, TokenLedger};
use super::llm::{CallContext, CallRole, Llm, LlmOutput, Message};
use super::plan::TaskPlan;

use std::time::Duration;

const PLANNER_SYSTEM_PROMPT: &str = "You are a planning assistant for a browser-automation agent. \
Given a user goal, produce a JSON task plan: a list of subtasks with ids, titles, prompts, and \
dependencies, such that executing them in dependency order achieves the goal. Respond with a \
single fenced ```json block containing the plan.";

/// Produces a [`TaskPlan`] from `query`, racing the LLM call against both
/// `call_timeout` and the parent cancellation token, and recording usage to
/// `ledger` under role `CallRole::Planner`.
pub async fn plan(
    query: &str,
    llm: &dyn Llm,
    max_workers: u32,
    history: Option<&str>,
    ctx: CallContext,
    cancel: &tokio_util::sync::CancellationToken,
    call_timeout: Duration,
    ledger: &TokenLedger,
) -> Result<TaskPlan, OrchestrationError> {
    let mut user_prompt = format!(
        "User goal: {}\nMaximum concurrent workers available: {}.",
        query, max_workers
    );
    if let Some(history) = history {
        user_prompt = format!("Recent conversation:\n{}\n\n{}", history, user_prompt);
    }

    let messages = vec![
        Message::system(PLANNER_SYSTEM_PROMPT),
        Message::user(user_prompt),
    ];

    let invocation = llm.invoke(&messages, &ctx);

    let (content, usage) = tokio::select! {
        result = timeout(call_timeout, invocation) => match result {
            Ok(Ok(ok)) => ok,
            Ok(Err(LlmError::Cancelled)) => return Err(OrchestrationError::Cancelled),
            Ok(Err(_)) => return Err(OrchestrationError::Timeout),
            Err(_elapsed) => return Err(OrchestrationError::Timeout),
        },
        _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
    };

    ledger.add(LedgerEntry {
        task_id: ctx.session_id.clone(),
        session_id: ctx.session_id.clone(),
        worker_index: None,
        workflow_run_index: ctx.workflow_run_index,
        role: ctx.role,
        subtask_id: ctx.subtask_id,
        usage,
    });

    info!(
        "planner raw output for session {}: {}",
        ctx.session_id,
        preview(&content, 200)
    );

    let candidate = match LlmOutput::parse_plan(&content) {
        Ok(LlmOutput::Plan(plan)) => plan,
        Ok(_) => unreachable!("LlmOutput::parse_plan always returns LlmOutput::Plan"),
        Err(e) => {
            return Err(OrchestrationError::InvalidPlan(format!(
                "could not parse plan JSON: {}",
                e
            )))
        }
    };

    if candidate.subtasks.is_empty() {
        return Err(OrchestrationError::InvalidPlan("plan has zero subtasks".to_string()));
    }

    candidate
        .validate()
        .map_err(|e| OrchestrationError::InvalidPlan(format!("{:?}", e)))?;

    info!(
        "planner produced a {}-subtask plan for session {}",
        candidate.subtasks.len(),
        ctx.session_id
    );

    Ok(candidate)
}

/// Truncates `text` to a short preview for log lines, stripping newlines.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    if flat.chars().count() > max_chars {
        let truncated: String = flat.chars().take(max_chars).collect();
        warn!("truncating planner prompt preview to {} chars", max_chars);
        format!("{}...", truncated)
    } else {
        flat
    }
}

pub fn call_context(session_id: &str, workflow_run_index: u32) -> CallContext {
    CallContext::new(session_id, CallRole::Planner, workflow_run_index)
}
