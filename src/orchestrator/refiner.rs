//! Rewrites subtask titles/prompts/`no_browse` while preserving structural
//! invariants. Infallible at the API boundary: any LLM failure, parse
//! failure, or invariant violation falls back to the input plan and a
//! `"Refinement skipped"` progress note.

use std::time::Duration;

use log::warn;
use tokio::time::timeout;

use super::event::WorkflowEvent;
use super::ledger::{LedgerEntry, TokenLedger};
use super::llm::{CallContext, CallRole, Llm, LlmOutput, Message};
use super::plan::TaskPlan;

const REFINER_SYSTEM_PROMPT: &str = "You are a plan-refinement assistant. You are given a task plan as \
JSON. Rewrite each subtask's title, prompt, and noBrowse flag to be clearer and more actionable, \
but you must not add, remove, or reorder subtasks, and you must not change ids, dependencies, \
durations, isFinal, or the top-level task string. Respond with a single fenced ```json block \
containing the full revised plan.";

/// Returns the refined plan, or `plan.clone()` unchanged if refinement
/// failed or violated an invariant — in which case `on_progress` is called
/// with a `WorkflowEvent::WorkflowProgress` carrying the message
/// `"Refinement skipped"`.
pub async fn refine<F>(
    plan: &TaskPlan,
    llm: &dyn Llm,
    ctx: CallContext,
    cancel: &tokio_util::sync::CancellationToken,
    call_timeout: Duration,
    ledger: &TokenLedger,
    mut on_progress: F,
) -> TaskPlan
where
    F: FnMut(WorkflowEvent),
{
    let skip = |reason: &str, mut on_progress: F| -> TaskPlan {
        warn!("refinement skipped: {}", reason);
        on_progress(WorkflowEvent::WorkflowProgress {
            session_id: ctx.session_id.clone(),
            actor: "refiner".to_string(),
            message: "Refinement skipped".to_string(),
            worker_id: None,
        });
        plan.clone()
    };

    let plan_json = match serde_json::to_string(plan) {
        Ok(j) => j,
        Err(e) => return skip(&format!("could not serialize plan: {}", e), on_progress),
    };

    let messages = vec![
        Message::system(REFINER_SYSTEM_PROMPT),
        Message::user(plan_json),
    ];

    let invocation = llm.invoke(&messages, &ctx);

    let outcome = tokio::select! {
        result = timeout(call_timeout, invocation) => result,
        _ = cancel.cancelled() => return skip("cancelled", on_progress),
    };

    let (content, usage) = match outcome {
        Ok(Ok(ok)) => ok,
        Ok(Err(e)) => return skip(&format!("LLM call failed: {}", e), on_progress),
        Err(_elapsed) => return skip("LLM call timed out", on_progress),
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

    let candidate = match LlmOutput::parse_refinement(&content) {
        Ok(LlmOutput::Refinement(p)) => p,
        Ok(_) => unreachable!("LlmOutput::parse_refinement always returns LlmOutput::Refinement"),
        Err(e) => return skip(&format!("could not parse refined plan JSON: {}", e), on_progress),
    };

    match invariants_hold(plan, &candidate) {
        Ok(()) => candidate,
        Err(reason) => skip(&reason, on_progress),
    }
}

/// Checks the structural invariants refinement must preserve: subtask
/// count, id set, per-subtask dependency list (order and membership),
/// `task`, `is_final`, and `durations` must all be unchanged; only `title`,
/// `prompt`, `no_browse` may differ.
fn invariants_hold(original: &TaskPlan, candidate: &TaskPlan) -> Result<(), String> {
    if original.task != candidate.task {
        return Err("task string changed".to_string());
    }
    if original.subtasks.len() != candidate.subtasks.len() {
        return Err("subtask count changed".to_string());
    }
    if original.durations != candidate.durations {
        return Err("durations changed".to_string());
    }

    let mut candidate_by_id: std::collections::HashMap<_, _> =
        candidate.subtasks.iter().map(|s| (s.id, s)).collect();

    for original_subtask in &original.subtasks {
        let matched = candidate_by_id
            .remove(&original_subtask.id)
            .ok_or_else(|| format!("subtask id {} missing from refined plan", original_subtask.id))?;
        if matched.dependencies != original_subtask.dependencies {
            return Err(format!("dependencies of subtask {} changed", original_subtask.id));
        }
        if matched.is_final != original_subtask.is_final {
            return Err(format!("isFinal of subtask {} changed", original_subtask.id));
        }
    }

    if !candidate_by_id.is_empty() {
        return Err("refined plan introduced new subtask ids".to_string());
    }

    Ok(())
}

pub fn call_context(session_id: &str, workflow_run_index: u32) -> CallContext {
    CallContext::new(session_id, CallRole::Refiner, workflow_run_index)
}
