//! The injected LLM boundary.
//!
//! `taskflow-core` never decides which model to call or how to bill it — it
//! calls [`Llm::invoke`] with an explicit [`CallContext`] and parses the
//! result into a tagged [`LlmOutput`]. This replaces the ambient
//! "current task id / current role / current parent session" globals that an
//! earlier design relied on to stamp usage records: the context now travels
//! with the call.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::LlmError;
use super::plan::TaskPlan;

/// The role a message (or an LLM invocation) plays in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A single message in the short ordered list sent to an [`Llm`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Arc<str>,
}

impl Message {
    pub fn system(content: impl Into<Arc<str>>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<Arc<str>>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Which logical call site an LLM invocation came from, for ledger
/// attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRole {
    Planner,
    Refiner,
    Worker,
}

/// Explicit context threaded through every LLM invocation, replacing
/// process-wide "current task" state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub session_id: String,
    pub role: CallRole,
    pub subtask_id: Option<u32>,
    pub workflow_run_index: u32,
}

impl CallContext {
    pub fn new(session_id: impl Into<String>, role: CallRole, workflow_run_index: u32) -> Self {
        Self {
            session_id: session_id.into(),
            role,
            subtask_id: None,
            workflow_run_index,
        }
    }

    pub fn with_subtask(mut self, subtask_id: u32) -> Self {
        self.subtask_id = Some(subtask_id);
        self
    }
}

/// Token/latency usage for one LLM invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model_name: String,
    pub provider: String,
    /// `-1.0` when pricing for `model_name` is unknown.
    pub cost: f64,
    pub latency_ms: i64,
}

impl Usage {
    pub fn has_known_cost(&self) -> bool {
        self.cost >= 0.0
    }
}

/// The injected language model.
///
/// Never exposed by this crate as a concrete implementation: production
/// code supplies one backed by whatever transport/model-registry it wants,
/// tests supply a hand-rolled fake.
#[async_trait]
pub trait Llm: Send + Sync {
    async fn invoke(
        &self,
        messages: &[Message],
        ctx: &CallContext,
    ) -> Result<(String, Usage), LlmError>;
}

/// Dynamic, untyped JSON from an LLM only ever crosses this validation
/// boundary as one of these three tagged shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmOutput {
    Plan(TaskPlan),
    Refinement(TaskPlan),
    WorkerDone {
        text: String,
        tab_ids: Vec<u64>,
        raw: Option<serde_json::Value>,
    },
}

impl LlmOutput {
    /// Recovers a fenced ` ```json ` block from planner output (if present)
    /// and parses it as a [`TaskPlan`], wrapped as `LlmOutput::Plan`. This is
    /// the only place planner JSON is allowed to cross into a typed value.
    pub fn parse_plan(content: &str) -> Result<LlmOutput, serde_json::Error> {
        let candidate: TaskPlan = serde_json::from_str(extract_fenced_json(content))?;
        Ok(LlmOutput::Plan(candidate))
    }

    /// Same recovery as [`LlmOutput::parse_plan`], wrapped as
    /// `LlmOutput::Refinement` for the refiner's call site.
    pub fn parse_refinement(content: &str) -> Result<LlmOutput, serde_json::Error> {
        let candidate: TaskPlan = serde_json::from_str(extract_fenced_json(content))?;
        Ok(LlmOutput::Refinement(candidate))
    }

    /// Builds a `WorkerDone` from a worker's raw output text, recovering a
    /// fenced ` ```json ` block and parsing it as `raw` if the content looks
    /// like a JSON array or object.
    pub fn worker_done(text: String, tab_ids: Vec<u64>) -> LlmOutput {
        let candidate = extract_fenced_json(&text);
        let trimmed = candidate.trim();
        let looks_like_json = (trimmed.starts_with('[') && trimmed.ends_with(']'))
            || (trimmed.starts_with('{') && trimmed.ends_with('}'));
        let raw = if looks_like_json {
            serde_json::from_str(trimmed).ok()
        } else {
            None
        };
        LlmOutput::WorkerDone { text, tab_ids, raw }
    }
}

/// Extracts a fenced ` ```json ` block if present, otherwise returns the
/// input unchanged. Used by the planner/refiner/dispatcher before parsing
/// LLM output as JSON.
pub fn extract_fenced_json(text: &str) -> &str {
    let trimmed = text.trim();
    let fence_start = match trimmed.find("```json") {
        Some(idx) => idx + "```json".len(),
        None => match trimmed.find("```") {
            Some(idx) => idx + "```".len(),
            None => return trimmed,
        },
    };
    let rest = &trimmed[fence_start..];
    match rest.find("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}
