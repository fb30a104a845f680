//! Crate-wide error taxonomy.
//!
//! Mirrors [`crate::orchestrator`]'s other hand-rolled error types: a plain
//! `enum`, a manual [`fmt::Display`], and a manual [`std::error::Error`] impl
//! rather than a derive macro.

use std::error::Error;
use std::fmt;

/// Errors that can cross a fallible boundary in the orchestration core.
///
/// `PricingUnavailable` and `DoubleUsageReport` are part of the taxonomy for
/// documentation purposes but are never actually returned from a fallible
/// function: pricing gaps are represented structurally as `cost = -1` and
/// duplicate usage reports are silently dropped by [`super::ledger::TokenLedger::add_once`].
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestrationError {
    /// The parent cancellation token fired before the operation completed.
    Cancelled,
    /// An LLM call exceeded its per-call deadline.
    Timeout,
    /// The planner produced a plan that doesn't conform to `TaskPlan`'s
    /// invariants (non-integer ids, cyclic dependencies, zero subtasks).
    InvalidPlan(String),
    /// A subtask returned `ok = false` or the worker agent call itself failed.
    WorkerFailure(String),
    /// No cost could be attributed to a usage record.
    PricingUnavailable,
    /// A usage record was reported twice for the same fingerprint and dropped.
    DoubleUsageReport,
}

impl fmt::Display for OrchestrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestrationError::Cancelled => write!(f, "cancelled by user"),
            OrchestrationError::Timeout => write!(f, "LLM call timed out"),
            OrchestrationError::InvalidPlan(reason) => write!(f, "invalid plan: {}", reason),
            OrchestrationError::WorkerFailure(reason) => write!(f, "worker failure: {}", reason),
            OrchestrationError::PricingUnavailable => write!(f, "pricing unavailable"),
            OrchestrationError::DoubleUsageReport => write!(f, "duplicate usage report"),
        }
    }
}

impl Error for OrchestrationError {}

/// Errors specific to an [`Llm`](super::llm::Llm) implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmError {
    Cancelled,
    Timeout,
    Transport(String),
    MalformedOutput(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Cancelled => write!(f, "cancelled by user"),
            LlmError::Timeout => write!(f, "LLM call timed out"),
            LlmError::Transport(msg) => write!(f, "transport error: {}", msg),
            LlmError::MalformedOutput(msg) => write!(f, "malformed LLM output: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// Errors specific to a [`WorkerAgent`](super::worker::WorkerAgent) implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerError {
    Cancelled,
    Failed(String),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Cancelled => write!(f, "cancelled by user"),
            WorkerError::Failed(msg) => write!(f, "worker failed: {}", msg),
        }
    }
}

impl Error for WorkerError {}
