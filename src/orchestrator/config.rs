//! Configuration for the orchestration core.
//!
//! Users construct [`RunnerConfig`] manually — no file-parsing dependency is
//! introduced.
//!
//! # Example
//!
//! ```rust
//! use taskflow_core::orchestrator::config::RunnerConfig;
//!
//! let config = RunnerConfig::default();
//! assert_eq!(config.max_workers, 4);
//! ```

use std::time::Duration;

/// Tunables for one [`WorkflowRunner`](super::runner::WorkflowRunner).
///
/// This struct is intentionally minimal; no TOML/YAML/env parsing is built
/// in.
pub struct RunnerConfig {
    /// Upper bound on the number of distinct workers the scheduler may
    /// allocate.
    pub max_workers: u32,
    /// Per-call deadline for planner/refiner LLM invocations, raced against
    /// the parent cancellation token.
    pub llm_call_timeout: Duration,
    /// Overall deadline `cancel()` waits for in-flight worker futures before
    /// proceeding regardless (spec: 3 seconds).
    pub cancel_drain_deadline: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            llm_call_timeout: Duration::from_secs(60),
            cancel_drain_deadline: Duration::from_secs(3),
        }
    }
}
