//! `taskflow-core` is the multi-agent orchestration core of a browser-automation
//! assistant: it decomposes a user goal into a task graph, schedules that graph
//! across a bounded pool of worker agents, dispatches subtasks with prior-output
//! substitution, and drives the run to completion or cooperative cancellation.
//!
//! Everything that talks to a real LLM or a real browser is an injected
//! collaborator ([`Llm`](orchestrator::llm::Llm), [`WorkerAgent`](orchestrator::worker::WorkerAgent)) —
//! this crate owns the graph, the schedule, and the event stream, not the I/O.
//!
//! # Example
//!
//! ```no_run
//! use taskflow_core::orchestrator::runner::WorkflowRunner;
//! use taskflow_core::orchestrator::config::RunnerConfig;
//!
//! # async fn demo(planner_llm: std::sync::Arc<dyn taskflow_core::orchestrator::llm::Llm>,
//! #                worker_agent: std::sync::Arc<dyn taskflow_core::orchestrator::worker::WorkerAgent>) {
//! env_logger::init();
//! let mut runner = WorkflowRunner::new(RunnerConfig::default(), worker_agent);
//! runner.start("book a flight to Tokyo".to_string(), planner_llm).await;
//! # }
//! ```

pub mod orchestrator;

pub use orchestrator::cancellation::CancellationRoot;
pub use orchestrator::error::OrchestrationError;
pub use orchestrator::event::{EventHandler, WorkflowEvent};
pub use orchestrator::llm::{CallContext, Llm, LlmOutput, Message, Role, Usage};
pub use orchestrator::plan::{Subtask, SubtaskId, TaskPlan, WorkerId};
pub use orchestrator::runner::WorkflowRunner;
pub use orchestrator::worker::WorkerAgent;
