//! Typed outbound events and the host-facing [`EventHandler`] trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::plan::{SubtaskId, SubtaskStatus, WorkerId};

/// One node in a [`Graph`] snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: SubtaskId,
    pub title: String,
    pub status: SubtaskStatus,
    pub duration: u32,
}

/// One edge in a [`Graph`] snapshot (`from` is a dependency of `to`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: SubtaskId,
    pub to: SubtaskId,
}

/// A point-in-time snapshot of the task graph, annotated with current
/// status per node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// The refined plan plus its schedule snapshot, sent once per run so a host
/// can render the full dispatch order up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDataset {
    pub task: String,
    pub graph: Graph,
    pub worker_queues: std::collections::HashMap<WorkerId, Vec<SubtaskId>>,
}

/// `{totalInputTokens, totalOutputTokens, totalCost, totalLatencyMs,
/// apiCallCount, modelName, provider}` aggregated from the `TokenLedger`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    /// `-1.0` if no usage in the session had a known cost.
    pub total_cost: f64,
    pub total_latency_ms: i64,
    pub api_call_count: u64,
    pub model_name: String,
    pub provider: String,
}

/// One outbound event a host can receive from a running workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowProgress {
        session_id: String,
        actor: String,
        message: String,
        worker_id: Option<WorkerId>,
    },
    WorkflowGraphUpdate {
        session_id: String,
        graph: Graph,
    },
    WorkflowPlanDataset {
        session_id: String,
        dataset: PlanDataset,
    },
    WorkerSessionCreated {
        session_id: String,
        worker_id: WorkerId,
        worker_session_id: String,
        color: String,
    },
    FinalAnswer {
        session_id: String,
        text: String,
    },
    WorkflowEnded {
        session_id: String,
        ok: bool,
        error: Option<String>,
        summary: Option<UsageSummary>,
    },
}

/// A host implements this to receive workflow events; every method has a
/// no-op default so a host only overrides what it cares about.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, _event: &WorkflowEvent) {}
}

/// An [`EventHandler`] that forwards every event over an unbounded channel,
/// for hosts that prefer to `select!` over a receiver rather than implement
/// the trait.
pub struct ChannelEventHandler {
    sender: tokio::sync::mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelEventHandler {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventHandler for ChannelEventHandler {
    async fn on_event(&self, event: &WorkflowEvent) {
        let _ = self.sender.send(event.clone());
    }
}

/// Assigns a deterministic, distinct color per worker for the host's
/// visualization, cycling through a small fixed palette.
pub fn worker_color(worker_id: WorkerId) -> String {
    const PALETTE: &[&str] = &[
        "#4F46E5", "#059669", "#D97706", "#DC2626", "#7C3AED", "#0891B2",
    ];
    PALETTE[(worker_id as usize) % PALETTE.len()].to_string()
}
