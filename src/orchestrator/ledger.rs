//! Session-scoped, worker-indexed, run-indexed ledger of LLM usage.
//!
//! Exposed as a handle the runner owns ([`TokenLedger::new`]), not as
//! module-level state, so tests can instantiate a fresh ledger per case.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::llm::{CallRole, Usage};

/// One recorded usage, indexed the way §4.6 specifies:
/// `(sessionId, workerIndex, workflowRunIndex, role, subtaskId)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub task_id: String,
    pub session_id: String,
    pub worker_index: Option<u32>,
    pub workflow_run_index: u32,
    pub role: CallRole,
    pub subtask_id: Option<u32>,
    pub usage: Usage,
}

#[derive(Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    seen_fingerprints: HashSet<String>,
    run_counters: HashMap<String, u32>,
}

/// The token/cost ledger. Cheap to `Clone` (internally `Arc`-backed) so the
/// runner and every planner/refiner/dispatcher call site can share one
/// instance without lifetimes.
#[derive(Clone)]
pub struct TokenLedger {
    state: std::sync::Arc<Mutex<LedgerState>>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self {
            state: std::sync::Arc::new(Mutex::new(LedgerState::default())),
        }
    }

    pub fn add(&self, entry: LedgerEntry) {
        self.state.lock().unwrap().entries.push(entry);
    }

    /// Drops the entry if `fingerprint` was already recorded, scoped by
    /// `entry.task_id` (prevents double-counting when both an SDK and a
    /// wrapping HTTP layer report the same usage).
    pub fn add_once(&self, fingerprint: &str, entry: LedgerEntry) {
        let mut state = self.state.lock().unwrap();
        let scoped = format!("{}|{}", entry.task_id, fingerprint);
        if state.seen_fingerprints.insert(scoped) {
            state.entries.push(entry);
        }
    }

    /// Usages whose `task_id == sid` **or** `session_id == sid`.
    pub fn for_session(&self, sid: &str) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.task_id == sid || e.session_id == sid)
            .cloned()
            .collect()
    }

    /// Bumps and returns the per-session run counter. Every `start()` must
    /// call this first so UI dashboards can distinguish re-runs of the same
    /// chat.
    pub fn increment_run(&self, sid: &str) -> u32 {
        let mut state = self.state.lock().unwrap();
        let counter = state.run_counters.entry(sid.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn clear(&self, sid: &str) {
        let mut state = self.state.lock().unwrap();
        state.entries.retain(|e| e.task_id != sid && e.session_id != sid);
    }

    /// Sums only non-negative costs; returns `-1.0` if none of `entries` had
    /// a known cost.
    pub fn sum_cost(entries: &[LedgerEntry]) -> f64 {
        let known: f64 = entries
            .iter()
            .filter(|e| e.usage.has_known_cost())
            .map(|e| e.usage.cost)
            .sum();
        let any_known = entries.iter().any(|e| e.usage.has_known_cost());
        if any_known {
            known
        } else {
            -1.0
        }
    }
}

impl Default for TokenLedger {
    fn default() -> Self {
        Self::new()
    }
}
