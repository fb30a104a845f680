//! The immutable typed DAG: subtasks, dependencies, durations, schedule and
//! queue derivations.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A subtask id, unique within one plan.
pub type SubtaskId = u32;

/// A worker id, allocated by the scheduler in `0..max_workers`.
pub type WorkerId = u32;

/// Lifecycle state of a single subtask within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// One unit of agent work.
///
/// Immutable once planned; the only way to change a subtask's fields is a
/// whole-plan replacement by [`refine`](crate::orchestrator::refiner::refine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub title: String,
    pub prompt: String,
    /// Ordered; iteration order is contractual for the scheduler's affinity
    /// pass (see [`crate::orchestrator::scheduler`]).
    pub dependencies: Vec<SubtaskId>,
    pub is_final: bool,
    pub no_browse: bool,
    pub suggested_urls: Vec<String>,
    pub suggested_search_queries: Vec<String>,
}

impl Subtask {
    pub fn new(id: SubtaskId, title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            prompt: prompt.into(),
            dependencies: Vec::new(),
            is_final: false,
            no_browse: false,
            suggested_urls: Vec::new(),
            suggested_search_queries: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<SubtaskId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_final(mut self, is_final: bool) -> Self {
        self.is_final = is_final;
        self
    }

    pub fn with_no_browse(mut self, no_browse: bool) -> Self {
        self.no_browse = no_browse;
        self
    }
}

/// The DAG of subtasks plus durations and the top-level task string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    /// The top-level user goal. Immutable across refinement.
    pub task: String,
    /// Sorted by id ascending.
    pub subtasks: Vec<Subtask>,
    /// Duplicated from `Subtask::dependencies` for O(1) access; must agree.
    pub dependencies: HashMap<SubtaskId, Vec<SubtaskId>>,
    /// Defaults to 1 for any id with no explicit entry.
    pub durations: HashMap<SubtaskId, u32>,
}

/// Why a `TaskPlan` failed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanValidationError {
    Empty,
    NonIntegerId(String),
    Cyclic,
    MultipleFinal(Vec<SubtaskId>),
    FinalHasDescendants(SubtaskId),
    DanglingDependency { subtask: SubtaskId, missing: SubtaskId },
    DependenciesDisagree(SubtaskId),
}

impl TaskPlan {
    pub fn duration_of(&self, id: SubtaskId) -> u32 {
        *self.durations.get(&id).unwrap_or(&1)
    }

    pub fn final_subtask(&self) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.is_final)
    }

    pub fn subtask(&self, id: SubtaskId) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    /// Validates the plan's invariants: all referenced ids appear as keys,
    /// the graph is acyclic, at most one final subtask, the final subtask
    /// (if any) has no descendants, and `Subtask::dependencies` agrees with
    /// `TaskPlan::dependencies`.
    pub fn validate(&self) -> Result<(), PlanValidationError> {
        if self.subtasks.is_empty() {
            return Err(PlanValidationError::Empty);
        }

        let ids: HashSet<SubtaskId> = self.subtasks.iter().map(|s| s.id).collect();

        for subtask in &self.subtasks {
            let declared = self.dependencies.get(&subtask.id);
            if declared.map(|v| v.as_slice()) != Some(subtask.dependencies.as_slice()) {
                return Err(PlanValidationError::DependenciesDisagree(subtask.id));
            }
            for dep in &subtask.dependencies {
                if !ids.contains(dep) {
                    return Err(PlanValidationError::DanglingDependency {
                        subtask: subtask.id,
                        missing: *dep,
                    });
                }
            }
        }

        let finals: Vec<SubtaskId> = self.subtasks.iter().filter(|s| s.is_final).map(|s| s.id).collect();
        if finals.len() > 1 {
            return Err(PlanValidationError::MultipleFinal(finals));
        }

        if self.is_cyclic() {
            return Err(PlanValidationError::Cyclic);
        }

        if let Some(final_id) = finals.first() {
            if self.has_descendants(*final_id) {
                return Err(PlanValidationError::FinalHasDescendants(*final_id));
            }
        }

        Ok(())
    }

    fn is_cyclic(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: HashMap<SubtaskId, Mark> =
            self.subtasks.iter().map(|s| (s.id, Mark::Unvisited)).collect();

        fn visit(
            id: SubtaskId,
            deps: &HashMap<SubtaskId, Vec<SubtaskId>>,
            marks: &mut HashMap<SubtaskId, Mark>,
        ) -> bool {
            match marks.get(&id).copied() {
                Some(Mark::InProgress) => return true,
                Some(Mark::Done) => return false,
                _ => {}
            }
            marks.insert(id, Mark::InProgress);
            if let Some(children) = deps.get(&id) {
                for &dep in children {
                    if visit(dep, deps, marks) {
                        return true;
                    }
                }
            }
            marks.insert(id, Mark::Done);
            false
        }

        for subtask in &self.subtasks {
            if visit(subtask.id, &self.dependencies, &mut marks) {
                return true;
            }
        }
        false
    }

    fn has_descendants(&self, id: SubtaskId) -> bool {
        self.dependencies.values().any(|deps| deps.contains(&id))
    }
}

/// A per-worker time-grid placement of subtasks with idle ticks.
///
/// `None` denotes an idle tick. All sequences have equal length (makespan).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerSchedule {
    pub timelines: HashMap<WorkerId, Vec<Option<SubtaskId>>>,
}

impl WorkerSchedule {
    pub fn makespan(&self) -> usize {
        self.timelines.values().map(|t| t.len()).max().unwrap_or(0)
    }

    pub fn workers_used(&self) -> usize {
        self.timelines.len()
    }

    /// Derives the linear dispatch order for each worker by deduplicating
    /// consecutive runs and dropping idle ticks.
    pub fn to_queues(&self) -> WorkerQueues {
        let mut queues = HashMap::new();
        for (&worker, timeline) in &self.timelines {
            let mut queue = Vec::new();
            let mut previous: Option<SubtaskId> = None;
            for tick in timeline {
                match tick {
                    Some(t) if Some(*t) != previous => {
                        queue.push(*t);
                        previous = Some(*t);
                    }
                    Some(_) => {}
                    None => previous = None,
                }
            }
            queues.insert(worker, queue);
        }
        WorkerQueues { queues }
    }
}

/// The linear dispatch order for each worker, derived from a
/// [`WorkerSchedule`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerQueues {
    pub queues: HashMap<WorkerId, Vec<SubtaskId>>,
}

/// The result a worker produced for one subtask.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtaskOutput {
    pub result: String,
    pub raw: Option<serde_json::Value>,
    pub tab_ids: Vec<u64>,
}
