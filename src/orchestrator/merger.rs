//! Consecutive same-worker chain collapse, for both execution and
//! visualization.
//!
//! Pure functions over a [`TaskPlan`] and a [`WorkerSchedule`]; no I/O, no
//! trait — the same shape as [`super::scheduler`].

use std::collections::{HashMap, HashSet};

use super::event::{Graph, GraphEdge, GraphNode};
use super::plan::{Subtask, SubtaskId, SubtaskStatus, TaskPlan, WorkerId, WorkerQueues, WorkerSchedule};

struct UnionFind {
    parent: HashMap<SubtaskId, SubtaskId>,
}

impl UnionFind {
    fn new(ids: impl Iterator<Item = SubtaskId>) -> Self {
        Self {
            parent: ids.map(|id| (id, id)).collect(),
        }
    }

    fn find(&mut self, id: SubtaskId) -> SubtaskId {
        let parent = *self.parent.get(&id).unwrap_or(&id);
        if parent == id {
            id
        } else {
            let root = self.find(parent);
            self.parent.insert(id, root);
            root
        }
    }

    fn union(&mut self, a: SubtaskId, b: SubtaskId) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            // Canonical id is whichever member has the earliest start time;
            // resolved by the caller after all unions via `start_tick`, so
            // here we just pick a stable root — smaller id wins the
            // intermediate tie, re-canonicalized below.
            let keep = ra.min(rb);
            let drop = ra.max(rb);
            self.parent.insert(drop, keep);
        }
    }
}

/// Start tick (first index in its worker's timeline the subtask occupies)
/// for every subtask, used to order group members and pick the canonical id.
fn start_ticks(schedule: &WorkerSchedule) -> HashMap<SubtaskId, usize> {
    let mut starts = HashMap::new();
    for timeline in schedule.timelines.values() {
        let mut previous: Option<SubtaskId> = None;
        for (tick, slot) in timeline.iter().enumerate() {
            if let Some(t) = slot {
                if previous != Some(*t) {
                    starts.entry(*t).or_insert(tick);
                }
                previous = Some(*t);
            } else {
                previous = None;
            }
        }
    }
    starts
}

/// Which worker executed each subtask, and the `(start, end)` tick range of
/// its run.
fn worker_and_span(schedule: &WorkerSchedule) -> HashMap<SubtaskId, (WorkerId, usize, usize)> {
    let mut spans = HashMap::new();
    for (&worker, timeline) in &schedule.timelines {
        let mut run_start: Option<usize> = None;
        let mut run_task: Option<SubtaskId> = None;
        for (tick, slot) in timeline.iter().enumerate() {
            match (*slot, run_task) {
                (Some(t), Some(rt)) if t == rt => {}
                (Some(t), _) => {
                    if let (Some(start), Some(rt)) = (run_start, run_task) {
                        spans.insert(rt, (worker, start, tick));
                    }
                    run_start = Some(tick);
                    run_task = Some(t);
                }
                (None, Some(rt)) => {
                    if let Some(start) = run_start {
                        spans.insert(rt, (worker, start, tick));
                    }
                    run_start = None;
                    run_task = None;
                }
                (None, None) => {}
            }
        }
        if let (Some(start), Some(rt)) = (run_start, run_task) {
            spans.insert(rt, (worker, start, timeline.len()));
        }
    }
    spans
}

/// Collapses the plan's consecutive same-worker chains, returning the
/// collapsed plan and a mapping from original subtask id to its group's
/// canonical id.
pub fn collapse(plan: &TaskPlan, schedule: &WorkerSchedule) -> (TaskPlan, HashMap<SubtaskId, SubtaskId>) {
    let spans = worker_and_span(schedule);
    let starts = start_ticks(schedule);

    let mut uf = UnionFind::new(plan.subtasks.iter().map(|s| s.id));

    for subtask in &plan.subtasks {
        let t2 = subtask.id;
        for &t1 in &subtask.dependencies {
            if !spans.contains_key(&t1) || !spans.contains_key(&t2) {
                continue;
            }
            let (w1, _, end1) = spans[&t1];
            let (w2, start2, _) = spans[&t2];
            if w1 != w2 || end1 != start2 {
                continue;
            }
            let preds_of_t2 = plan.dependencies.get(&t2).cloned().unwrap_or_default();
            let preds_same_worker = preds_of_t2
                .iter()
                .all(|d| spans.get(d).map(|(w, _, _)| *w == w1).unwrap_or(false));
            if !preds_same_worker {
                continue;
            }
            let succs_of_t1: Vec<SubtaskId> = plan
                .subtasks
                .iter()
                .filter(|s| s.dependencies.contains(&t1))
                .map(|s| s.id)
                .collect();
            let succs_same_worker = succs_of_t1
                .iter()
                .all(|s| spans.get(s).map(|(w, _, _)| *w == w1).unwrap_or(false));
            if !succs_same_worker {
                continue;
            }
            uf.union(t1, t2);
        }
    }

    // Group members by union-find root, then re-canonicalize each group to
    // the member with the earliest start time.
    let mut groups: HashMap<SubtaskId, Vec<SubtaskId>> = HashMap::new();
    for subtask in &plan.subtasks {
        let root = uf.find(subtask.id);
        groups.entry(root).or_default().push(subtask.id);
    }

    let mut id_to_canonical: HashMap<SubtaskId, SubtaskId> = HashMap::new();
    let mut canonical_groups: HashMap<SubtaskId, Vec<SubtaskId>> = HashMap::new();
    for members in groups.values() {
        let mut members = members.clone();
        members.sort_by_key(|id| starts.get(id).copied().unwrap_or(usize::MAX));
        let canonical = members[0];
        for &m in &members {
            id_to_canonical.insert(m, canonical);
        }
        canonical_groups.insert(canonical, members);
    }

    let mut collapsed_subtasks = Vec::new();
    for (&canonical, members) in &canonical_groups {
        let member_subtasks: Vec<&Subtask> = members
            .iter()
            .filter_map(|id| plan.subtask(*id))
            .collect();

        let title = member_subtasks
            .iter()
            .map(|s| s.title.clone())
            .collect::<Vec<_>>()
            .join(" → ");
        let prompt = member_subtasks
            .iter()
            .enumerate()
            .map(|(i, s)| format!("Step {}: {}", i + 1, s.prompt))
            .collect::<Vec<_>>()
            .join("\n\n");
        let is_final = member_subtasks.iter().any(|s| s.is_final);
        let no_browse = member_subtasks.iter().all(|s| s.no_browse);

        let mut suggested_urls = HashSet::new();
        let mut suggested_search_queries = HashSet::new();
        for s in &member_subtasks {
            suggested_urls.extend(s.suggested_urls.iter().cloned());
            suggested_search_queries.extend(s.suggested_search_queries.iter().cloned());
        }

        let duration: u32 = members.iter().map(|id| plan.duration_of(*id)).sum();

        let member_set: HashSet<SubtaskId> = members.iter().copied().collect();
        let mut external_deps: Vec<SubtaskId> = Vec::new();
        for id in members {
            for dep in plan.dependencies.get(id).cloned().unwrap_or_default() {
                if !member_set.contains(&dep) {
                    let mapped = *id_to_canonical.get(&dep).unwrap_or(&dep);
                    if !external_deps.contains(&mapped) {
                        external_deps.push(mapped);
                    }
                }
            }
        }

        collapsed_subtasks.push(Subtask {
            id: canonical,
            title,
            prompt,
            dependencies: external_deps,
            is_final,
            no_browse,
            suggested_urls: suggested_urls.into_iter().collect(),
            suggested_search_queries: suggested_search_queries.into_iter().collect(),
        });
        let _ = duration; // folded into durations map below
    }

    collapsed_subtasks.sort_by_key(|s| s.id);

    let mut collapsed_durations = HashMap::new();
    for (&canonical, members) in &canonical_groups {
        let duration: u32 = members.iter().map(|id| plan.duration_of(*id)).sum();
        collapsed_durations.insert(canonical, duration);
    }

    let collapsed_dependencies = collapsed_subtasks
        .iter()
        .map(|s| (s.id, s.dependencies.clone()))
        .collect();

    let collapsed_plan = TaskPlan {
        task: plan.task.clone(),
        subtasks: collapsed_subtasks,
        dependencies: collapsed_dependencies,
        durations: collapsed_durations,
    };

    (collapsed_plan, id_to_canonical)
}

/// Derives per-worker dispatch queues for the *collapsed* plan: each
/// original subtask id in the schedule is mapped to its group's canonical
/// id before the usual consecutive-run dedup, so a merged chain that
/// occupied several consecutive ticks collapses to one queue entry.
pub fn collapse_queues(schedule: &WorkerSchedule, id_to_canonical: &HashMap<SubtaskId, SubtaskId>) -> WorkerQueues {
    let mut queues = HashMap::new();
    for (&worker, timeline) in &schedule.timelines {
        let mut queue = Vec::new();
        let mut previous: Option<SubtaskId> = None;
        for tick in timeline {
            match tick {
                Some(t) => {
                    let canonical = *id_to_canonical.get(t).unwrap_or(t);
                    if previous != Some(canonical) {
                        queue.push(canonical);
                        previous = Some(canonical);
                    }
                }
                None => previous = None,
            }
        }
        queues.insert(worker, queue);
    }
    WorkerQueues { queues }
}

/// A host-facing graph snapshot merged the same way as [`collapse`], for
/// visualization only (does not affect dispatch).
pub fn viz_merge(plan: &TaskPlan, schedule: &WorkerSchedule, statuses: &HashMap<SubtaskId, SubtaskStatus>) -> Graph {
    let (collapsed, id_to_canonical) = collapse(plan, schedule);

    let nodes = collapsed
        .subtasks
        .iter()
        .map(|s| GraphNode {
            id: s.id,
            title: s.title.clone(),
            status: statuses.get(&s.id).copied().unwrap_or(SubtaskStatus::NotStarted),
            duration: collapsed.duration_of(s.id),
        })
        .collect();

    let mut edges = Vec::new();
    for s in &collapsed.subtasks {
        for &dep in &s.dependencies {
            edges.push(GraphEdge { from: dep, to: s.id });
        }
    }
    let _ = id_to_canonical;

    Graph { nodes, edges }
}
