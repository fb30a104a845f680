//! Pure list-scheduling with critical-path heuristics and same-worker
//! affinity/chain-stickiness.
//!
//! Deterministic timeline bookkeeping via ordered collections, no hidden
//! global state: depth/bottom heuristics, a sticky-successor pass, then an
//! affinity pass, then fresh-worker allocation.

use std::collections::{HashMap, HashSet};

use super::plan::{SubtaskId, WorkerId, WorkerSchedule};

struct WorkerCell {
    current: Option<SubtaskId>,
    remaining: u32,
    last_completed: Option<SubtaskId>,
}

/// Computes the per-worker time-grid schedule for a DAG.
///
/// `dependencies` must already be validated acyclic (callers pass
/// `TaskPlan::dependencies`, which `TaskPlan::validate` checks). Iteration
/// over each task's predecessor list uses insertion order throughout — that
/// order is contractual for the affinity pass, not incidental.
pub fn schedule(
    dependencies: &HashMap<SubtaskId, Vec<SubtaskId>>,
    durations: &HashMap<SubtaskId, u32>,
    max_workers: u32,
) -> WorkerSchedule {
    let all_ids: Vec<SubtaskId> = dependencies.keys().copied().collect();

    let mut successors: HashMap<SubtaskId, Vec<SubtaskId>> =
        all_ids.iter().map(|&id| (id, Vec::new())).collect();
    for (&id, preds) in dependencies {
        for &p in preds {
            successors.entry(p).or_default().push(id);
        }
    }

    let depth = compute_depth(dependencies, &all_ids);
    let bottom = compute_bottom(&successors, &all_ids);

    let duration_of = |id: SubtaskId| -> u32 { *durations.get(&id).unwrap_or(&1) };

    let mut completed: HashSet<SubtaskId> = HashSet::new();
    let mut started: HashSet<SubtaskId> = HashSet::new();
    let mut workers: Vec<WorkerCell> = Vec::new();
    let mut timelines: HashMap<WorkerId, Vec<Option<SubtaskId>>> = HashMap::new();
    // Which worker ran each task, kept across ticks (unlike `last_completed`,
    // which only reflects the immediately preceding tick) so the affinity
    // pass can still route to a predecessor's worker many ticks later.
    let mut ran_on: HashMap<SubtaskId, WorkerId> = HashMap::new();

    let total = all_ids.len();
    if total == 0 {
        return WorkerSchedule { timelines };
    }

    while completed.len() < total {
        // 1. Ready tasks: all predecessors completed, not yet started.
        let mut ready: Vec<SubtaskId> = all_ids
            .iter()
            .copied()
            .filter(|id| {
                !started.contains(id)
                    && dependencies
                        .get(id)
                        .map(|preds| preds.iter().all(|p| completed.contains(p)))
                        .unwrap_or(true)
            })
            .collect();

        // 2. Sort by bottom descending, stable by id ascending on ties.
        ready.sort_by(|a, b| {
            bottom[b]
                .cmp(&bottom[a])
                .then_with(|| a.cmp(b))
        });
        let _ = &depth; // kept for callers that want it; only `bottom` drives ready-queue ordering.

        let mut assignment: HashMap<SubtaskId, WorkerId> = HashMap::new();
        let mut free_workers: HashSet<WorkerId> = (0..workers.len() as WorkerId)
            .filter(|&w| workers[w as usize].current.is_none())
            .collect();

        // 3. Sticky-successor pass.
        let mut unassigned: Vec<SubtaskId> = Vec::new();
        for &t in &ready {
            let mut bound: Option<WorkerId> = None;
            for (w_idx, worker) in workers.iter().enumerate() {
                let w = w_idx as WorkerId;
                if !free_workers.contains(&w) {
                    continue;
                }
                if let Some(t1) = worker.last_completed {
                    let succs_of_t1 = successors.get(&t1).cloned().unwrap_or_default();
                    let preds_of_t = dependencies.get(&t).cloned().unwrap_or_default();
                    if succs_of_t1 == vec![t] && preds_of_t == vec![t1] {
                        bound = Some(w);
                        break;
                    }
                }
            }
            if let Some(w) = bound {
                assignment.insert(t, w);
                free_workers.remove(&w);
            } else {
                unassigned.push(t);
            }
        }

        // 4. Affinity pass: predecessors visited in insertion order.
        let mut still_unassigned = Vec::new();
        for t in unassigned {
            let mut bound: Option<WorkerId> = None;
            if let Some(preds) = dependencies.get(&t) {
                for &d in preds {
                    if let Some(&w) = ran_on.get(&d) {
                        if free_workers.contains(&w) {
                            bound = Some(w);
                            break;
                        }
                    }
                }
            }
            if let Some(w) = bound {
                assignment.insert(t, w);
                free_workers.remove(&w);
            } else {
                still_unassigned.push(t);
            }
        }

        // 5. Fresh-worker pass.
        let ticks_elapsed = timelines.values().map(|t| t.len()).max().unwrap_or(0);
        for t in still_unassigned {
            if (workers.len() as u32) < max_workers {
                let w = workers.len() as WorkerId;
                workers.push(WorkerCell {
                    current: None,
                    remaining: 0,
                    last_completed: None,
                });
                // Backfill idle ticks for the ticks this worker didn't
                // exist yet, so every timeline stays equal length.
                timelines.insert(w, vec![None; ticks_elapsed]);
                assignment.insert(t, w);
                free_workers.remove(&w);
            } else if let Some(&w) = free_workers.iter().next() {
                assignment.insert(t, w);
                free_workers.remove(&w);
            }
            // If neither a fresh worker nor a free worker is available, the
            // task stays unready and is retried next tick.
        }

        // Start assigned tasks.
        for (&t, &w) in &assignment {
            workers[w as usize].current = Some(t);
            workers[w as usize].remaining = duration_of(t);
            started.insert(t);
            ran_on.insert(t, w);
        }

        // Tick: append, decrement, free completed workers.
        for (w_idx, worker) in workers.iter_mut().enumerate() {
            let w = w_idx as WorkerId;
            let timeline = timelines.entry(w).or_default();
            timeline.push(worker.current);
            if let Some(t) = worker.current {
                worker.remaining -= 1;
                if worker.remaining == 0 {
                    completed.insert(t);
                    worker.last_completed = Some(t);
                    worker.current = None;
                } else {
                    worker.last_completed = None;
                }
            } else {
                worker.last_completed = None;
            }
        }
    }

    // Pad all timelines to equal length with trailing idle ticks.
    let makespan = timelines.values().map(|t| t.len()).max().unwrap_or(0);
    for timeline in timelines.values_mut() {
        while timeline.len() < makespan {
            timeline.push(None);
        }
    }

    WorkerSchedule { timelines }
}

fn compute_depth(
    dependencies: &HashMap<SubtaskId, Vec<SubtaskId>>,
    all_ids: &[SubtaskId],
) -> HashMap<SubtaskId, u32> {
    let mut depth: HashMap<SubtaskId, u32> = HashMap::new();

    fn visit(
        id: SubtaskId,
        dependencies: &HashMap<SubtaskId, Vec<SubtaskId>>,
        depth: &mut HashMap<SubtaskId, u32>,
    ) -> u32 {
        if let Some(&d) = depth.get(&id) {
            return d;
        }
        let preds = dependencies.get(&id).cloned().unwrap_or_default();
        let d = if preds.is_empty() {
            0
        } else {
            1 + preds.iter().map(|&p| visit(p, dependencies, depth)).max().unwrap_or(0)
        };
        depth.insert(id, d);
        d
    }

    for &id in all_ids {
        visit(id, dependencies, &mut depth);
    }
    depth
}

fn compute_bottom(
    successors: &HashMap<SubtaskId, Vec<SubtaskId>>,
    all_ids: &[SubtaskId],
) -> HashMap<SubtaskId, u32> {
    let mut bottom: HashMap<SubtaskId, u32> = HashMap::new();

    fn visit(
        id: SubtaskId,
        successors: &HashMap<SubtaskId, Vec<SubtaskId>>,
        bottom: &mut HashMap<SubtaskId, u32>,
    ) -> u32 {
        if let Some(&b) = bottom.get(&id) {
            return b;
        }
        let succs = successors.get(&id).cloned().unwrap_or_default();
        let b = if succs.is_empty() {
            0
        } else {
            1 + succs.iter().map(|&s| visit(s, successors, bottom)).max().unwrap_or(0)
        };
        bottom.insert(id, b);
        b
    }

    for &id in all_ids {
        visit(id, successors, &mut bottom);
    }
    bottom
}
