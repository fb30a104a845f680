use std::collections::HashMap;

use taskflow_core::orchestrator::plan::{PlanValidationError, Subtask, TaskPlan};

fn plan_from(subtasks: Vec<Subtask>) -> TaskPlan {
    let dependencies = subtasks.iter().map(|s| (s.id, s.dependencies.clone())).collect();
    TaskPlan {
        task: "test task".to_string(),
        subtasks,
        dependencies,
        durations: HashMap::new(),
    }
}

#[test]
fn a_well_formed_linear_plan_validates() {
    let plan = plan_from(vec![
        Subtask::new(1, "First", "Do the first thing"),
        Subtask::new(2, "Second", "Do the second thing")
            .with_dependencies(vec![1])
            .with_final(true),
    ]);
    assert_eq!(plan.validate(), Ok(()));
}

#[test]
fn an_empty_plan_is_rejected() {
    let plan = plan_from(vec![]);
    assert_eq!(plan.validate(), Err(PlanValidationError::Empty));
}

#[test]
fn a_cycle_is_rejected() {
    let plan = plan_from(vec![
        Subtask::new(1, "A", "prompt").with_dependencies(vec![2]),
        Subtask::new(2, "B", "prompt").with_dependencies(vec![1]),
    ]);
    assert_eq!(plan.validate(), Err(PlanValidationError::Cyclic));
}

#[test]
fn a_self_dependency_is_a_cycle() {
    let plan = plan_from(vec![Subtask::new(1, "A", "prompt").with_dependencies(vec![1])]);
    assert_eq!(plan.validate(), Err(PlanValidationError::Cyclic));
}

#[test]
fn a_dangling_dependency_is_rejected() {
    let plan = plan_from(vec![Subtask::new(1, "A", "prompt").with_dependencies(vec![99])]);
    assert_eq!(
        plan.validate(),
        Err(PlanValidationError::DanglingDependency { subtask: 1, missing: 99 })
    );
}

#[test]
fn more_than_one_final_subtask_is_rejected() {
    let plan = plan_from(vec![
        Subtask::new(1, "A", "prompt").with_final(true),
        Subtask::new(2, "B", "prompt").with_final(true),
    ]);
    match plan.validate() {
        Err(PlanValidationError::MultipleFinal(mut ids)) => {
            ids.sort();
            assert_eq!(ids, vec![1, 2]);
        }
        other => panic!("expected MultipleFinal, got {:?}", other),
    }
}

#[test]
fn a_final_subtask_with_a_descendant_is_rejected() {
    let plan = plan_from(vec![
        Subtask::new(1, "A", "prompt").with_final(true),
        Subtask::new(2, "B", "prompt").with_dependencies(vec![1]),
    ]);
    assert_eq!(plan.validate(), Err(PlanValidationError::FinalHasDescendants(1)));
}

#[test]
fn a_plan_with_no_final_subtask_is_allowed() {
    let plan = plan_from(vec![
        Subtask::new(1, "A", "prompt"),
        Subtask::new(2, "B", "prompt").with_dependencies(vec![1]),
    ]);
    assert_eq!(plan.validate(), Ok(()));
    assert!(plan.final_subtask().is_none());
}

#[test]
fn duration_of_defaults_to_one_for_unlisted_subtasks() {
    let mut plan = plan_from(vec![Subtask::new(1, "A", "prompt")]);
    assert_eq!(plan.duration_of(1), 1);
    plan.durations.insert(1, 5);
    assert_eq!(plan.duration_of(1), 5);
}

#[test]
fn dependencies_map_disagreeing_with_subtask_dependencies_is_rejected() {
    let mut plan = plan_from(vec![Subtask::new(1, "A", "prompt")]);
    plan.dependencies.insert(1, vec![42]);
    assert_eq!(plan.validate(), Err(PlanValidationError::DependenciesDisagree(1)));
}
