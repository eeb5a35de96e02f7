//! Dependency mutation through the engine facade.
//!
//! Covers the propagation contract (ready dependents block on new
//! unmet prerequisites, blocked dependents promote when the remaining
//! set is satisfied) and every rejection path, each of which must
//! leave the engine observably unchanged.

use crate::fixtures::TestEngine;
use lattice::{DependencyMode, Error, TaskId, TaskSpec, TaskStatus};

#[test]
fn test_add_dependency_blocks_ready_dependent() {
    let t = TestEngine::in_memory();
    let a = t.submit("task a", 5, &[]);
    let b = t.submit("task b", 5, &[]);
    assert_eq!(t.task(a).status, TaskStatus::Ready);
    assert_eq!(t.task(b).status, TaskStatus::Ready);

    let outcome = t.engine.add_dependency(b, a).unwrap();
    assert!(outcome.status_changed);
    assert_eq!(outcome.old_status, TaskStatus::Ready);
    assert_eq!(outcome.new_status, TaskStatus::Blocked);

    let task_b = t.task(b);
    assert_eq!(task_b.status, TaskStatus::Blocked);
    assert_eq!(task_b.dependency_depth, 1);
    // base 5 plus one depth level at the default weight of 2
    assert_eq!(task_b.calculated_priority, 7.0);
    assert_eq!(task_b.calculated_priority, outcome.new_priority);

    // Completing the prerequisite promotes the dependent without any
    // edge removal.
    t.complete(a);
    assert_eq!(t.task(b).status, TaskStatus::Ready);
}

#[test]
fn test_add_satisfied_dependency_changes_nothing() {
    let t = TestEngine::in_memory();
    let a = t.submit("done first", 5, &[]);
    let b = t.submit("stays ready", 5, &[]);
    t.complete(a);

    let outcome = t.engine.add_dependency(b, a).unwrap();
    assert!(!outcome.status_changed);
    assert_eq!(outcome.new_status, TaskStatus::Ready);
    assert_eq!(t.task(b).status, TaskStatus::Ready);
}

#[test]
fn test_self_dependency_never_mutates() {
    let t = TestEngine::in_memory();
    let x = t.submit("task x", 5, &[]);

    let result = t.engine.add_dependency(x, x);
    assert!(matches!(result, Err(Error::SelfDependency { id }) if id == x));

    let task = t.task(x);
    assert_eq!(task.status, TaskStatus::Ready);
    assert_eq!(task.dependency_depth, 0);
    assert!(t.engine.validate_dag_integrity().unwrap().is_empty());
}

#[test]
fn test_cycle_rejected_with_explicit_path() {
    let t = TestEngine::in_memory();
    let a = t.submit("task a", 5, &[]);
    let b = t.submit("task b", 5, &[]);
    let c = t.submit("task c", 5, &[]);

    t.engine.add_dependency(a, b).unwrap();
    t.engine.add_dependency(b, c).unwrap();

    match t.engine.add_dependency(c, a) {
        Err(Error::CircularDependency {
            dependent,
            prerequisite,
            cycle,
        }) => {
            assert_eq!(dependent, c);
            assert_eq!(prerequisite, a);
            assert_eq!(cycle.len(), 4);
            assert_eq!(cycle.first(), cycle.last());
            for id in [a, b, c] {
                assert!(cycle.contains(&id));
            }
        }
        other => panic!("expected CircularDependency, got {:?}", other),
    }

    // The rejected edge is nowhere to be seen.
    assert!(t.engine.validate_dag_integrity().unwrap().is_empty());
    assert!(matches!(
        t.engine.remove_dependency(c, a),
        Err(Error::DependencyNotFound { .. })
    ));
}

#[test]
fn test_duplicate_dependency_rejected() {
    let t = TestEngine::in_memory();
    let a = t.submit("task a", 5, &[]);
    let b = t.submit("task b", 5, &[]);

    t.engine.add_dependency(b, a).unwrap();
    let result = t.engine.add_dependency(b, a);
    assert!(matches!(
        result,
        Err(Error::DuplicateDependency { dependent, prerequisite })
            if dependent == b && prerequisite == a
    ));
    assert!(t.engine.validate_dag_integrity().unwrap().is_empty());
}

#[test]
fn test_remove_dependency_promotes_when_remaining_met() {
    let t = TestEngine::in_memory();
    let done = t.submit("already done", 5, &[]);
    t.complete(done);
    let pending = t.submit("never finishes", 5, &[]);
    let b = t.submit("task b", 5, &[pending, done]);
    assert_eq!(t.task(b).status, TaskStatus::Blocked);

    let outcome = t.engine.remove_dependency(b, pending).unwrap();
    assert!(outcome.status_changed);
    assert_eq!(outcome.old_status, TaskStatus::Blocked);
    assert_eq!(outcome.new_status, TaskStatus::Ready);
    assert_eq!(t.task(b).dependency_depth, 1);
}

#[test]
fn test_remove_dependency_keeps_blocked_when_unmet_remain() {
    let t = TestEngine::in_memory();
    let p1 = t.submit("first prerequisite", 5, &[]);
    let p2 = t.submit("second prerequisite", 5, &[]);
    let b = t.submit("task b", 5, &[p1, p2]);

    let outcome = t.engine.remove_dependency(b, p1).unwrap();
    assert!(!outcome.status_changed);
    assert_eq!(t.task(b).status, TaskStatus::Blocked);
}

#[test]
fn test_remove_unknown_dependency_fails() {
    let t = TestEngine::in_memory();
    let a = t.submit("task a", 5, &[]);
    let b = t.submit("task b", 5, &[]);

    let result = t.engine.remove_dependency(b, a);
    assert!(matches!(
        result,
        Err(Error::DependencyNotFound { dependent, prerequisite })
            if dependent == b && prerequisite == a
    ));
}

#[test]
fn test_any_mode_promotes_on_first_completion() {
    let t = TestEngine::in_memory();
    let a1 = t.submit("alternative 1", 5, &[]);
    let a2 = t.submit("alternative 2", 5, &[]);
    let b = t
        .engine
        .submit_task(
            &TaskSpec::new("either will do", "parallel prerequisites")
                .with_prerequisites(vec![a1, a2])
                .with_mode(DependencyMode::Any),
        )
        .unwrap();
    assert_eq!(t.task(b).status, TaskStatus::Blocked);

    t.complete(a1);
    assert_eq!(t.task(b).status, TaskStatus::Ready);
    assert_eq!(t.task(a2).status, TaskStatus::Ready);
}

#[test]
fn test_rejected_mutation_leaves_engine_unchanged() {
    let t = TestEngine::in_memory();
    let b = t.submit("task b", 5, &[]);
    let ghost = TaskId::new();

    let before = t.task(b);
    let result = t.engine.add_dependency(b, ghost);
    assert!(matches!(result, Err(Error::TaskNotFound { id }) if id == ghost));

    let after = t.task(b);
    assert_eq!(after.status, before.status);
    assert_eq!(after.dependency_depth, before.dependency_depth);
    assert_eq!(after.calculated_priority, before.calculated_priority);
    assert!(t.engine.validate_dag_integrity().unwrap().is_empty());
}

#[test]
fn test_cancel_is_terminal() {
    let t = TestEngine::in_memory();
    let a = t.submit("prerequisite", 5, &[]);
    let b = t.submit("doomed dependent", 5, &[a]);

    assert_eq!(t.engine.cancel_task(b).unwrap(), TaskStatus::Cancelled);
    assert_eq!(t.task(b).status, TaskStatus::Cancelled);
    assert!(matches!(
        t.engine.cancel_task(b),
        Err(Error::InvalidStateTransition {
            from: TaskStatus::Cancelled,
            ..
        })
    ));

    // Completing the prerequisite must not revive the cancelled task.
    t.complete(a);
    assert_eq!(t.task(b).status, TaskStatus::Cancelled);
}

#[test]
fn test_promote_sweep_is_idempotent_on_consistent_state() {
    let t = TestEngine::in_memory();
    let a = t.submit("prerequisite", 5, &[]);
    let _b = t.submit("dependent", 5, &[a]);

    // Synchronous propagation already handled everything, so the
    // defensive sweep finds nothing to do.
    assert!(t.engine.promote_pending().unwrap().is_empty());
    t.complete(a);
    assert!(t.engine.promote_pending().unwrap().is_empty());
}

#[test]
fn test_status_stays_consistent_through_mutations() {
    let t = TestEngine::in_memory();
    let root = t.submit("root", 5, &[]);
    let left = t.submit("left", 5, &[root]);
    let right = t.submit("right", 5, &[root]);
    let join = t.submit("join", 5, &[left, right]);

    // blocked iff at least one prerequisite is not completed
    t.complete(root);
    assert_eq!(t.task(left).status, TaskStatus::Ready);
    assert_eq!(t.task(right).status, TaskStatus::Ready);
    assert_eq!(t.task(join).status, TaskStatus::Blocked);

    t.complete(left);
    assert_eq!(t.task(join).status, TaskStatus::Blocked);
    t.complete(right);
    assert_eq!(t.task(join).status, TaskStatus::Ready);

    // depth(T) >= depth(P) + 1 for every surviving edge
    assert!(t.task(left).dependency_depth >= t.task(root).dependency_depth + 1);
    assert!(t.task(join).dependency_depth >= t.task(left).dependency_depth + 1);
    assert_eq!(t.task(join).dependency_depth, 2);
}
