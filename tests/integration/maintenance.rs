//! Prune policy validation and dry runs through the engine facade.

use crate::fixtures::TestEngine;
use lattice::{Error, PrunePolicy, TaskStatus};

fn completed_only(older_than_days: u32) -> PrunePolicy {
    PrunePolicy {
        statuses: vec![TaskStatus::Completed],
        older_than_days,
        preserve_with_active_dependents: true,
        preserve_recent_days: None,
    }
}

#[test]
fn test_policy_bounds_are_enforced() {
    let t = TestEngine::in_memory();

    for bad_age in [0, 3651] {
        let result = t.engine.prune_tasks_by_policy(&completed_only(bad_age), true);
        assert!(matches!(result, Err(Error::InvalidPolicy(_))));
    }

    let no_statuses = PrunePolicy {
        statuses: Vec::new(),
        ..completed_only(30)
    };
    assert!(matches!(
        t.engine.prune_tasks_by_policy(&no_statuses, true),
        Err(Error::InvalidPolicy(_))
    ));

    let active_status = PrunePolicy {
        statuses: vec![TaskStatus::Ready],
        ..completed_only(30)
    };
    assert!(matches!(
        t.engine.prune_tasks_by_policy(&active_status, true),
        Err(Error::InvalidPolicy(_))
    ));
}

#[test]
fn test_dry_run_on_fresh_tasks_is_a_noop() {
    let t = TestEngine::in_memory();
    let a = t.submit("freshly done", 5, &[]);
    t.complete(a);

    let report = t
        .engine
        .prune_tasks_by_policy(&completed_only(30), true)
        .unwrap();
    assert!(report.is_noop());
    assert!(report.dry_run);
    assert!(report.is_success());
    assert!(t.engine.get_task(&a).unwrap().is_some());
}

#[test]
fn test_active_tasks_are_never_candidates() {
    let t = TestEngine::in_memory();
    let a = t.submit("still ready", 5, &[]);

    let report = t
        .engine
        .prune_tasks_by_policy(&PrunePolicy::default(), false)
        .unwrap();
    assert!(report.is_noop());
    assert_eq!(t.task(a).status, TaskStatus::Ready);
}
