//! Scheduler runs over small DAGs with mock executors.

use crate::fixtures::{collect_until, scheduler_for, FailingExecutor, RecordingExecutor, TestEngine};
use lattice::{EngineConfig, SchedulerEvent, TaskStatus};
use std::sync::Arc;

#[tokio::test]
async fn test_diamond_dag_settles_in_dependency_order() {
    let t = TestEngine::with_config(EngineConfig {
        max_agents: 2,
        ..Default::default()
    });
    let a = t.submit("root", 5, &[]);
    let b = t.submit("left", 5, &[a]);
    let c = t.submit("right", 5, &[a]);
    let d = t.submit("join", 5, &[b, c]);

    let executor = RecordingExecutor::new();
    let (mut scheduler, mut event_rx) = scheduler_for(&t, executor.clone());
    scheduler.start().unwrap();

    collect_until(&mut event_rx, |e| *e == SchedulerEvent::AllTasksSettled).await;
    scheduler.shutdown().await.unwrap();

    let order = executor.order();
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], a);
    assert_eq!(order[3], d);

    for id in [a, b, c, d] {
        assert_eq!(t.task(id).status, TaskStatus::Completed);
    }
    assert!(t.engine.next_ready_task().unwrap().is_none());
    assert_eq!(t.engine.active_count().unwrap(), 0);
    assert_eq!(
        t.engine.task_counts().unwrap().get(&TaskStatus::Completed),
        Some(&4)
    );
}

#[tokio::test]
async fn test_failed_prerequisite_keeps_dependent_blocked() {
    let t = TestEngine::in_memory();
    let a = t.submit("doomed", 5, &[]);
    let b = t.submit("waiting", 5, &[a]);

    let (mut scheduler, mut event_rx) = scheduler_for(&t, Arc::new(FailingExecutor));
    scheduler.start().unwrap();

    let events = collect_until(&mut event_rx, |e| {
        matches!(e, SchedulerEvent::TaskFailed { .. })
    })
    .await;
    scheduler.shutdown().await.unwrap();

    assert!(events.iter().any(|e| matches!(
        e,
        SchedulerEvent::TaskFailed { task_id, error }
            if *task_id == a && error == "injected failure"
    )));
    assert_eq!(t.task(a).status, TaskStatus::Failed);
    assert_eq!(t.task(b).status, TaskStatus::Blocked);
}

#[test]
fn test_ready_queue_orders_by_priority() {
    let t = TestEngine::in_memory();
    let _low = t.submit("low", 1, &[]);
    let high = t.submit("high", 9, &[]);
    let _mid = t.submit("mid", 5, &[]);

    let next = t.engine.next_ready_task().unwrap().unwrap();
    assert_eq!(next.id, high);
}

#[test]
fn test_ready_queue_breaks_ties_by_submission_age() {
    let t = TestEngine::in_memory();
    let older = t.submit("older", 5, &[]);
    let _newer = t.submit("newer", 5, &[]);

    let next = t.engine.next_ready_task().unwrap().unwrap();
    assert_eq!(next.id, older);
}

#[test]
fn test_depth_bias_favors_chain_unblockers() {
    let t = TestEngine::in_memory();
    let a = t.submit("chain base", 5, &[]);
    let b = t.submit("chain middle", 5, &[a]);
    let c = t.submit("chain tip", 5, &[b]);
    let x = t.submit("independent", 5, &[]);

    t.complete(a);
    t.complete(b);

    // c sits at depth 2: base 5 + 2 levels at weight 2 beats the flat
    // task at the same base priority.
    let next = t.engine.next_ready_task().unwrap().unwrap();
    assert_eq!(next.id, c);
    assert_eq!(next.calculated_priority, 9.0);
    assert_eq!(t.task(x).calculated_priority, 5.0);
}
