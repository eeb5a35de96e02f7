//! Engine reopen and graph hydration over a file-backed store.

use lattice::{Engine, EngineConfig, Error, ExecutionOutcome, TaskSpec, TaskStatus};
use tempfile::TempDir;

fn config_for(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        data_dir: Some(dir.path().to_string_lossy().into_owned()),
        ..Default::default()
    }
}

#[test]
fn test_reopen_preserves_tasks_edges_and_statuses() {
    let dir = TempDir::new().unwrap();

    let (a, b) = {
        let engine = Engine::open(config_for(&dir)).unwrap();
        let a = engine.submit_task(&TaskSpec::new("first", "persisted")).unwrap();
        let b = engine
            .submit_task(&TaskSpec::new("second", "persisted").with_prerequisites(vec![a]))
            .unwrap();
        engine.start_task(a).unwrap();
        engine
            .report_completion(a, ExecutionOutcome::Completed)
            .unwrap();
        (a, b)
    };

    let engine = Engine::open(config_for(&dir)).unwrap();
    let task_a = engine.get_task(&a).unwrap().unwrap();
    let task_b = engine.get_task(&b).unwrap().unwrap();
    assert_eq!(task_a.status, TaskStatus::Completed);
    assert_eq!(task_b.status, TaskStatus::Ready);
    assert_eq!(task_b.dependency_depth, 1);
    assert_eq!(engine.next_ready_task().unwrap().unwrap().id, b);
}

#[test]
fn test_reopen_rehydrates_cycle_detection() {
    let dir = TempDir::new().unwrap();

    let (a, b) = {
        let engine = Engine::open(config_for(&dir)).unwrap();
        let a = engine.submit_task(&TaskSpec::new("upstream", "persisted")).unwrap();
        let b = engine
            .submit_task(&TaskSpec::new("downstream", "persisted").with_prerequisites(vec![a]))
            .unwrap();
        (a, b)
    };

    // The persisted edge must still veto the reverse edge.
    let engine = Engine::open(config_for(&dir)).unwrap();
    let result = engine.add_dependency(a, b);
    assert!(matches!(result, Err(Error::CircularDependency { .. })));
}

#[test]
fn test_reopen_preserves_ready_ordering() {
    let dir = TempDir::new().unwrap();

    let high = {
        let engine = Engine::open(config_for(&dir)).unwrap();
        engine
            .submit_task(&TaskSpec::new("low", "persisted").with_priority(2))
            .unwrap();
        engine
            .submit_task(&TaskSpec::new("high", "persisted").with_priority(9))
            .unwrap()
    };

    let engine = Engine::open(config_for(&dir)).unwrap();
    assert_eq!(engine.next_ready_task().unwrap().unwrap().id, high);
}

#[test]
fn test_reopen_leaves_integrity_clean() {
    let dir = TempDir::new().unwrap();

    {
        let engine = Engine::open(config_for(&dir)).unwrap();
        let a = engine.submit_task(&TaskSpec::new("a", "persisted")).unwrap();
        let _b = engine
            .submit_task(&TaskSpec::new("b", "persisted").with_prerequisites(vec![a]))
            .unwrap();
    }

    let engine = Engine::open(config_for(&dir)).unwrap();
    assert!(engine.validate_dag_integrity().unwrap().is_empty());
}
