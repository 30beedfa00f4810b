//! Crash-safe persistence and resume-on-restart

use super::*;
use crate::types::PullTask;
use std::collections::HashMap;

#[tokio::test]
async fn running_tasks_from_a_previous_session_become_interrupted_errors() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::open(temp_dir.path()).unwrap();

    // Simulate a previous process that died mid-transfer
    let mut table = HashMap::new();
    let mut running = PullTask::new("t-running", "llama3.2");
    running.status = TaskStatus::Running;
    running.started_at = Some(chrono::Utc::now());
    table.insert(running.task_id.clone(), running);
    let mut done = PullTask::new("t-done", "mistral");
    done.status = TaskStatus::Completed;
    done.completed_at = Some(chrono::Utc::now());
    table.insert(done.task_id.clone(), done);
    store.save_pull_tasks(&table).unwrap();

    let manager = PullManager::new(store, Arc::new(FlakyRegistry::new(0)), fast_config());
    manager.resume_persisted().unwrap();

    let interrupted = manager.get("t-running").unwrap();
    assert_eq!(interrupted.status, TaskStatus::Error);
    assert_eq!(
        interrupted.error.as_deref(),
        Some("interrupted by restart"),
        "no partial-transfer state is recoverable"
    );
    assert!(interrupted.completed_at.is_some());

    // Terminal tasks pass through untouched
    assert_eq!(manager.get("t-done").unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn pending_tasks_are_restarted_on_resume() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::open(temp_dir.path()).unwrap();

    let mut table = HashMap::new();
    table.insert(
        "t-pending".to_string(),
        PullTask::new("t-pending", "llama3.2"),
    );
    store.save_pull_tasks(&table).unwrap();

    let registry = Arc::new(FlakyRegistry::new(0));
    let manager = PullManager::new(store, registry.clone(), fast_config());
    manager.resume_persisted().unwrap();

    // The standard transfer routine picks the task up and drives it home
    wait_for_status(&manager, "t-pending", TaskStatus::Completed).await;
    assert_eq!(registry.attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resume_with_no_persisted_table_is_a_no_op() {
    let (manager, _temp) = manager_with(Arc::new(FlakyRegistry::new(0)), fast_config());
    manager.resume_persisted().unwrap();
    assert!(manager.list().is_empty());
}

#[tokio::test]
async fn reclassification_is_persisted_immediately() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::open(temp_dir.path()).unwrap();

    let mut table = HashMap::new();
    let mut running = PullTask::new("t-running", "llama3.2");
    running.status = TaskStatus::Running;
    table.insert(running.task_id.clone(), running);
    store.save_pull_tasks(&table).unwrap();

    let manager = PullManager::new(store, Arc::new(FlakyRegistry::new(0)), fast_config());
    manager.resume_persisted().unwrap();

    // A second restart must see the error, not a running ghost
    let reread = FileStore::open(temp_dir.path())
        .unwrap()
        .load_pull_tasks()
        .unwrap();
    assert_eq!(reread["t-running"].status, TaskStatus::Error);
}

#[tokio::test]
async fn terminal_transitions_reach_the_persisted_table() {
    let (manager, temp) = manager_with(Arc::new(FlakyRegistry::new(0)), fast_config());
    let task_id = manager.pull("llama3.2");
    wait_for_status(&manager, &task_id, TaskStatus::Completed).await;

    let table = FileStore::open(temp.path())
        .unwrap()
        .load_pull_tasks()
        .unwrap();
    assert_eq!(
        table[&task_id].status,
        TaskStatus::Completed,
        "in-memory state must be safely discardable for terminal work"
    );
}
