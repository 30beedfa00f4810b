//! Task lifecycle: create/start/cancel, terminal rules, progress, retry

use super::*;
use std::sync::Mutex;

#[tokio::test]
async fn create_registers_a_pending_task_and_persists_it() {
    let (manager, temp) = manager_with(Arc::new(FlakyRegistry::new(0)), fast_config());

    let task_id = manager.create("llama3.2");

    let task = manager.get(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.model_name, "llama3.2");
    assert!(task.started_at.is_none());

    // Registration alone already reaches the persisted table
    let store = FileStore::open(temp.path()).unwrap();
    let table = store.load_pull_tasks().unwrap();
    assert!(table.contains_key(&task_id));
}

#[tokio::test]
async fn start_runs_work_and_completes() {
    let (manager, _temp) = manager_with(Arc::new(FlakyRegistry::new(0)), fast_config());
    let task_id = manager.create("llama3.2");

    let started = manager.start(&task_id, |_token| async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(())
    });
    assert!(started);

    let task = manager.get(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert!(task.started_at.is_some(), "start stamps started_at");

    wait_for_status(&manager, &task_id, TaskStatus::Completed).await;
    let task = manager.get(&task_id).unwrap();
    assert!(task.completed_at.is_some());
    assert!(task.error.is_none());
}

#[tokio::test]
async fn start_fails_silently_for_missing_or_non_pending_tasks() {
    let (manager, _temp) = manager_with(Arc::new(FlakyRegistry::new(0)), fast_config());

    assert!(!manager.start("no-such-task", |_| async { Ok(()) }));

    let task_id = manager.create("llama3.2");
    assert!(manager.start(&task_id, |token| async move {
        token.cancelled().await;
        Ok(())
    }));
    // Already running: a second start is refused
    assert!(!manager.start(&task_id, |_| async { Ok(()) }));

    manager.cancel(&task_id);
}

#[tokio::test]
async fn worker_error_becomes_error_status_with_message() {
    let (manager, _temp) = manager_with(Arc::new(FlakyRegistry::new(0)), fast_config());
    let task_id = manager.create("llama3.2");

    manager.start(&task_id, |_| async {
        Err(Error::Registry("manifest digest mismatch".into()))
    });

    wait_for_status(&manager, &task_id, TaskStatus::Error).await;
    let task = manager.get(&task_id).unwrap();
    assert!(task.error.as_deref().unwrap().contains("manifest digest"));
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn cancel_sets_status_immediately_and_signals_the_token() {
    let (manager, _temp) = manager_with(Arc::new(FlakyRegistry::new(0)), fast_config());
    let task_id = manager.create("llama3.2");

    let observed = Arc::new(AtomicU32::new(0));
    let observed_clone = observed.clone();
    manager.start(&task_id, move |token| async move {
        token.cancelled().await;
        observed_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    assert!(manager.cancel(&task_id));

    // Status flips immediately, before the worker has observed anything
    assert_eq!(manager.get(&task_id).unwrap().status, TaskStatus::Cancelled);

    // The worker sees the token and exits; cancellation still wins over its Ok
    wait_until(|| observed.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.get(&task_id).unwrap().status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn cancel_returns_false_for_missing_or_terminal_tasks() {
    let (manager, _temp) = manager_with(Arc::new(FlakyRegistry::new(0)), fast_config());

    assert!(!manager.cancel("no-such-task"));

    let task_id = manager.create("llama3.2");
    manager.start(&task_id, |_| async { Ok(()) });
    wait_for_status(&manager, &task_id, TaskStatus::Completed).await;

    assert!(!manager.cancel(&task_id), "terminal tasks are never resurrected");
    assert_eq!(manager.get(&task_id).unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn progress_after_cancellation_never_changes_status() {
    let (manager, _temp) = manager_with(Arc::new(EndlessRegistry), fast_config());

    let task_id = manager.pull("llama3.2");
    wait_until(|| {
        manager
            .get(&task_id)
            .and_then(|t| t.progress)
            .is_some()
    })
    .await;

    assert!(manager.cancel(&task_id));

    // The worker thread may emit more events before observing the token;
    // feed some in directly to model that race
    manager.update_progress(
        &task_id,
        serde_json::json!({"status": "downloading", "completed": 999, "total": 1000}),
    );
    manager.update_progress(&task_id, serde_json::json!({"status": "success"}));

    let task = manager.get(&task_id).unwrap();
    assert_eq!(
        task.status,
        TaskStatus::Cancelled,
        "late progress must not resurrect a cancelled task"
    );
    assert_eq!(
        task.progress.as_ref().unwrap()["status"],
        "success",
        "the payload itself is still recorded"
    );
}

#[tokio::test]
async fn transient_failures_retry_then_complete_with_retry_count() {
    // Fails twice with a transient error, then succeeds: the task must end
    // completed with retry_count == 2
    let registry = Arc::new(FlakyRegistry::new(2));
    let (manager, _temp) = manager_with(registry.clone(), fast_config());

    let task_id = manager.pull("llama3.2");

    wait_for_status(&manager, &task_id, TaskStatus::Completed).await;
    let task = manager.get(&task_id).unwrap();
    assert_eq!(task.retry_count, 2);
    assert!(task.last_retry_at.is_some());
    assert_eq!(registry.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn error_payload_in_stream_fails_the_task_without_retry() {
    let (manager, _temp) = manager_with(Arc::new(BrokenModelRegistry), fast_config());

    let task_id = manager.pull("nope");

    wait_for_status(&manager, &task_id, TaskStatus::Error).await;
    let task = manager.get(&task_id).unwrap();
    assert!(task.error.as_deref().unwrap().contains("not found"));
    assert_eq!(task.retry_count, 0, "a not-found model is not transient");
}

#[tokio::test]
async fn update_progress_returns_false_for_unknown_tasks() {
    let (manager, _temp) = manager_with(Arc::new(FlakyRegistry::new(0)), fast_config());
    assert!(!manager.update_progress("ghost", serde_json::json!({"percent": 1.0})));
}

#[tokio::test]
async fn progress_payload_gains_disk_telemetry() {
    let (manager, _temp) = manager_with(Arc::new(FlakyRegistry::new(0)), fast_config());
    let task_id = manager.create("llama3.2");

    manager.update_progress(
        &task_id,
        serde_json::json!({"status": "downloading", "completed": 1, "total": 10}),
    );

    let task = manager.get(&task_id).unwrap();
    let progress = task.progress.unwrap();
    assert!(
        progress["disk_free_bytes"].as_u64().unwrap() > 0,
        "payload should be augmented with disk-space telemetry"
    );
}

#[tokio::test]
async fn throttle_coalesces_intermediate_updates_but_terminal_always_emits() {
    let config = PullsConfig {
        retry: fast_retry(),
        // Effectively never emit on time, only on big percent moves
        throttle_interval: Duration::from_secs(3600),
        percent_delta: 50.0,
        failed_cleanup_delay: Duration::from_secs(600),
        ..PullsConfig::default()
    };
    let (manager, _temp) = manager_with(Arc::new(FlakyRegistry::new(0)), config);
    let task_id = manager.create("llama3.2");

    let emissions: Arc<Mutex<Vec<Option<f64>>>> = Arc::new(Mutex::new(Vec::new()));
    let emissions_clone = emissions.clone();
    manager.subscribe(
        &task_id,
        Arc::new(move |task| {
            emissions_clone
                .lock()
                .unwrap()
                .push(task.last_emitted_percent);
        }),
    );

    // 1%..9%: first emits (no prior emission), the rest are coalesced
    for step in 1..10 {
        manager.update_progress(
            &task_id,
            serde_json::json!({"completed": step, "total": 100}),
        );
    }
    assert_eq!(
        emissions.lock().unwrap().len(),
        1,
        "small steps within the interval are coalesced"
    );

    // 80%: crosses the 50-point delta
    manager.update_progress(&task_id, serde_json::json!({"completed": 80, "total": 100}));
    assert_eq!(emissions.lock().unwrap().len(), 2);

    // Terminal transition bypasses the throttle entirely
    manager.start(&task_id, |_| async { Ok(()) });
    wait_for_status(&manager, &task_id, TaskStatus::Completed).await;
    wait_until(|| emissions.lock().unwrap().len() == 3).await;
}

#[tokio::test]
async fn subscribe_returns_false_for_unknown_tasks() {
    let (manager, _temp) = manager_with(Arc::new(FlakyRegistry::new(0)), fast_config());
    assert!(!manager.subscribe("ghost", Arc::new(|_| {})));
}

#[tokio::test]
async fn list_returns_tasks_newest_first() {
    let (manager, _temp) = manager_with(Arc::new(FlakyRegistry::new(0)), fast_config());
    let first = manager.create("llama3.2");
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = manager.create("mistral");

    let listed = manager.list();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].task_id, second);
    assert_eq!(listed[1].task_id, first);
}
