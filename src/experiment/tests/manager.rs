//! Manager-level operations: validation, lookup, cancel, delete, startup sweep

use super::*;
use crate::error::{Error, ExperimentError};
use crate::store::FileStore;
use crate::types::NewExperiment;

#[tokio::test]
async fn create_rejects_invalid_requests_without_side_effects() {
    let (manager, temp) = test_manager(Arc::new(ScriptedProducer), Default::default());

    let invalid = NewExperiment {
        agents: vec![],
        ..request(1)
    };
    assert!(manager.create_and_start(invalid).is_err());

    let store = FileStore::open(temp.path()).unwrap();
    assert!(
        store.list_experiments().unwrap().is_empty(),
        "a rejected request must not leave a record behind"
    );
}

#[tokio::test]
async fn get_prefers_live_state_and_falls_back_to_disk() {
    let (manager, temp) = test_manager(Arc::new(ScriptedProducer), Default::default());
    let experiment = manager.create_and_start(request(1)).unwrap();
    let id = experiment.id.clone();

    // Live lookup works even before anything is streamed
    assert_eq!(manager.get(&id).unwrap().id, id);

    let store = FileStore::open(temp.path()).unwrap();
    wait_for_terminal_on_disk(&store, &id).await;

    // A fresh manager over the same store has no live run, so it reads disk
    let cold = ExperimentManager::new(
        store,
        Arc::new(ScriptedProducer),
        Default::default(),
    );
    let from_disk = cold.get(&id).unwrap();
    assert_eq!(from_disk.status, ExperimentStatus::Completed);
}

#[tokio::test]
async fn get_unknown_experiment_is_not_found() {
    let (manager, _temp) = test_manager(Arc::new(ScriptedProducer), Default::default());
    assert!(matches!(
        manager.get(&ExperimentId::new("ghost")).unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn list_reflects_created_experiments() {
    let (manager, _temp) = test_manager(Arc::new(ScriptedProducer), Default::default());
    let experiment = manager.create_and_start(request(1)).unwrap();

    let listed = manager.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, experiment.id);
    assert_eq!(listed[0].title, "test run");
}

#[tokio::test]
async fn cancel_unknown_experiment_is_not_found() {
    let (manager, _temp) = test_manager(Arc::new(ScriptedProducer), Default::default());
    assert!(matches!(
        manager.cancel(&ExperimentId::new("ghost")).unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn cancel_after_completion_reports_already_terminal() {
    let (manager, temp) = test_manager(Arc::new(ScriptedProducer), Default::default());
    let experiment = manager.create_and_start(request(1)).unwrap();
    let id = experiment.id.clone();

    let store = FileStore::open(temp.path()).unwrap();
    wait_for_terminal_on_disk(&store, &id).await;

    let err = manager.cancel(&id).unwrap_err();
    assert!(matches!(
        err,
        Error::Experiment(ExperimentError::AlreadyTerminal { .. })
    ));
}

#[tokio::test]
async fn delete_removes_live_run_and_durable_state() {
    let (manager, temp) = test_manager(Arc::new(SlowProducer), Default::default());
    let experiment = manager.create_and_start(request(10)).unwrap();
    let id = experiment.id.clone();

    tokio::time::sleep(Duration::from_millis(80)).await;
    manager.delete(&id).unwrap();

    assert!(matches!(manager.get(&id).unwrap_err(), Error::NotFound(_)));
    let store = FileStore::open(temp.path()).unwrap();
    assert!(store.list_experiments().unwrap().is_empty());
}

#[tokio::test]
async fn take_stream_semantics() {
    let (manager, _temp) = test_manager(Arc::new(ScriptedProducer), Default::default());
    let experiment = manager.create_and_start(request(1)).unwrap();

    // Unknown experiment: an error the WS handler maps to its not-found close
    assert!(manager.take_stream(&ExperimentId::new("ghost")).is_err());

    // First consumer gets the receiver, the second gets poll-only mode
    assert!(manager.take_stream(&experiment.id).unwrap().is_some());
    assert!(manager.take_stream(&experiment.id).unwrap().is_none());
}

#[tokio::test]
async fn terminal_frame_is_none_until_the_run_finishes() {
    let (manager, temp) = test_manager(Arc::new(ScriptedProducer), Default::default());
    let experiment = manager.create_and_start(request(1)).unwrap();
    let id = experiment.id.clone();

    let store = FileStore::open(temp.path()).unwrap();
    wait_for_terminal_on_disk(&store, &id).await;

    let frame = manager.terminal_frame(&id).unwrap().unwrap();
    assert!(frame.is_terminal());
    assert_eq!(frame.data["status"], "completed");
    assert_eq!(frame.close_connection, Some(true));
}

#[tokio::test]
async fn startup_sweep_fails_interrupted_experiments() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let store = FileStore::open(temp_dir.path()).unwrap();

    // A previous process died mid-run
    let mut orphan = request(2).into_experiment().unwrap();
    orphan.status = ExperimentStatus::Running;
    orphan.current_iteration = 1;
    store.save_experiment(&mut orphan).unwrap();

    let mut done = request(1).into_experiment().unwrap();
    done.status = ExperimentStatus::Completed;
    store.save_experiment(&mut done).unwrap();

    let manager = ExperimentManager::new(
        store.clone(),
        Arc::new(ScriptedProducer),
        Default::default(),
    );
    let swept = manager.fail_interrupted().unwrap();

    assert_eq!(swept, 1, "only the non-terminal experiment is swept");
    let reloaded = store.get_experiment(&orphan.id).unwrap();
    assert_eq!(reloaded.status, ExperimentStatus::Error);
    assert_eq!(reloaded.error.as_deref(), Some("interrupted by restart"));
    assert_eq!(
        store.get_experiment(&done.id).unwrap().status,
        ExperimentStatus::Completed
    );
}
