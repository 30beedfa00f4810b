//! Experiment save/get/list/update/delete and index consistency

use super::*;
use crate::error::Error;
use std::fs;

#[test]
fn save_assigns_id_and_round_trips() {
    let (store, _temp) = test_store();
    let mut experiment = sample_experiment("first", 0);
    assert!(experiment.id.as_str().is_empty());

    store.save_experiment(&mut experiment).unwrap();

    assert!(!experiment.id.as_str().is_empty(), "save assigns an id");
    let loaded = store.get_experiment(&experiment.id).unwrap();
    assert_eq!(loaded.title, "first");
    assert_eq!(loaded.status, ExperimentStatus::Pending);
    assert_eq!(loaded.iterations, 2);
}

#[test]
fn save_preserves_caller_supplied_id() {
    let (store, _temp) = test_store();
    let mut experiment = sample_experiment("named", 0);
    experiment.id = crate::types::ExperimentId::new("my-experiment");

    store.save_experiment(&mut experiment).unwrap();

    assert_eq!(experiment.id.as_str(), "my-experiment");
    assert!(store.get_experiment(&experiment.id).is_ok());
}

#[test]
fn get_unknown_experiment_is_not_found() {
    let (store, _temp) = test_store();
    let err = store
        .get_experiment(&crate::types::ExperimentId::new("ghost"))
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn list_is_sorted_by_created_at_descending() {
    let (store, _temp) = test_store();
    let mut oldest = sample_experiment("oldest", 30);
    let mut middle = sample_experiment("middle", 20);
    let mut newest = sample_experiment("newest", 10);
    // Save out of order on purpose
    store.save_experiment(&mut middle).unwrap();
    store.save_experiment(&mut newest).unwrap();
    store.save_experiment(&mut oldest).unwrap();

    let listed = store.list_experiments().unwrap();
    let titles: Vec<&str> = listed.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, vec!["newest", "middle", "oldest"]);
}

#[test]
fn resaving_replaces_the_index_entry() {
    let (store, _temp) = test_store();
    let mut experiment = sample_experiment("renamed", 0);
    store.save_experiment(&mut experiment).unwrap();

    experiment.title = "renamed twice".to_string();
    experiment.status = ExperimentStatus::Running;
    store.save_experiment(&mut experiment).unwrap();

    let listed = store.list_experiments().unwrap();
    assert_eq!(listed.len(), 1, "resave replaces, never duplicates");
    assert_eq!(listed[0].title, "renamed twice");
    assert_eq!(listed[0].status, ExperimentStatus::Running);
}

#[test]
fn update_merges_partial_document() {
    let (store, _temp) = test_store();
    let mut experiment = sample_experiment("patched", 0);
    store.save_experiment(&mut experiment).unwrap();

    let updated = store
        .update_experiment(
            &experiment.id,
            &serde_json::json!({
                "status": "running",
                "current_iteration": 1,
            }),
        )
        .unwrap();

    assert_eq!(updated.status, ExperimentStatus::Running);
    assert_eq!(updated.current_iteration, 1);
    assert_eq!(updated.title, "patched", "unpatched fields survive");

    // The merge is persisted, not just returned
    let loaded = store.get_experiment(&experiment.id).unwrap();
    assert_eq!(loaded.status, ExperimentStatus::Running);
}

#[test]
fn update_ignores_id_key_in_patch() {
    let (store, _temp) = test_store();
    let mut experiment = sample_experiment("immovable", 0);
    store.save_experiment(&mut experiment).unwrap();

    let updated = store
        .update_experiment(&experiment.id, &serde_json::json!({"id": "hijacked"}))
        .unwrap();

    assert_eq!(updated.id, experiment.id, "the id is part of the path layout");
}

#[test]
fn update_rejects_merge_that_breaks_the_schema() {
    let (store, _temp) = test_store();
    let mut experiment = sample_experiment("strict", 0);
    store.save_experiment(&mut experiment).unwrap();

    let err = store
        .update_experiment(
            &experiment.id,
            &serde_json::json!({"status": "definitely-not-a-status"}),
        )
        .unwrap_err();

    assert!(
        matches!(
            err,
            Error::Storage(crate::error::StorageError::InvalidRecord { .. })
        ),
        "schema validation happens before the write begins, got {err:?}"
    );

    // The stored record is untouched
    let loaded = store.get_experiment(&experiment.id).unwrap();
    assert_eq!(loaded.status, ExperimentStatus::Pending);
}

#[test]
fn update_unknown_experiment_is_not_found() {
    let (store, _temp) = test_store();
    let err = store
        .update_experiment(
            &crate::types::ExperimentId::new("ghost"),
            &serde_json::json!({"status": "running"}),
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn delete_removes_tree_index_entry_and_lock_file() {
    let (store, _temp) = test_store();
    let mut experiment = sample_experiment("doomed", 0);
    store.save_experiment(&mut experiment).unwrap();
    store
        .save_snapshot(&sample_snapshot(&experiment, 1))
        .unwrap();

    store.delete_experiment(&experiment.id).unwrap();

    assert!(matches!(
        store.get_experiment(&experiment.id).unwrap_err(),
        Error::NotFound(_)
    ));
    assert!(
        !store.experiment_dir(&experiment.id).exists(),
        "the whole directory tree including snapshots is removed"
    );
    assert!(!store.experiment_lock_path(&experiment.id).exists());
    assert!(store.list_experiments().unwrap().is_empty());

    // Deleting again reports not found
    assert!(matches!(
        store.delete_experiment(&experiment.id).unwrap_err(),
        Error::NotFound(_)
    ));
}

#[test]
fn missing_index_is_rebuilt_by_directory_scan() {
    let (store, _temp) = test_store();
    let mut a = sample_experiment("a", 20);
    let mut b = sample_experiment("b", 10);
    store.save_experiment(&mut a).unwrap();
    store.save_experiment(&mut b).unwrap();

    let live = store.list_experiments().unwrap();

    // Simulate index loss
    fs::remove_file(store.index_path()).unwrap();
    let rebuilt = store.list_experiments().unwrap();

    assert_eq!(rebuilt, live, "rebuilt index must equal the live index");
    assert!(store.index_path().exists(), "rebuild persists the index");
}

#[test]
fn index_rebuild_equals_live_index_after_mixed_operations() {
    let (store, _temp) = test_store();
    let mut a = sample_experiment("a", 40);
    let mut b = sample_experiment("b", 30);
    let mut c = sample_experiment("c", 20);
    store.save_experiment(&mut a).unwrap();
    store.save_experiment(&mut b).unwrap();
    store.save_experiment(&mut c).unwrap();
    store
        .update_experiment(&b.id, &serde_json::json!({"status": "running"}))
        .unwrap();
    store.delete_experiment(&a.id).unwrap();

    let live = store.list_experiments().unwrap();
    let rebuilt = store.rebuild_index().unwrap();

    assert_eq!(rebuilt, live);
    assert_eq!(live.len(), 2);
}

#[test]
fn index_rebuild_skips_corrupt_records() {
    let (store, _temp) = test_store();
    let mut good = sample_experiment("good", 0);
    store.save_experiment(&mut good).unwrap();

    // A corrupt experiment directory alongside the good one
    let bad_dir = store.root().join("experiments").join("corrupt");
    fs::create_dir_all(&bad_dir).unwrap();
    fs::write(bad_dir.join("experiment.json"), b"{broken").unwrap();

    let rebuilt = store.rebuild_index().unwrap();
    assert_eq!(rebuilt.len(), 1, "corrupt record is skipped, not fatal");
    assert_eq!(rebuilt[0].title, "good");
}
