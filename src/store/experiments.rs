//! Experiment persistence and the derived listing index

use std::fs;

use super::{FileStore, read_json_opt, write_json_atomic};
use crate::error::{Error, Result, StorageError};
use crate::types::{Experiment, ExperimentId, ExperimentIndexEntry};

impl FileStore {
    /// Save an experiment, assigning an id and creation time if absent
    ///
    /// Writes `experiment.json` under the experiment's lock, then updates the
    /// listing index (insert or replace, sorted by created_at descending).
    pub fn save_experiment(&self, experiment: &mut Experiment) -> Result<()> {
        if experiment.id.as_str().is_empty() {
            experiment.id = ExperimentId::generate();
        }

        let path = self.experiment_path(&experiment.id);
        self.with_experiment_lock(&experiment.id, || write_json_atomic(&path, experiment))?;

        self.update_index_entry(experiment.index_entry())
    }

    /// Load an experiment by id (direct path read)
    pub fn get_experiment(&self, id: &ExperimentId) -> Result<Experiment> {
        read_json_opt(&self.experiment_path(id))?
            .ok_or_else(|| Error::NotFound(format!("experiment {id}")))
    }

    /// List experiments from the index, rebuilding it by directory scan when
    /// the index file is missing
    pub fn list_experiments(&self) -> Result<Vec<ExperimentIndexEntry>> {
        self.with_index_lock(|| match read_json_opt(&self.index_path())? {
            Some(entries) => Ok(entries),
            None => {
                tracing::info!("Experiment index missing, rebuilding from directory scan");
                self.rebuild_index_locked()
            }
        })
    }

    /// Apply a partial JSON update to a stored experiment
    ///
    /// A locked read-modify-write: the patch object's top-level keys replace
    /// those of the stored record, and the merged document is validated by
    /// deserializing back into [`Experiment`] before being written.
    pub fn update_experiment(
        &self,
        id: &ExperimentId,
        patch: &serde_json::Value,
    ) -> Result<Experiment> {
        let patch_map = match patch.as_object() {
            Some(map) => map,
            None => {
                return Err(Error::Validation(
                    "experiment update must be a JSON object".to_string(),
                ));
            }
        };

        let path = self.experiment_path(id);
        let updated: Experiment = self.with_experiment_lock(id, || {
            let mut document: serde_json::Value = read_json_opt(&path)?
                .ok_or_else(|| Error::NotFound(format!("experiment {id}")))?;

            let Some(target) = document.as_object_mut() else {
                return Err(Error::Storage(StorageError::InvalidRecord {
                    path: path.clone(),
                    reason: "stored experiment is not a JSON object".to_string(),
                }));
            };
            for (key, value) in patch_map {
                // The id is part of the path layout and never patched
                if key == "id" {
                    continue;
                }
                target.insert(key.clone(), value.clone());
            }

            let merged: Experiment =
                serde_json::from_value(document).map_err(|e| StorageError::InvalidRecord {
                    path: path.clone(),
                    reason: format!("merged record is invalid: {e}"),
                })?;

            write_json_atomic(&path, &merged)?;
            Ok(merged)
        })?;

        self.update_index_entry(updated.index_entry())?;
        Ok(updated)
    }

    /// Delete an experiment: its whole directory tree (metadata plus all
    /// snapshots), its index entry, and its lock file
    pub fn delete_experiment(&self, id: &ExperimentId) -> Result<()> {
        let dir = self.experiment_dir(id);
        self.with_experiment_lock(id, || {
            match fs::remove_dir_all(&dir) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(Error::NotFound(format!("experiment {id}")))
                }
                Err(e) => Err(Error::Storage(StorageError::WriteFailed {
                    path: dir.clone(),
                    reason: e.to_string(),
                })),
            }
        })?;

        self.remove_index_entry(id)?;
        let _ = fs::remove_file(self.experiment_lock_path(id));
        Ok(())
    }

    /// Force a rebuild of the listing index from a directory scan
    pub fn rebuild_index(&self) -> Result<Vec<ExperimentIndexEntry>> {
        self.with_index_lock(|| self.rebuild_index_locked())
    }

    /// Insert or replace one index entry (caller need not hold the index lock)
    pub(crate) fn update_index_entry(&self, entry: ExperimentIndexEntry) -> Result<()> {
        self.with_index_lock(|| {
            let mut entries: Vec<ExperimentIndexEntry> =
                read_json_opt(&self.index_path())?.unwrap_or_default();
            entries.retain(|e| e.id != entry.id);
            entries.push(entry);
            entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            write_json_atomic(&self.index_path(), &entries)
        })
    }

    /// Remove one index entry, if present
    pub(crate) fn remove_index_entry(&self, id: &ExperimentId) -> Result<()> {
        self.with_index_lock(|| {
            let mut entries: Vec<ExperimentIndexEntry> =
                read_json_opt(&self.index_path())?.unwrap_or_default();
            entries.retain(|e| &e.id != id);
            write_json_atomic(&self.index_path(), &entries)
        })
    }

    /// Scan `experiments/*/experiment.json` and write a fresh index.
    /// Caller must hold the index lock.
    fn rebuild_index_locked(&self) -> Result<Vec<ExperimentIndexEntry>> {
        let experiments_dir = self.root().join("experiments");
        let mut entries = Vec::new();

        let dir_iter = match fs::read_dir(&experiments_dir) {
            Ok(iter) => iter,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                write_json_atomic(&self.index_path(), &entries)?;
                return Ok(entries);
            }
            Err(e) => {
                return Err(Error::Storage(StorageError::ReadFailed {
                    path: experiments_dir,
                    reason: e.to_string(),
                }));
            }
        };

        for dir_entry in dir_iter.flatten() {
            let metadata_path = dir_entry.path().join("experiment.json");
            match read_json_opt::<Experiment>(&metadata_path) {
                Ok(Some(experiment)) => entries.push(experiment.index_entry()),
                Ok(None) => {} // stray directory without metadata
                Err(e) => {
                    // One corrupt record must not poison the whole listing
                    tracing::warn!(
                        path = %metadata_path.display(),
                        error = %e,
                        "Skipping unreadable experiment during index rebuild"
                    );
                }
            }
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        write_json_atomic(&self.index_path(), &entries)?;
        Ok(entries)
    }
}
