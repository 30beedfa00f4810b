//! Durable file store
//!
//! All persistent state lives as JSON files under a configurable data root:
//!
//! ```text
//! data/
//!   experiments/{id}/experiment.json
//!   experiments/{id}/conversations/{iteration}.json
//!   experiments_index.json (+ .lock)
//!   imported_conversations/{id}.json
//!   pull_tasks.json (+ .lock)
//!   locks/{experiment_id}.lock
//! ```
//!
//! Guarantees:
//! - **Atomicity** — every write goes to a temp file in the target's
//!   directory, is fsynced, then renamed over the target. A reader never
//!   observes a partial file.
//! - **Isolation** — one lock per experiment id serializes all mutation of
//!   that experiment's files; separate locks guard the global index and the
//!   pull-task table. Locks pair an in-process mutex with an fs2 advisory
//!   lock file.
//! - **Rebuildable index** — `experiments_index.json` is a cache; a directory
//!   scan regenerates it at any time.

mod conversations;
mod experiments;
mod tasks;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use conversations::ConversationRecord;

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result, StorageError};
use crate::types::ExperimentId;

/// Durable JSON file store with atomic writes and per-resource locking
///
/// Cloneable; all clones share the same lock registry.
#[derive(Clone)]
pub struct FileStore {
    root: PathBuf,
    /// One in-process mutex per experiment id, created on first use
    experiment_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    /// Guards the global experiment index
    index_lock: Arc<Mutex<()>>,
    /// Guards the pull-task table
    tasks_lock: Arc<Mutex<()>>,
}

impl FileStore {
    /// Open (creating if necessary) a store rooted at `data_dir`
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let root = data_dir.into();
        for dir in [
            root.clone(),
            root.join("experiments"),
            root.join("imported_conversations"),
            root.join("locks"),
        ] {
            fs::create_dir_all(&dir).map_err(|e| StorageError::WriteFailed {
                path: dir.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(Self {
            root,
            experiment_locks: Arc::new(Mutex::new(HashMap::new())),
            index_lock: Arc::new(Mutex::new(())),
            tasks_lock: Arc::new(Mutex::new(())),
        })
    }

    /// The data root this store operates on
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Path layout ─────────────────────────────────────────────────────

    pub(crate) fn experiment_dir(&self, id: &ExperimentId) -> PathBuf {
        self.root.join("experiments").join(id.as_str())
    }

    pub(crate) fn experiment_path(&self, id: &ExperimentId) -> PathBuf {
        self.experiment_dir(id).join("experiment.json")
    }

    pub(crate) fn conversations_dir(&self, id: &ExperimentId) -> PathBuf {
        self.experiment_dir(id).join("conversations")
    }

    pub(crate) fn snapshot_path(&self, id: &ExperimentId, iteration: u32) -> PathBuf {
        self.conversations_dir(id).join(format!("{iteration}.json"))
    }

    pub(crate) fn imported_path(&self, id: &str) -> PathBuf {
        self.root
            .join("imported_conversations")
            .join(format!("{id}.json"))
    }

    pub(crate) fn index_path(&self) -> PathBuf {
        self.root.join("experiments_index.json")
    }

    pub(crate) fn tasks_path(&self) -> PathBuf {
        self.root.join("pull_tasks.json")
    }

    pub(crate) fn experiment_lock_path(&self, id: &ExperimentId) -> PathBuf {
        self.root.join("locks").join(format!("{}.lock", id.as_str()))
    }

    // ── Locking ─────────────────────────────────────────────────────────

    /// Look up (or create) the in-process mutex for one experiment id
    fn experiment_mutex(&self, id: &ExperimentId) -> Result<Arc<Mutex<()>>> {
        let mut registry = self
            .experiment_locks
            .lock()
            .map_err(|_| StorageError::LockFailed {
                resource: format!("experiment {id}"),
                reason: "lock registry poisoned".to_string(),
            })?;
        Ok(registry
            .entry(id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Run `f` while holding the experiment's lock (in-process mutex plus
    /// fs2 advisory lock file)
    pub(crate) fn with_experiment_lock<T>(
        &self,
        id: &ExperimentId,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let mutex = self.experiment_mutex(id)?;
        let resource = format!("experiment {id}");
        let lock_path = self.experiment_lock_path(id);
        with_locked(&mutex, &lock_path, &resource, f)
    }

    /// Run `f` while holding the global index lock
    pub(crate) fn with_index_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock_path = self.index_path().with_extension("json.lock");
        with_locked(&self.index_lock, &lock_path, "experiments index", f)
    }

    /// Run `f` while holding the pull-task table lock
    pub(crate) fn with_tasks_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock_path = self.tasks_path().with_extension("json.lock");
        with_locked(&self.tasks_lock, &lock_path, "pull tasks", f)
    }
}

/// Acquire the in-process mutex, then the advisory file lock, then run `f`
fn with_locked<T>(
    mutex: &Mutex<()>,
    lock_path: &Path,
    resource: &str,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let _in_process = mutex.lock().map_err(|_| StorageError::LockFailed {
        resource: resource.to_string(),
        reason: "mutex poisoned".to_string(),
    })?;

    let lock_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| StorageError::LockFailed {
            resource: resource.to_string(),
            reason: format!("cannot open lock file: {e}"),
        })?;
    lock_file
        .lock_exclusive()
        .map_err(|e| StorageError::LockFailed {
            resource: resource.to_string(),
            reason: e.to_string(),
        })?;

    let result = f();

    // Advisory lock releases when the descriptor closes; unlock explicitly so
    // the release is not tied to drop ordering
    let _ = FileExt::unlock(&lock_file);

    result
}

/// Atomically write a value as pretty JSON: temp file, fsync, rename
///
/// Serialization happens before the temp file is created, so schema problems
/// never leave stray files behind; any later failure removes the temp file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().ok_or_else(|| StorageError::WriteFailed {
        path: path.to_path_buf(),
        reason: "path has no parent directory".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(|e| StorageError::WriteFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let data = serde_json::to_vec_pretty(value).map_err(|e| StorageError::WriteFailed {
        path: path.to_path_buf(),
        reason: format!("serialization failed: {e}"),
    })?;

    let file_name = path.file_name().ok_or_else(|| StorageError::WriteFailed {
        path: path.to_path_buf(),
        reason: "path has no file name".to_string(),
    })?;
    let tmp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));

    let write_result = (|| -> std::io::Result<()> {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&data)?;
        tmp.sync_all()?;
        drop(tmp);
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::Storage(StorageError::WriteFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }));
    }

    Ok(())
}

/// Read and deserialize a JSON file; `Ok(None)` when the file does not exist
pub(crate) fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::Storage(StorageError::ReadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }));
        }
    };

    let value = serde_json::from_slice(&data).map_err(|e| StorageError::InvalidRecord {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(Some(value))
}
