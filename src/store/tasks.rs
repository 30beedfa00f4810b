//! Pull-task table persistence
//!
//! The whole task table is one JSON document, rewritten atomically under its
//! own lock on every meaningful change. This keeps restart recovery trivial:
//! the manager reloads the table and classifies what it finds.

use std::collections::HashMap;

use super::{FileStore, read_json_opt, write_json_atomic};
use crate::error::Result;
use crate::types::PullTask;

impl FileStore {
    /// Load the persisted pull-task table (empty if none exists yet)
    pub fn load_pull_tasks(&self) -> Result<HashMap<String, PullTask>> {
        self.with_tasks_lock(|| Ok(read_json_opt(&self.tasks_path())?.unwrap_or_default()))
    }

    /// Atomically persist the full pull-task table
    pub fn save_pull_tasks(&self, tasks: &HashMap<String, PullTask>) -> Result<()> {
        self.with_tasks_lock(|| write_json_atomic(&self.tasks_path(), tasks))
    }
}
