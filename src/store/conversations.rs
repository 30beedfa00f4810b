//! Conversation persistence: per-iteration snapshots and imported conversations

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use utoipa::ToSchema;

use super::{FileStore, read_json_opt, write_json_atomic};
use crate::error::{ConversationError, Error, Result, StorageError};
use crate::types::{ConversationSnapshot, ExperimentId, ImportedConversation};

/// A conversation looked up by id: either an immutable experiment snapshot or
/// a free-standing imported conversation
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum ConversationRecord {
    /// Immutable per-iteration snapshot
    Snapshot(ConversationSnapshot),
    /// Mutable imported conversation
    Imported(ImportedConversation),
}

impl ConversationRecord {
    /// The record's id, whichever kind it is
    pub fn id(&self) -> &str {
        match self {
            ConversationRecord::Snapshot(s) => &s.id,
            ConversationRecord::Imported(c) => &c.id,
        }
    }
}

impl FileStore {
    /// Persist a completed-iteration snapshot
    ///
    /// Snapshots are immutable: each (experiment, iteration) pair maps to
    /// exactly one file for its entire lifetime, and writing over an existing
    /// snapshot is an error.
    pub fn save_snapshot(&self, snapshot: &ConversationSnapshot) -> Result<()> {
        let path = self.snapshot_path(&snapshot.experiment_id, snapshot.iteration);
        self.with_experiment_lock(&snapshot.experiment_id, || {
            if path.exists() {
                return Err(Error::Conversation(ConversationError::SnapshotExists {
                    id: snapshot.id.clone(),
                }));
            }
            write_json_atomic(&path, snapshot)
        })
    }

    /// All snapshots of one experiment, in iteration order
    pub fn snapshots_for(&self, id: &ExperimentId) -> Result<Vec<ConversationSnapshot>> {
        let dir = self.conversations_dir(id);
        let dir_iter = match fs::read_dir(&dir) {
            Ok(iter) => iter,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Storage(StorageError::ReadFailed {
                    path: dir,
                    reason: e.to_string(),
                }));
            }
        };

        let mut snapshots = Vec::new();
        for entry in dir_iter.flatten() {
            if let Some(snapshot) = read_json_opt::<ConversationSnapshot>(&entry.path())? {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by_key(|s| s.iteration);
        Ok(snapshots)
    }

    /// Look up any conversation by id
    ///
    /// Composite ids `{experiment_id}_{iteration}` decode straight to a
    /// snapshot path; other ids resolve to imported conversations. Records
    /// that predate the naming convention are found by a directory scan.
    pub fn get_conversation(&self, id: &str) -> Result<ConversationRecord> {
        // Fast path: composite id -> snapshot file
        if let Some((experiment_id, iteration)) = split_composite_id(id)
            && let Some(snapshot) =
                read_json_opt::<ConversationSnapshot>(&self.snapshot_path(&experiment_id, iteration))?
        {
            return Ok(ConversationRecord::Snapshot(snapshot));
        }

        // Fast path: imported conversation file
        if let Some(imported) = read_json_opt::<ImportedConversation>(&self.imported_path(id))? {
            return Ok(ConversationRecord::Imported(imported));
        }

        // Legacy fallback: scan every record for a matching id field
        self.scan_for_conversation(id)?
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))
    }

    /// Save an imported conversation, assigning an id if absent
    pub fn save_imported(&self, conversation: &mut ImportedConversation) -> Result<()> {
        if conversation.id.is_empty() {
            conversation.id = uuid::Uuid::new_v4().to_string();
        }
        write_json_atomic(&self.imported_path(&conversation.id), conversation)
    }

    /// Apply a partial JSON update to an imported conversation
    ///
    /// Only imported conversations are mutable; attempting to update a
    /// snapshot id fails with `not_imported`.
    pub fn update_imported(
        &self,
        id: &str,
        patch: &serde_json::Value,
    ) -> Result<ImportedConversation> {
        let patch_map = match patch.as_object() {
            Some(map) => map,
            None => {
                return Err(Error::Validation(
                    "conversation update must be a JSON object".to_string(),
                ));
            }
        };

        let path = self.imported_path(id);
        let mut document: serde_json::Value = match read_json_opt(&path)? {
            Some(document) => document,
            None => {
                // Distinguish "there is a conversation but it's a snapshot"
                // from "nothing with this id exists at all"
                return if self.get_conversation(id).is_ok() {
                    Err(Error::Conversation(ConversationError::NotImported {
                        id: id.to_string(),
                    }))
                } else {
                    Err(Error::NotFound(format!("conversation {id}")))
                };
            }
        };

        let Some(target) = document.as_object_mut() else {
            return Err(Error::Storage(StorageError::InvalidRecord {
                path,
                reason: "stored conversation is not a JSON object".to_string(),
            }));
        };
        for (key, value) in patch_map {
            if key == "id" {
                continue;
            }
            target.insert(key.clone(), value.clone());
        }

        let mut merged: ImportedConversation =
            serde_json::from_value(document).map_err(|e| StorageError::InvalidRecord {
                path: path.clone(),
                reason: format!("merged record is invalid: {e}"),
            })?;
        merged.updated_at = Some(Utc::now());

        write_json_atomic(&path, &merged)?;
        Ok(merged)
    }

    /// Delete an imported conversation
    pub fn delete_imported(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.imported_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("conversation {id}")))
            }
            Err(e) => Err(Error::Storage(StorageError::WriteFailed {
                path: self.imported_path(id),
                reason: e.to_string(),
            })),
        }
    }

    /// List all imported conversations, newest first
    pub fn list_imported(&self) -> Result<Vec<ImportedConversation>> {
        let dir = self.root().join("imported_conversations");
        let dir_iter = match fs::read_dir(&dir) {
            Ok(iter) => iter,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Storage(StorageError::ReadFailed {
                    path: dir,
                    reason: e.to_string(),
                }));
            }
        };

        let mut conversations = Vec::new();
        for entry in dir_iter.flatten() {
            if let Some(conversation) = read_json_opt::<ImportedConversation>(&entry.path())? {
                conversations.push(conversation);
            }
        }
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(conversations)
    }

    /// Directory-scan fallback for conversations whose file name does not
    /// match their id field (legacy data)
    fn scan_for_conversation(&self, id: &str) -> Result<Option<ConversationRecord>> {
        // Imported conversations first (flat directory, cheapest)
        for conversation in self.list_imported()? {
            if conversation.id == id {
                return Ok(Some(ConversationRecord::Imported(conversation)));
            }
        }

        // Then every experiment's snapshot directory
        let experiments_dir = self.root().join("experiments");
        let dir_iter = match fs::read_dir(&experiments_dir) {
            Ok(iter) => iter,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Storage(StorageError::ReadFailed {
                    path: experiments_dir,
                    reason: e.to_string(),
                }));
            }
        };
        for experiment_entry in dir_iter.flatten() {
            let conversations = experiment_entry.path().join("conversations");
            let Ok(snapshot_iter) = fs::read_dir(&conversations) else {
                continue;
            };
            for snapshot_entry in snapshot_iter.flatten() {
                if let Some(snapshot) =
                    read_json_opt::<ConversationSnapshot>(&snapshot_entry.path())?
                    && snapshot.id == id
                {
                    return Ok(Some(ConversationRecord::Snapshot(snapshot)));
                }
            }
        }

        Ok(None)
    }
}

/// Decode a composite `{experiment_id}_{iteration}` id
///
/// Experiment ids may themselves contain underscores, so the split is on the
/// last one.
pub(crate) fn split_composite_id(id: &str) -> Option<(ExperimentId, u32)> {
    let (experiment, iteration) = id.rsplit_once('_')?;
    if experiment.is_empty() {
        return None;
    }
    let iteration: u32 = iteration.parse().ok()?;
    Some((ExperimentId::new(experiment), iteration))
}
