//! Pull task lifecycle: registration, worker spawning, cancellation,
//! progress updates and crash-safe persistence

use chrono::Utc;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use super::{ProgressCallback, PullManager, throttle};
use crate::error::Result;
use crate::types::{PullTask, TaskStatus};

impl PullManager {
    /// Register a new pull task in `pending` state
    ///
    /// No side effects beyond registration and persistence; pair with
    /// [`start`](Self::start) (or use [`pull`](Self::pull) for the standard
    /// transfer routine).
    pub fn create(&self, model_name: &str) -> String {
        let task_id = format!("pull-{}", uuid::Uuid::new_v4());
        let task = PullTask::new(&task_id, model_name);

        if let Ok(mut tasks) = self.inner.tasks.lock() {
            tasks.insert(task_id.clone(), task);
        }
        self.persist();

        tracing::info!(task_id = %task_id, model = %model_name, "Pull task registered");
        task_id
    }

    /// Start a pending task's worker
    ///
    /// Transitions `pending -> running`, stamps `started_at`, allocates a
    /// cancellation token and spawns `work(token)`. Returns false (without
    /// side effects) if the task is missing or not pending.
    ///
    /// The worker wrapper applies the terminal rules: a normal return becomes
    /// `completed` unless the task was already cancelled (cancellation wins);
    /// an error becomes `error` unless cancelled, and schedules a short-delay
    /// removal.
    pub fn start<F, Fut>(&self, task_id: &str, work: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let token = CancellationToken::new();

        {
            let Ok(mut tasks) = self.inner.tasks.lock() else {
                return false;
            };
            let Some(task) = tasks.get_mut(task_id) else {
                return false;
            };
            if task.status != TaskStatus::Pending {
                return false;
            }
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
        }
        if let Ok(mut tokens) = self.inner.cancel_tokens.lock() {
            tokens.insert(task_id.to_string(), token.clone());
        }
        self.persist();

        let manager = self.clone();
        let task_id = task_id.to_string();
        let future = work(token);
        tokio::spawn(async move {
            let result = future.await;
            manager.finish(&task_id, result);
        });

        true
    }

    /// Cancel a task: status becomes `cancelled` immediately and the
    /// cancellation token is signalled; the worker observes it cooperatively
    ///
    /// Returns false if the task is missing or already terminal.
    pub fn cancel(&self, task_id: &str) -> bool {
        let cancelled = {
            let Ok(mut tasks) = self.inner.tasks.lock() else {
                return false;
            };
            let Some(task) = tasks.get_mut(task_id) else {
                return false;
            };
            if task.status.is_terminal() {
                return false;
            }
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
            task.clone()
        };

        if let Ok(tokens) = self.inner.cancel_tokens.lock()
            && let Some(token) = tokens.get(task_id)
        {
            token.cancel();
        }

        tracing::info!(task_id = %task_id, model = %cancelled.model_name, "Pull task cancelled");
        self.notify_callbacks(&cancelled);
        self.persist();
        true
    }

    /// Record a progress payload for a task
    ///
    /// The task record always takes the payload (augmented with best-effort
    /// disk-space telemetry) and a fresh `last_progress_update`; the throttle
    /// decides whether this update also fans out to callbacks and persists
    /// the table. Never changes the task's status — in particular, updates
    /// arriving after cancellation cannot resurrect a task.
    ///
    /// Returns false if the task is unknown.
    pub fn update_progress(&self, task_id: &str, mut payload: serde_json::Value) -> bool {
        crate::utils::augment_with_disk_telemetry(&mut payload, self.inner.store.root());

        let now = Utc::now();
        let emitted = {
            let Ok(mut tasks) = self.inner.tasks.lock() else {
                return false;
            };
            let Some(task) = tasks.get_mut(task_id) else {
                return false;
            };

            let decision = throttle::decide(&self.inner.config, task, &payload, now);
            task.progress = Some(payload);
            task.last_progress_update = Some(now);

            if decision.emit {
                task.last_emit_time = Some(now);
                if decision.percent.is_some() {
                    task.last_emitted_percent = decision.percent;
                }
                Some(task.clone())
            } else {
                None
            }
        };

        // Emission and persistence happen outside the map lock
        if let Some(task) = emitted {
            self.notify_callbacks(&task);
            self.persist();
        }
        true
    }

    /// Bump the retry bookkeeping; used as the retry helper's `on_retry` hook
    pub(crate) fn record_retry(&self, task_id: &str) {
        if let Ok(mut tasks) = self.inner.tasks.lock()
            && let Some(task) = tasks.get_mut(task_id)
        {
            task.retry_count += 1;
            task.last_retry_at = Some(Utc::now());
        }
        self.persist();
    }

    /// Register a progress callback for a task; returns false if unknown
    pub fn subscribe(&self, task_id: &str, callback: ProgressCallback) -> bool {
        {
            let Ok(tasks) = self.inner.tasks.lock() else {
                return false;
            };
            if !tasks.contains_key(task_id) {
                return false;
            }
        }
        if let Ok(mut callbacks) = self.inner.callbacks.lock() {
            callbacks
                .entry(task_id.to_string())
                .or_default()
                .push(callback);
        }
        true
    }

    /// Snapshot of one task
    pub fn get(&self, task_id: &str) -> Option<PullTask> {
        self.inner.tasks.lock().ok()?.get(task_id).cloned()
    }

    /// Snapshot of all tasks, newest first
    pub fn list(&self) -> Vec<PullTask> {
        let mut tasks: Vec<PullTask> = match self.inner.tasks.lock() {
            Ok(tasks) => tasks.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Apply the terminal rules after a worker finished
    fn finish(&self, task_id: &str, result: Result<()>) {
        let finished = {
            let Ok(mut tasks) = self.inner.tasks.lock() else {
                return;
            };
            let Some(task) = tasks.get_mut(task_id) else {
                return;
            };

            // A terminal status set while the worker was still unwinding
            // (cancellation, stale-task forcing) wins over whatever the
            // worker returned
            if task.status.is_terminal() {
                if task.completed_at.is_none() {
                    task.completed_at = Some(Utc::now());
                }
                task.clone()
            } else {
                match &result {
                    Ok(()) => {
                        task.status = TaskStatus::Completed;
                    }
                    Err(e) => {
                        task.status = TaskStatus::Error;
                        task.error = Some(e.to_string());
                    }
                }
                task.completed_at = Some(Utc::now());
                task.clone()
            }
        };

        match finished.status {
            TaskStatus::Completed => {
                tracing::info!(task_id = %task_id, model = %finished.model_name, "Pull completed");
            }
            TaskStatus::Cancelled => {
                tracing::info!(task_id = %task_id, "Pull worker exited after cancellation");
            }
            _ => {
                tracing::error!(
                    task_id = %task_id,
                    model = %finished.model_name,
                    error = finished.error.as_deref().unwrap_or("unknown"),
                    "Pull failed"
                );
            }
        }

        // Terminal updates bypass the throttle so listeners always see them
        self.notify_callbacks(&finished);
        self.persist();

        if finished.status == TaskStatus::Error && result.is_err() {
            self.schedule_removal(task_id, self.inner.config.failed_cleanup_delay);
        }
    }

    /// Start the standard transfer routine for a registered model pull
    ///
    /// Convenience for `create` + `start` with the retrying registry
    /// transfer; returns the new task id.
    pub fn pull(&self, model_name: &str) -> String {
        let task_id = self.create(model_name);
        self.start_transfer(&task_id);
        task_id
    }

    /// Launch the standard transfer worker for an already-registered task
    pub(crate) fn start_transfer(&self, task_id: &str) -> bool {
        let Some(task) = self.get(task_id) else {
            return false;
        };
        let manager = self.clone();
        let registry = self.registry();
        let id = task_id.to_string();
        self.start(task_id, move |token| {
            super::transfer::run_pull(manager, registry, id, task.model_name, token)
        })
    }

    /// Reload the persisted task table after a restart
    ///
    /// Tasks found `running` are reclassified as `error` ("interrupted by
    /// restart") because no partial-transfer state is recoverable; tasks found
    /// `pending` are restarted with the standard transfer routine.
    pub fn resume_persisted(&self) -> Result<()> {
        let persisted = self.inner.store.load_pull_tasks()?;
        if persisted.is_empty() {
            return Ok(());
        }

        let mut to_restart = Vec::new();
        {
            let Ok(mut tasks) = self.inner.tasks.lock() else {
                return Ok(());
            };
            for (task_id, mut task) in persisted {
                match task.status {
                    TaskStatus::Running => {
                        tracing::warn!(
                            task_id = %task_id,
                            model = %task.model_name,
                            "Found running task from previous session, marking as error"
                        );
                        task.status = TaskStatus::Error;
                        task.error = Some("interrupted by restart".to_string());
                        task.completed_at = Some(Utc::now());
                    }
                    TaskStatus::Pending => {
                        to_restart.push(task_id.clone());
                    }
                    _ => {}
                }
                tasks.insert(task_id, task);
            }
        }
        self.persist();

        for task_id in to_restart {
            tracing::info!(task_id = %task_id, "Restarting pending pull from previous session");
            self.start_transfer(&task_id);
        }
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// Fan a task snapshot out to its registered callbacks (outside any lock)
    pub(crate) fn notify_callbacks(&self, task: &PullTask) {
        let callbacks: Vec<ProgressCallback> = match self.inner.callbacks.lock() {
            Ok(map) => map.get(&task.task_id).cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        for callback in callbacks {
            callback(task);
        }
    }

    /// Persist the full task table; storage failures are logged, not fatal,
    /// so a sick disk cannot take down live transfers
    pub(crate) fn persist(&self) {
        let snapshot = match self.inner.tasks.lock() {
            Ok(tasks) => tasks.clone(),
            Err(_) => return,
        };
        if let Err(e) = self.inner.store.save_pull_tasks(&snapshot) {
            tracing::error!(error = %e, "Failed to persist pull task table");
        }
    }

    /// Remove a task (and its token/callbacks) after a delay
    pub(crate) fn schedule_removal(&self, task_id: &str, delay: std::time::Duration) {
        let manager = self.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.remove_task(&task_id);
        });
    }

    /// Drop a task from memory and from the persisted table
    pub(crate) fn remove_task(&self, task_id: &str) {
        let removed = match self.inner.tasks.lock() {
            Ok(mut tasks) => tasks.remove(task_id).is_some(),
            Err(_) => false,
        };
        if let Ok(mut tokens) = self.inner.cancel_tokens.lock() {
            tokens.remove(task_id);
        }
        if let Ok(mut callbacks) = self.inner.callbacks.lock() {
            callbacks.remove(task_id);
        }
        if removed {
            tracing::debug!(task_id = %task_id, "Pull task removed");
            self.persist();
        }
    }
}
