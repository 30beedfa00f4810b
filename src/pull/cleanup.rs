//! Stale-task detection and retention-based cleanup

use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::PullManager;
use crate::types::TaskStatus;

impl PullManager {
    /// Force `running` tasks with no progress update for longer than
    /// `threshold` into `error` and schedule their removal
    ///
    /// Returns the number of tasks forced.
    pub fn cleanup_stale(&self, threshold: Duration) -> usize {
        let now = Utc::now();
        let mut forced = Vec::new();

        {
            let Ok(mut tasks) = self.inner.tasks.lock() else {
                return 0;
            };
            for task in tasks.values_mut() {
                if task.status != TaskStatus::Running {
                    continue;
                }
                // A worker that never reported at all is judged from its start
                let last_sign_of_life = task
                    .last_progress_update
                    .or(task.started_at)
                    .unwrap_or(task.created_at);
                let silent_for = now
                    .signed_duration_since(last_sign_of_life)
                    .to_std()
                    .unwrap_or_default();

                if silent_for >= threshold {
                    task.status = TaskStatus::Error;
                    task.error = Some("no progress updates received".to_string());
                    task.completed_at = Some(now);
                    forced.push(task.clone());
                }
            }
        }

        if forced.is_empty() {
            return 0;
        }

        for task in &forced {
            tracing::warn!(
                task_id = %task.task_id,
                model = %task.model_name,
                "Forcing stale pull task to error"
            );
            if let Ok(tokens) = self.inner.cancel_tokens.lock()
                && let Some(token) = tokens.get(&task.task_id)
            {
                token.cancel();
            }
            self.notify_callbacks(task);
            self.schedule_removal(&task.task_id, self.inner.config.failed_cleanup_delay);
        }
        self.persist();
        forced.len()
    }

    /// Remove terminal tasks whose age since `completed_at` exceeds the
    /// per-status retention window
    ///
    /// Returns the number of tasks removed.
    pub fn cleanup_completed(&self) -> usize {
        let now = Utc::now();
        let config = &self.inner.config;
        let mut removed = Vec::new();

        {
            let Ok(mut tasks) = self.inner.tasks.lock() else {
                return 0;
            };
            tasks.retain(|task_id, task| {
                let Some(completed_at) = task.completed_at else {
                    return true;
                };
                let retention = match task.status {
                    TaskStatus::Completed => config.completed_retention,
                    TaskStatus::Error => config.error_retention,
                    TaskStatus::Cancelled => config.cancelled_retention,
                    _ => return true,
                };
                let age = now
                    .signed_duration_since(completed_at)
                    .to_std()
                    .unwrap_or_default();
                if age >= retention {
                    removed.push(task_id.clone());
                    false
                } else {
                    true
                }
            });
        }

        if removed.is_empty() {
            return 0;
        }

        if let Ok(mut tokens) = self.inner.cancel_tokens.lock() {
            for task_id in &removed {
                tokens.remove(task_id);
            }
        }
        if let Ok(mut callbacks) = self.inner.callbacks.lock() {
            for task_id in &removed {
                callbacks.remove(task_id);
            }
        }

        tracing::debug!(count = removed.len(), "Removed expired pull tasks");
        self.persist();
        removed.len()
    }

    /// Spawn the periodic cleanup worker
    ///
    /// Runs stale detection and retention cleanup every
    /// `config.cleanup_interval` until the shutdown token fires.
    pub fn spawn_cleanup_worker(
        &self,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let period = self.inner.config.cleanup_interval;
        let stale_after = self.inner.config.stale_after;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        manager.cleanup_stale(stale_after);
                        manager.cleanup_completed();
                    }
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Pull cleanup worker stopping");
                        break;
                    }
                }
            }
        })
    }
}
