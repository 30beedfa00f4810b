//! Experiment state, iteration driver and the thread-to-async bridge
//!
//! Organized by concern:
//! - [`state`] - The authoritative in-memory record of a running experiment
//! - [`bus`] - The per-experiment event queue feeding the stream relay
//! - [`driver`] - The iteration state machine, watchdogs and the terminal
//!   notification guarantee
//!
//! The `ExperimentManager` holds every live run behind a single mutex-guarded
//! map (no module-level shared state); the driver task for a run is its only
//! writer.

mod bus;
mod driver;
mod state;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ExperimentsConfig;
use crate::error::{Error, ExperimentError, Result};
use crate::producer::ConversationProducer;
use crate::store::FileStore;
use crate::types::{
    Experiment, ExperimentId, ExperimentIndexEntry, ExperimentStatus, NewExperiment, StreamFrame,
};
use bus::EventQueue;
use state::ExperimentState;

/// One live (or finished-but-retained) run
pub(crate) struct RunHandle {
    pub(crate) state: Arc<Mutex<ExperimentState>>,
    pub(crate) events: EventQueue,
    pub(crate) cancel: CancellationToken,
    /// The terminal-once gate: whoever swaps this first sends the single
    /// terminal notification
    pub(crate) terminal_sent: Arc<AtomicBool>,
}

/// Manager for experiment runs (cloneable handle)
#[derive(Clone)]
pub struct ExperimentManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    pub(crate) runs: Mutex<HashMap<String, RunHandle>>,
    pub(crate) store: FileStore,
    pub(crate) producer: Arc<dyn ConversationProducer>,
    pub(crate) config: ExperimentsConfig,
}

impl ExperimentManager {
    /// Create a manager over the given store and conversation producer
    pub fn new(
        store: FileStore,
        producer: Arc<dyn ConversationProducer>,
        config: ExperimentsConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                runs: Mutex::new(HashMap::new()),
                store,
                producer,
                config,
            }),
        }
    }

    /// Validate a request, persist the new experiment, and start its run
    pub fn create_and_start(&self, request: NewExperiment) -> Result<Experiment> {
        let mut experiment = request.into_experiment()?;
        self.inner.store.save_experiment(&mut experiment)?;
        let id = experiment.id.clone();

        {
            let mut runs = self.runs_lock()?;
            runs.insert(
                id.to_string(),
                RunHandle {
                    state: Arc::new(Mutex::new(ExperimentState::new(experiment.clone()))),
                    events: EventQueue::new(),
                    cancel: CancellationToken::new(),
                    terminal_sent: Arc::new(AtomicBool::new(false)),
                },
            );
        }

        tracing::info!(
            experiment_id = %id,
            agents = experiment.agents.len(),
            iterations = experiment.iterations,
            "Experiment created, starting run"
        );
        self.spawn_run(id);
        Ok(experiment)
    }

    /// Current record of an experiment: live in-memory state when a run
    /// exists, the persisted record otherwise
    pub fn get(&self, id: &ExperimentId) -> Result<Experiment> {
        if let Ok(runs) = self.runs_lock()
            && let Some(handle) = runs.get(id.as_str())
            && let Ok(state) = handle.state.lock()
        {
            return Ok(state.experiment());
        }
        self.inner.store.get_experiment(id)
    }

    /// Slim listing of all experiments
    pub fn list(&self) -> Result<Vec<ExperimentIndexEntry>> {
        self.inner.store.list_experiments()
    }

    /// Request cooperative cancellation of a running experiment
    pub fn cancel(&self, id: &ExperimentId) -> Result<()> {
        {
            let runs = self.runs_lock()?;
            if let Some(handle) = runs.get(id.as_str()) {
                if handle.terminal_sent.load(Ordering::SeqCst) {
                    let status = handle
                        .state
                        .lock()
                        .map(|s| s.status())
                        .unwrap_or(ExperimentStatus::Error);
                    return Err(Error::Experiment(ExperimentError::AlreadyTerminal {
                        id: id.to_string(),
                        status: status.as_str().to_string(),
                    }));
                }
                tracing::info!(experiment_id = %id, "Cancellation requested");
                handle.cancel.cancel();
                return Ok(());
            }
        }

        // No live run: the experiment either never started here or predates
        // this process
        let experiment = self.inner.store.get_experiment(id)?;
        if experiment.status.is_terminal() {
            return Err(Error::Experiment(ExperimentError::AlreadyTerminal {
                id: id.to_string(),
                status: experiment.status.as_str().to_string(),
            }));
        }
        Err(Error::Experiment(ExperimentError::NotRunning {
            id: id.to_string(),
        }))
    }

    /// Delete an experiment and all of its snapshots
    ///
    /// A live run is cancelled first; its handle is dropped so late events
    /// from a still-unwinding worker go nowhere.
    pub fn delete(&self, id: &ExperimentId) -> Result<()> {
        if let Ok(mut runs) = self.runs_lock()
            && let Some(handle) = runs.remove(id.as_str())
        {
            handle.cancel.cancel();
        }
        self.inner.store.delete_experiment(id)
    }

    /// Hand out the stream receiver for an experiment (single consumer)
    ///
    /// Returns `Err(NotFound)` for unknown experiments and `Ok(None)` when a
    /// consumer already took the stream or the run predates this process.
    pub(crate) fn take_stream(
        &self,
        id: &ExperimentId,
    ) -> Result<Option<mpsc::UnboundedReceiver<StreamFrame>>> {
        {
            let mut runs = self.runs_lock()?;
            if let Some(handle) = runs.get_mut(id.as_str()) {
                return Ok(handle.events.take_receiver());
            }
        }
        // Known on disk but with no live run: stream in poll-only mode
        self.inner.store.get_experiment(id)?;
        Ok(None)
    }

    /// The terminal status frame for an experiment, if it is terminal
    pub(crate) fn terminal_frame(&self, id: &ExperimentId) -> Result<Option<StreamFrame>> {
        let experiment = self.get(id)?;
        if !experiment.status.is_terminal() {
            return Ok(None);
        }
        Ok(Some(StreamFrame::final_status(serde_json::json!({
            "id": experiment.id,
            "status": experiment.status,
            "current_iteration": experiment.current_iteration,
            "iterations": experiment.iterations,
            "error": experiment.error,
        }))))
    }

    /// Stream poll interval for relays
    pub(crate) fn poll_interval(&self) -> std::time::Duration {
        self.inner.config.stream_poll_interval
    }

    /// Reclassify experiments left non-terminal by a previous process
    ///
    /// Runs cannot be resumed mid-conversation, so anything persisted as
    /// `pending` or `running` at startup becomes `error` ("interrupted by
    /// restart").
    pub fn fail_interrupted(&self) -> Result<usize> {
        let mut failed = 0;
        for entry in self.inner.store.list_experiments()? {
            if matches!(
                entry.status,
                ExperimentStatus::Pending | ExperimentStatus::Running
            ) {
                tracing::warn!(
                    experiment_id = %entry.id,
                    "Found non-terminal experiment from previous session, marking as error"
                );
                self.inner.store.update_experiment(
                    &entry.id,
                    &serde_json::json!({
                        "status": "error",
                        "error": "interrupted by restart",
                        "completed_at": Utc::now(),
                    }),
                )?;
                failed += 1;
            }
        }
        Ok(failed)
    }

    /// Number of runs that have not yet reached a terminal status
    pub fn active_runs(&self) -> usize {
        self.runs_lock()
            .map(|runs| {
                runs.values()
                    .filter(|handle| !handle.terminal_sent.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Cancel every live run (graceful shutdown)
    pub fn shutdown(&self) {
        let Ok(runs) = self.runs_lock() else {
            return;
        };
        tracing::info!(active = runs.len(), "Signaling experiment runs to stop");
        for handle in runs.values() {
            handle.cancel.cancel();
        }
    }

    // ── Internals ───────────────────────────────────────────────────────

    pub(crate) fn runs_lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, RunHandle>>> {
        self.inner.runs.lock().map_err(|_| {
            Error::Storage(crate::error::StorageError::LockFailed {
                resource: "experiment runs".to_string(),
                reason: "mutex poisoned".to_string(),
            })
        })
    }

    /// Post a frame onto an experiment's queue (no-op if the run is gone)
    pub(crate) fn post(&self, id: &ExperimentId, frame: StreamFrame) {
        if let Ok(runs) = self.runs_lock()
            && let Some(handle) = runs.get(id.as_str())
        {
            handle.events.post(frame);
        }
    }

    /// Persist the live state of a run (experiment.json + index entry)
    pub(crate) fn persist_state(&self, id: &ExperimentId) -> Result<()> {
        let experiment = {
            let runs = self.runs_lock()?;
            let handle = runs
                .get(id.as_str())
                .ok_or_else(|| Error::NotFound(format!("experiment {id}")))?;
            let state = handle.state.lock().map_err(|_| {
                Error::Storage(crate::error::StorageError::LockFailed {
                    resource: format!("experiment {id}"),
                    reason: "state mutex poisoned".to_string(),
                })
            })?;
            state.experiment()
        };
        let mut experiment = experiment;
        self.inner.store.save_experiment(&mut experiment)
    }
}
