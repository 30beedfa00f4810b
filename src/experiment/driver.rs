//! The iteration driver: `pending -> running(i) -> ... -> completed | error`
//!
//! Each iteration runs the conversation producer on its own blocking thread
//! and supervises it with an optional iteration timeout; an optional
//! experiment-level watchdog bounds the whole run. Whatever happens — normal
//! completion, a producer error, a panic, a timeout, cancellation, or an
//! unexpected failure in the driver itself — exactly one terminal
//! notification reaches both storage and the stream, enforced by the
//! terminal-once gate on the run handle.

use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use super::{ExperimentManager, state::ExperimentState};
use crate::error::Result;
use crate::producer::ProducerEvent;
use crate::types::{ExperimentId, ExperimentStatus, Message, StreamFrame};

impl ExperimentManager {
    /// Launch the driver task (and the experiment-level watchdog) for a run
    pub(crate) fn spawn_run(&self, id: ExperimentId) {
        if let Some(timeout) = self.inner.config.experiment_timeout {
            let watchdog = self.clone();
            let watchdog_id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                // Idempotent through the terminal gate: a completed run
                // makes this a no-op
                watchdog.finish_run(
                    &watchdog_id,
                    ExperimentStatus::Error,
                    Some("timeout".to_string()),
                );
            });
        }

        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.drive(&id).await {
                // Finally-style fallback: no other code path sent the
                // terminal notification, so clients must not be left waiting
                tracing::error!(experiment_id = %id, error = %e, "Run failed unexpectedly");
                manager.finish_run(&id, ExperimentStatus::Error, Some(e.to_string()));
            }
        });
    }

    /// Drive all iterations of one experiment
    ///
    /// Returns `Ok(())` once a terminal notification has been sent by this
    /// function; an `Err` means no notification went out and the caller's
    /// fallback must produce one.
    async fn drive(&self, id: &ExperimentId) -> Result<()> {
        let (state, cancel) = self.run_parts(id)?;
        let (iterations, agents, task) = {
            let state = lock_state(&state)?;
            let experiment = state.experiment();
            (experiment.iterations, experiment.agents, experiment.task)
        };

        for iteration in 1..=iterations {
            if cancel.is_cancelled() {
                self.finish_run(id, ExperimentStatus::Cancelled, None);
                return Ok(());
            }

            // Enter running(iteration): persist the status change, then
            // notify listeners
            let payload = {
                let mut state = lock_state(&state)?;
                state.begin_iteration(iteration)?;
                state.status_payload()
            };
            self.persist_state(id)?;
            self.post(id, StreamFrame::status(payload));

            // One conversation pass on a dedicated blocking thread. The
            // event sink appends to the live transcript and posts a frame;
            // both are safe from the worker thread.
            let producer = self.inner.producer.clone();
            let worker_agents = agents.clone();
            let prompt = task.prompt_for(iteration).to_string();
            let sink_state = state.clone();
            let sink_manager = self.clone();
            let sink_id = id.clone();
            let worker_cancel = cancel.clone();

            let worker = tokio::task::spawn_blocking(move || {
                let sink = move |event: ProducerEvent| {
                    let message = Message {
                        agent: event.agent,
                        content: event.content,
                        model: event.model,
                        timestamp: Utc::now(),
                    };
                    if let Ok(mut state) = sink_state.lock() {
                        state.append_message(message.clone());
                    }
                    sink_manager.post(&sink_id, StreamFrame::message(&message));
                };
                producer.run(&worker_agents, &prompt, &sink, &worker_cancel)
            });

            // Iteration watchdog: a timed join of the worker
            let joined = match self.inner.config.iteration_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, worker).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        tracing::error!(
                            experiment_id = %id,
                            iteration,
                            "Iteration exceeded its timeout, forcing error"
                        );
                        // The worker may never return; tell it to stop at its
                        // next safe point and move on without it
                        cancel.cancel();
                        self.finish_run(id, ExperimentStatus::Error, Some("timeout".to_string()));
                        return Ok(());
                    }
                },
                None => worker.await,
            };

            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(experiment_id = %id, iteration, error = %e, "Producer failed");
                    self.finish_run(id, ExperimentStatus::Error, Some(e.to_string()));
                    return Ok(());
                }
                Err(join_error) => {
                    tracing::error!(
                        experiment_id = %id,
                        iteration,
                        error = %join_error,
                        "Conversation worker panicked"
                    );
                    self.finish_run(
                        id,
                        ExperimentStatus::Error,
                        Some(format!("conversation worker panicked: {join_error}")),
                    );
                    return Ok(());
                }
            }

            if cancel.is_cancelled() {
                self.finish_run(id, ExperimentStatus::Cancelled, None);
                return Ok(());
            }

            // Freeze this iteration's transcript into its immutable snapshot
            let snapshot = {
                let state = lock_state(&state)?;
                state.take_snapshot()?
            };
            self.inner.store.save_snapshot(&snapshot)?;
            {
                let mut state = lock_state(&state)?;
                state.push_snapshot(snapshot.clone());
            }
            self.persist_state(id)?;
            self.post(id, StreamFrame::conversation(&snapshot));

            tracing::info!(
                experiment_id = %id,
                iteration,
                messages = snapshot.messages.len(),
                "Iteration complete"
            );
        }

        self.finish_run(id, ExperimentStatus::Completed, None);
        Ok(())
    }

    /// Send the run's single terminal notification: force the terminal
    /// status, persist it, then emit the final frame
    ///
    /// Safe to call from the driver, the watchdog and the fallback
    /// concurrently — the first caller through the gate wins, the rest are
    /// no-ops.
    pub(crate) fn finish_run(
        &self,
        id: &ExperimentId,
        status: ExperimentStatus,
        error: Option<String>,
    ) {
        let Ok((state, _)) = self.run_parts(id) else {
            return;
        };
        let terminal_sent = {
            let Ok(runs) = self.runs_lock() else { return };
            let Some(handle) = runs.get(id.as_str()) else {
                return;
            };
            handle.terminal_sent.clone()
        };
        if terminal_sent.swap(true, Ordering::SeqCst) {
            return;
        }

        // A worker that outlived the run (watchdog fired, user cancelled)
        // should stop at its next safe point
        if let Ok(runs) = self.runs_lock()
            && let Some(handle) = runs.get(id.as_str())
        {
            handle.cancel.cancel();
        }

        let payload = match lock_state(&state) {
            Ok(mut state) => {
                state.set_terminal(status, error);
                state.status_payload()
            }
            Err(_) => return,
        };

        if let Err(e) = self.persist_state(id) {
            tracing::error!(
                experiment_id = %id,
                error = %e,
                "Failed to persist terminal status"
            );
        }
        self.post(id, StreamFrame::final_status(payload));

        tracing::info!(experiment_id = %id, status = status.as_str(), "Run finished");
    }

    fn run_parts(
        &self,
        id: &ExperimentId,
    ) -> Result<(Arc<Mutex<ExperimentState>>, CancellationToken)> {
        let runs = self.runs_lock()?;
        let handle = runs
            .get(id.as_str())
            .ok_or_else(|| crate::error::Error::NotFound(format!("experiment {id}")))?;
        Ok((handle.state.clone(), handle.cancel.clone()))
    }
}

fn lock_state(
    state: &Arc<Mutex<ExperimentState>>,
) -> Result<std::sync::MutexGuard<'_, ExperimentState>> {
    state.lock().map_err(|_| {
        crate::error::Error::Storage(crate::error::StorageError::LockFailed {
            resource: "experiment state".to_string(),
            reason: "state mutex poisoned".to_string(),
        })
    })
}
