//! Authoritative in-memory state for a running experiment
//!
//! All mutation during a run funnels through the small method set here, so
//! there is a single path that must remain consistent with what gets
//! persisted. The manager wraps this in a mutex and additionally guarantees a
//! single writer per experiment id by construction (one driver task per run).

use chrono::Utc;

use crate::error::{Error, ExperimentError, Result};
use crate::types::{
    ConversationSnapshot, Experiment, ExperimentStatus, Message,
};

pub(crate) struct ExperimentState {
    experiment: Experiment,
}

impl ExperimentState {
    pub(crate) fn new(experiment: Experiment) -> Self {
        Self { experiment }
    }

    /// Snapshot of the full experiment record
    pub(crate) fn experiment(&self) -> Experiment {
        self.experiment.clone()
    }

    pub(crate) fn status(&self) -> ExperimentStatus {
        self.experiment.status
    }

    /// Enter `running` for the given 1-based iteration, clearing the
    /// per-iteration transcript
    pub(crate) fn begin_iteration(&mut self, iteration: u32) -> Result<()> {
        if iteration > self.experiment.iterations {
            return Err(Error::Experiment(ExperimentError::IterationOverflow {
                id: self.experiment.id.to_string(),
                iteration,
                planned: self.experiment.iterations,
            }));
        }
        if !self
            .experiment
            .status
            .can_transition(ExperimentStatus::Running)
        {
            return Err(Error::Experiment(ExperimentError::InvalidTransition {
                id: self.experiment.id.to_string(),
                from: self.experiment.status.as_str().to_string(),
                to: ExperimentStatus::Running.as_str().to_string(),
            }));
        }

        self.experiment.status = ExperimentStatus::Running;
        self.experiment.current_iteration = iteration;
        self.experiment.messages.clear();
        Ok(())
    }

    /// Append one message to the current-iteration transcript
    pub(crate) fn append_message(&mut self, message: Message) {
        self.experiment.messages.push(message);
    }

    /// Record a completed-iteration snapshot
    pub(crate) fn push_snapshot(&mut self, snapshot: ConversationSnapshot) {
        self.experiment.conversations.push(snapshot);
    }

    /// Force a terminal status
    ///
    /// Transition validity is not re-checked here: the caller (the terminal
    /// gate in the manager) guarantees this runs at most once per run, and
    /// watchdogs must be able to force `error` unconditionally.
    pub(crate) fn set_terminal(&mut self, status: ExperimentStatus, error: Option<String>) {
        self.experiment.status = status;
        self.experiment.completed_at = Some(Utc::now());
        self.experiment.error = error;
    }

    /// Build the immutable snapshot of the current iteration's transcript
    pub(crate) fn take_snapshot(&self) -> Result<ConversationSnapshot> {
        let iteration = self.experiment.current_iteration;
        if iteration == 0 {
            return Err(Error::Experiment(ExperimentError::NotRunning {
                id: self.experiment.id.to_string(),
            }));
        }
        Ok(ConversationSnapshot {
            id: ConversationSnapshot::composite_id(&self.experiment.id, iteration),
            experiment_id: self.experiment.id.clone(),
            iteration,
            title: format!("{} — iteration {iteration}", self.experiment.title),
            agents: self.experiment.agents.clone(),
            messages: self.experiment.messages.clone(),
            created_at: Utc::now(),
        })
    }

    /// Payload for status frames on the stream
    pub(crate) fn status_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.experiment.id,
            "status": self.experiment.status,
            "current_iteration": self.experiment.current_iteration,
            "iterations": self.experiment.iterations,
            "error": self.experiment.error,
        })
    }
}
