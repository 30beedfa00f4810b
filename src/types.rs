//! Core types for agenthub

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{AgentError, Error, Result};

/// Unique identifier for an experiment
///
/// Experiment ids are opaque strings. They are assigned by the file store on
/// first save (a v4 UUID) but any non-empty string supplied by an embedder is
/// accepted.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ExperimentId(pub String);

impl ExperimentId {
    /// Create a new ExperimentId from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ExperimentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ExperimentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Experiment lifecycle status
///
/// Transitions only move forward, with the single exception of
/// `Running -> Running` which advances to the next iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    /// Created but not yet started
    Pending,
    /// An iteration is in progress
    Running,
    /// All iterations finished successfully
    Completed,
    /// Failed with an error (including watchdog timeouts)
    Error,
    /// Cancelled by the user
    Cancelled,
}

impl ExperimentStatus {
    /// Whether this status is terminal (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExperimentStatus::Completed | ExperimentStatus::Error | ExperimentStatus::Cancelled
        )
    }

    /// Whether a transition from `self` to `to` is allowed
    pub fn can_transition(&self, to: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        match (self, to) {
            // Pending may start, fail before starting, or be cancelled
            (Pending, Running) | (Pending, Error) | (Pending, Cancelled) => true,
            // Running -> Running is the next-iteration transition
            (Running, Running) | (Running, Completed) | (Running, Error) | (Running, Cancelled) => {
                true
            }
            _ => false,
        }
    }

    /// Lowercase wire representation (matches the serde encoding)
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Pending => "pending",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Error => "error",
            ExperimentStatus::Cancelled => "cancelled",
        }
    }
}

/// Pull task lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Registered but not yet started
    Pending,
    /// Transfer in progress
    Running,
    /// Transfer finished successfully
    Completed,
    /// Transfer failed
    Error,
    /// Cancelled by the user (or forced by stale-task cleanup)
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal; terminal tasks are only ever removed
    /// by retention cleanup, never resurrected
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled
        )
    }

    /// Lowercase wire representation (matches the serde encoding)
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Configuration for one agent participating in an experiment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AgentConfig {
    /// Display name, unique within the experiment
    pub name: String,

    /// Display color hint for UIs (e.g. "#e07a5f")
    #[serde(default)]
    pub color: Option<String>,

    /// Model the agent speaks with (registry model name)
    pub model: String,
}

/// The task an experiment runs: a prompt, optionally varied per iteration by
/// dataset items
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExperimentTask {
    /// Base prompt for the conversation
    pub prompt: String,

    /// Optional dataset items; iteration `i` uses item `i - 1` when present,
    /// falling back to the base prompt
    #[serde(default)]
    pub dataset: Vec<String>,
}

impl ExperimentTask {
    /// The prompt to use for a 1-based iteration number
    pub fn prompt_for(&self, iteration: u32) -> &str {
        self.dataset
            .get(iteration.saturating_sub(1) as usize)
            .map(String::as_str)
            .unwrap_or(&self.prompt)
    }
}

/// One message in a conversation transcript
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    /// Name of the agent that produced the message
    pub agent: String,

    /// Message content
    pub content: String,

    /// Model that generated the content
    pub model: String,

    /// When the message was produced
    pub timestamp: DateTime<Utc>,
}

/// A full experiment record
///
/// This is both the durable on-disk representation (`experiment.json`) and the
/// in-memory working state of a run. `messages` holds the current-iteration
/// transcript only; completed iterations live in `conversations`.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Experiment {
    /// Opaque experiment id (assigned on first save if empty)
    pub id: ExperimentId,

    /// Human-readable title (shown in listings)
    pub title: String,

    /// The task being run
    pub task: ExperimentTask,

    /// Participating agents, in speaking order
    pub agents: Vec<AgentConfig>,

    /// Current lifecycle status
    pub status: ExperimentStatus,

    /// Planned number of iterations
    pub iterations: u32,

    /// Iteration currently (or last) in progress; 0 before the first starts.
    /// Invariant: `current_iteration <= iterations`
    pub current_iteration: u32,

    /// Transcript of the current iteration (cleared at each iteration start)
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Snapshots of completed iterations, in iteration order
    #[serde(default)]
    pub conversations: Vec<ConversationSnapshot>,

    /// When the experiment was created
    pub created_at: DateTime<Utc>,

    /// When the experiment reached a terminal status
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Error message, when status is `error`
    #[serde(default)]
    pub error: Option<String>,
}

impl Experiment {
    /// Slim index projection of this experiment
    pub fn index_entry(&self) -> ExperimentIndexEntry {
        ExperimentIndexEntry {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            status: self.status,
        }
    }
}

/// Request payload for creating an experiment
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct NewExperiment {
    /// Optional title; derived from the prompt when absent
    #[serde(default)]
    pub title: Option<String>,

    /// The task to run
    pub task: ExperimentTask,

    /// Participating agents (at least one required)
    pub agents: Vec<AgentConfig>,

    /// Number of iterations (defaults to the dataset length, or 1)
    #[serde(default)]
    pub iterations: Option<u32>,
}

impl NewExperiment {
    /// Validate the request and resolve defaults into a concrete [`Experiment`]
    /// in `pending` state (id and created_at assigned by the file store)
    pub fn into_experiment(self) -> Result<Experiment> {
        if self.agents.is_empty() {
            return Err(Error::Agent(AgentError::NoneConfigured));
        }
        for (i, agent) in self.agents.iter().enumerate() {
            if agent.name.trim().is_empty() {
                return Err(Error::Agent(AgentError::MissingField {
                    agent: format!("#{}", i + 1),
                    field: "name".to_string(),
                }));
            }
            if agent.model.trim().is_empty() {
                return Err(Error::Agent(AgentError::MissingField {
                    agent: agent.name.clone(),
                    field: "model".to_string(),
                }));
            }
        }
        if self.task.prompt.trim().is_empty() && self.task.dataset.is_empty() {
            return Err(Error::Validation(
                "task requires a prompt or dataset items".to_string(),
            ));
        }

        let iterations = match self.iterations {
            Some(0) => {
                return Err(Error::Validation("iterations must be >= 1".to_string()));
            }
            Some(n) => n,
            None if !self.task.dataset.is_empty() => self.task.dataset.len() as u32,
            None => 1,
        };

        let title = self.title.unwrap_or_else(|| {
            // Default title: leading words of the prompt
            let prompt = if self.task.prompt.trim().is_empty() {
                self.task.dataset.first().map(String::as_str).unwrap_or("")
            } else {
                &self.task.prompt
            };
            let mut title: String = prompt.chars().take(60).collect();
            if prompt.chars().count() > 60 {
                title.push('…');
            }
            title
        });

        Ok(Experiment {
            id: ExperimentId::new(""),
            title,
            task: self.task,
            agents: self.agents,
            status: ExperimentStatus::Pending,
            iterations,
            current_iteration: 0,
            messages: Vec::new(),
            conversations: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        })
    }
}

/// Immutable transcript of one completed iteration
///
/// One file per (experiment, iteration) pair; a new iteration never overwrites
/// a prior snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ConversationSnapshot {
    /// Deterministic composite id: `{experiment_id}_{iteration}`
    pub id: String,

    /// The experiment this iteration belongs to
    pub experiment_id: ExperimentId,

    /// 1-based iteration number
    pub iteration: u32,

    /// Display title
    pub title: String,

    /// Agents that spoke in this iteration
    pub agents: Vec<AgentConfig>,

    /// Ordered transcript, append-only within the iteration
    pub messages: Vec<Message>,

    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
}

impl ConversationSnapshot {
    /// Build the composite id for an (experiment, iteration) pair
    pub fn composite_id(experiment_id: &ExperimentId, iteration: u32) -> String {
        format!("{}_{}", experiment_id, iteration)
    }
}

/// A free-standing conversation not tied to an experiment
///
/// Unlike snapshots these are mutable via explicit update.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ImportedConversation {
    /// Generated identifier (v4 UUID, assigned on save if empty)
    pub id: String,

    /// Display title
    pub title: String,

    /// Agents appearing in the transcript
    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    /// Conversation transcript
    #[serde(default)]
    pub messages: Vec<Message>,

    /// When the conversation was imported
    pub created_at: DateTime<Utc>,

    /// When the conversation was last updated
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A background model-download task
///
/// Owned by the [`PullManager`](crate::pull::PullManager) while active; the
/// full task table is persisted to `pull_tasks.json` on every meaningful
/// change so that a restart can classify interrupted work.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PullTask {
    /// Unique task id
    pub task_id: String,

    /// Model being downloaded (registry model name)
    pub model_name: String,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Last-known progress payload from the registry (opaque JSON, augmented
    /// with disk-space telemetry)
    #[serde(default)]
    #[schema(value_type = Object)]
    pub progress: Option<serde_json::Value>,

    /// Error message, when status is `error`
    #[serde(default)]
    pub error: Option<String>,

    /// When the task was registered
    pub created_at: DateTime<Utc>,

    /// When the worker started
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal status
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// When the last progress payload arrived (stale-task detection)
    #[serde(default)]
    pub last_progress_update: Option<DateTime<Utc>>,

    /// Number of transfer retries performed
    #[serde(default)]
    pub retry_count: u32,

    /// When the last retry was scheduled
    #[serde(default)]
    pub last_retry_at: Option<DateTime<Utc>>,

    /// Throttle bookkeeping: when the last progress emission happened
    #[serde(default)]
    pub last_emit_time: Option<DateTime<Utc>>,

    /// Throttle bookkeeping: percent value at the last emission
    #[serde(default)]
    pub last_emitted_percent: Option<f64>,
}

impl PullTask {
    /// Create a fresh pending task
    pub fn new(task_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            model_name: model_name.into(),
            status: TaskStatus::Pending,
            progress: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_progress_update: None,
            retry_count: 0,
            last_retry_at: None,
            last_emit_time: None,
            last_emitted_percent: None,
        }
    }
}

/// Slim projection of an [`Experiment`] used for fast listing
///
/// The index is a cache: always reconstructible by scanning per-experiment
/// files, never the sole source of truth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExperimentIndexEntry {
    /// Experiment id
    pub id: ExperimentId,

    /// Experiment title
    pub title: String,

    /// Creation timestamp (index is sorted by this, descending)
    pub created_at: DateTime<Utc>,

    /// Last persisted status
    pub status: ExperimentStatus,
}

/// Kind discriminator for streaming frames
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Experiment status change
    Status,
    /// A new transcript message
    Message,
    /// A completed-iteration snapshot
    Conversation,
}

/// One frame on the streaming connection
///
/// Serialized as `{"type": "...", "data": {...}}`; terminal status frames
/// additionally carry `"final": true` and `"close_connection": true`.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StreamFrame {
    /// Frame kind
    #[serde(rename = "type")]
    pub kind: FrameKind,

    /// Frame payload
    #[schema(value_type = Object)]
    pub data: serde_json::Value,

    /// Set on the single terminal status frame of a run
    #[serde(rename = "final", default, skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,

    /// Signals that the server is about to close the connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_connection: Option<bool>,
}

impl StreamFrame {
    /// A non-terminal status frame
    pub fn status(data: serde_json::Value) -> Self {
        Self {
            kind: FrameKind::Status,
            data,
            is_final: None,
            close_connection: None,
        }
    }

    /// The terminal status frame; exactly one is sent per run
    pub fn final_status(data: serde_json::Value) -> Self {
        Self {
            kind: FrameKind::Status,
            data,
            is_final: Some(true),
            close_connection: Some(true),
        }
    }

    /// A transcript-message frame
    pub fn message(message: &Message) -> Self {
        Self {
            kind: FrameKind::Message,
            data: serde_json::json!(message),
            is_final: None,
            close_connection: None,
        }
    }

    /// A completed-iteration snapshot frame
    pub fn conversation(snapshot: &ConversationSnapshot) -> Self {
        Self {
            kind: FrameKind::Conversation,
            data: serde_json::json!(snapshot),
            is_final: None,
            close_connection: None,
        }
    }

    /// Whether this frame terminates the stream
    pub fn is_terminal(&self) -> bool {
        self.is_final == Some(true)
    }
}
