//! Error types for agenthub
//!
//! This module provides comprehensive error handling for the library, including:
//! - Domain-specific error types (Experiment, Conversation, Agent, Storage)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes
//! - Context information (experiment id, operation, file path, etc.)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for agenthub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for agenthub
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input supplied by the caller (user-correctable)
    #[error("validation error: {0}")]
    Validation(String),

    /// Experiment, conversation or task not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Experiment-level domain rule violation
    #[error("experiment error: {0}")]
    Experiment(#[from] ExperimentError),

    /// Conversation-level domain rule violation
    #[error("conversation error: {0}")]
    Conversation(#[from] ConversationError),

    /// Agent configuration problem
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    /// Durable storage failure (I/O or lock)
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Model registry reported an application-level error
    #[error("registry error: {0}")]
    Registry(String),

    /// Network error talking to the model registry
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new work")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Experiment domain errors
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// Requested status transition is not allowed
    #[error("experiment {id}: invalid status transition {from} -> {to}")]
    InvalidTransition {
        /// Experiment id
        id: String,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Iteration counter would exceed the planned iteration count
    #[error("experiment {id}: iteration {iteration} exceeds planned count {planned}")]
    IterationOverflow {
        /// Experiment id
        id: String,
        /// Requested iteration
        iteration: u32,
        /// Planned iteration count
        planned: u32,
    },

    /// Experiment already reached a terminal status
    #[error("experiment {id} is already {status}")]
    AlreadyTerminal {
        /// Experiment id
        id: String,
        /// Terminal status the experiment is in
        status: String,
    },

    /// Operation requires a live run but none exists
    #[error("experiment {id} is not running")]
    NotRunning {
        /// Experiment id
        id: String,
    },
}

/// Conversation domain errors
#[derive(Debug, Error)]
pub enum ConversationError {
    /// A snapshot for this (experiment, iteration) pair already exists
    #[error("snapshot {id} already exists and is immutable")]
    SnapshotExists {
        /// Composite snapshot id
        id: String,
    },

    /// Update target is not an imported conversation
    #[error("conversation {id} is not an imported conversation")]
    NotImported {
        /// Conversation id
        id: String,
    },
}

/// Agent configuration errors
#[derive(Debug, Error)]
pub enum AgentError {
    /// An experiment needs at least one agent
    #[error("experiment requires at least one agent")]
    NoneConfigured,

    /// Agent definition is missing a required field
    #[error("agent '{agent}' is missing a {field}")]
    MissingField {
        /// Agent name (or ordinal if the name itself is missing)
        agent: String,
        /// The missing field
        field: String,
    },
}

/// Durable storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to write a file (atomic write aborted, temp file removed)
    #[error("failed to write {path}: {reason}")]
    WriteFailed {
        /// Target path of the failed write
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Failed to read a file
    #[error("failed to read {path}: {reason}")]
    ReadFailed {
        /// Path of the failed read
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Failed to acquire a resource lock
    #[error("failed to lock {resource}: {reason}")]
    LockFailed {
        /// Resource whose lock could not be acquired
        resource: String,
        /// Underlying failure
        reason: String,
    },

    /// A persisted record did not match the expected schema
    #[error("invalid record at {path}: {reason}")]
    InvalidRecord {
        /// Path of the malformed record
        path: PathBuf,
        /// Parse/validation failure
        reason: String,
    },
}

/// API error response format
///
/// This structure is returned by API endpoints when an error occurs.
/// It follows a standard format with machine-readable error codes,
/// human-readable messages, and optional contextual details.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "experiment abc123 not found",
///     "details": {
///       "experiment_id": "abc123"
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    ///
    /// Clients can use this for programmatic error handling.
    pub code: String,

    /// Human-readable error message
    ///
    /// This is suitable for displaying to end users.
    pub message: String,

    /// Optional additional context about the error
    ///
    /// This can include fields like experiment_id, file paths, validation errors, etc.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
///
/// This trait maps domain errors to appropriate HTTP status codes.
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Validation(_) => 400,
            Error::Agent(_) => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 409 Conflict - Domain rule violations over resource state
            Error::Experiment(ExperimentError::InvalidTransition { .. }) => 409,
            Error::Experiment(ExperimentError::AlreadyTerminal { .. }) => 409,
            Error::Experiment(ExperimentError::NotRunning { .. }) => 409,
            Error::Conversation(ConversationError::SnapshotExists { .. }) => 409,
            Error::Conversation(ConversationError::NotImported { .. }) => 409,

            // 422 Unprocessable Entity - Semantic errors
            Error::Experiment(ExperimentError::IterationOverflow { .. }) => 422,

            // 500 Internal Server Error - Server-side issues
            Error::Storage(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - External service errors
            Error::Registry(_) => 502,
            Error::Network(_) => 502,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::NotFound(_) => "not_found",
            Error::Experiment(e) => match e {
                ExperimentError::InvalidTransition { .. } => "invalid_transition",
                ExperimentError::IterationOverflow { .. } => "iteration_overflow",
                ExperimentError::AlreadyTerminal { .. } => "already_terminal",
                ExperimentError::NotRunning { .. } => "not_running",
            },
            Error::Conversation(e) => match e {
                ConversationError::SnapshotExists { .. } => "snapshot_exists",
                ConversationError::NotImported { .. } => "not_imported",
            },
            Error::Agent(e) => match e {
                AgentError::NoneConfigured => "no_agents",
                AgentError::MissingField { .. } => "invalid_agent",
            },
            Error::Storage(_) => "storage_error",
            Error::Registry(_) => "registry_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Io(_) => "io_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        // Add contextual details for specific error types
        let details = match &error {
            Error::Experiment(ExperimentError::InvalidTransition { id, from, to }) => {
                Some(serde_json::json!({
                    "experiment_id": id,
                    "from": from,
                    "to": to,
                }))
            }
            Error::Experiment(ExperimentError::IterationOverflow {
                id,
                iteration,
                planned,
            }) => Some(serde_json::json!({
                "experiment_id": id,
                "iteration": iteration,
                "planned": planned,
            })),
            Error::Experiment(ExperimentError::AlreadyTerminal { id, status }) => {
                Some(serde_json::json!({
                    "experiment_id": id,
                    "status": status,
                }))
            }
            Error::Experiment(ExperimentError::NotRunning { id }) => Some(serde_json::json!({
                "experiment_id": id,
            })),
            Error::Conversation(ConversationError::SnapshotExists { id }) => {
                Some(serde_json::json!({
                    "conversation_id": id,
                }))
            }
            Error::Storage(StorageError::WriteFailed { path, .. }) => Some(serde_json::json!({
                "path": path,
            })),
            Error::Storage(StorageError::ReadFailed { path, .. }) => Some(serde_json::json!({
                "path": path,
            })),
            Error::Storage(StorageError::LockFailed { resource, .. }) => {
                Some(serde_json::json!({
                    "resource": resource,
                }))
            }
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
