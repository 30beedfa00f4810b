//! # agenthub
//!
//! Backend library for running multi-agent AI experiments: long-lived
//! conversation runs streamed to clients in real time, plus background
//! downloads of the language models the agents speak with.
//!
//! ## Design Philosophy
//!
//! agenthub is designed to be:
//! - **Durable** - Every experiment, snapshot and pull task survives a
//!   process restart without corruption or silent loss
//! - **Supervised** - Watchdog timeouts guarantee every run reaches exactly
//!   one observed terminal state, however its worker ends
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Boundary-clean** - The conversation engine and the model registry are
//!   trait-shaped collaborators, not baked-in implementations
//!
//! ## Quick Start
//!
//! ```no_run
//! use agenthub::{AgentHub, Config, run_with_shutdown};
//! use agenthub::producer::{ConversationProducer, EventSink, ProducerEvent};
//! use agenthub::types::AgentConfig;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! struct MyEngine;
//!
//! impl ConversationProducer for MyEngine {
//!     fn run(
//!         &self,
//!         agents: &[AgentConfig],
//!         prompt: &str,
//!         emit: EventSink<'_>,
//!         cancel: &CancellationToken,
//!     ) -> agenthub::Result<()> {
//!         for agent in agents {
//!             if cancel.is_cancelled() {
//!                 break;
//!             }
//!             emit(ProducerEvent {
//!                 agent: agent.name.clone(),
//!                 content: format!("{} responds to: {prompt}", agent.name),
//!                 model: agent.model.clone(),
//!             });
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = AgentHub::new(Config::default(), Arc::new(MyEngine))?;
//!
//!     let hub = Arc::new(hub);
//!     hub.spawn_api_server();
//!
//!     // Run until SIGTERM/SIGINT, then shut down gracefully
//!     run_with_shutdown(&hub).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API and WebSocket streaming module
pub mod api;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Experiment state, iteration driver and the stream bridge
pub mod experiment;
/// The top-level hub wiring everything together
pub mod hub;
/// Conversation producer interface (the external engine boundary)
pub mod producer;
/// Background task manager for model downloads
pub mod pull;
/// Model registry client
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Durable file store
pub mod store;
/// Core types
pub mod types;
/// Disk telemetry utilities
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use error::{ApiError, Error, ErrorDetail, Result, ToHttpStatus};
pub use experiment::ExperimentManager;
pub use hub::AgentHub;
pub use producer::ConversationProducer;
pub use pull::PullManager;
pub use registry::{HttpRegistry, ModelRegistry};
pub use store::FileStore;
pub use types::{
    AgentConfig, ConversationSnapshot, Experiment, ExperimentId, ExperimentStatus,
    ImportedConversation, Message, NewExperiment, PullTask, StreamFrame, TaskStatus,
};

use std::sync::Arc;

/// Helper function to run the hub with graceful signal handling.
///
/// Waits for a termination signal and then calls the hub's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(hub: &Arc<AgentHub>) -> Result<()> {
    wait_for_signal().await;
    hub.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
