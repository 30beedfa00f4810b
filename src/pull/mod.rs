//! Background task manager for model downloads
//!
//! The `PullManager` owns the lifecycle of pull tasks: registration, worker
//! spawning, cooperative cancellation, progress throttling, crash-safe
//! persistence and resume-on-restart. It is organized by concern:
//! - [`tasks`] - Task lifecycle (create/start/cancel/progress) and persistence
//! - [`throttle`] - The progress emission throttle decision
//! - [`transfer`] - The retrying transfer routine around the registry's pull
//! - [`cleanup`] - Stale-task detection and retention-based removal
//!
//! The manager is a cloneable handle over shared state; every public method is
//! safe to call from any thread or task. Locks are held only across in-memory
//! mutation — callback fan-out and table persistence always happen outside.

mod cleanup;
mod tasks;
mod throttle;
mod transfer;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::PullsConfig;
use crate::registry::ModelRegistry;
use crate::store::FileStore;
use crate::types::PullTask;

/// Callback invoked with a task snapshot on every emitted progress update and
/// on the terminal transition
pub type ProgressCallback = Arc<dyn Fn(&PullTask) + Send + Sync>;

/// Manager for background model-download tasks (cloneable handle)
#[derive(Clone)]
pub struct PullManager {
    inner: Arc<PullManagerInner>,
}

struct PullManagerInner {
    /// All known tasks, including terminal ones awaiting retention cleanup
    tasks: Mutex<HashMap<String, PullTask>>,
    /// Cancellation token per task with a live (or cancellable pending) worker
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
    /// Registered progress callbacks per task
    callbacks: Mutex<HashMap<String, Vec<ProgressCallback>>>,
    store: FileStore,
    registry: Arc<dyn ModelRegistry>,
    config: PullsConfig,
}

impl PullManager {
    /// Create a manager over the given store and registry client
    ///
    /// This does not touch persisted state; call
    /// [`resume_persisted`](Self::resume_persisted) afterwards to reload and
    /// reclassify tasks from a previous process.
    pub fn new(store: FileStore, registry: Arc<dyn ModelRegistry>, config: PullsConfig) -> Self {
        Self {
            inner: Arc::new(PullManagerInner {
                tasks: Mutex::new(HashMap::new()),
                cancel_tokens: Mutex::new(HashMap::new()),
                callbacks: Mutex::new(HashMap::new()),
                store,
                registry,
                config,
            }),
        }
    }

    pub(crate) fn config(&self) -> &PullsConfig {
        &self.inner.config
    }

    pub(crate) fn registry(&self) -> Arc<dyn ModelRegistry> {
        self.inner.registry.clone()
    }

    /// Signal every live worker to stop and persist the final table.
    /// Used during graceful shutdown.
    pub fn shutdown(&self) {
        let tokens: Vec<CancellationToken> = match self.inner.cancel_tokens.lock() {
            Ok(tokens) => tokens.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        tracing::info!(active = tokens.len(), "Signaling pull workers to stop");
        for token in tokens {
            token.cancel();
        }
        self.persist();
    }
}
