//! The top-level `AgentHub`: wiring for the file store, experiment manager,
//! pull manager and registry client, plus startup recovery and graceful
//! shutdown.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::experiment::ExperimentManager;
use crate::producer::ConversationProducer;
use crate::pull::PullManager;
use crate::registry::{HttpRegistry, ModelRegistry};
use crate::store::FileStore;

/// Main hub instance (cloneable - all fields are Arc-wrapped or handles)
///
/// Construction performs startup recovery: experiments left non-terminal by a
/// previous process are failed, the persisted pull-task table is reloaded
/// (interrupted transfers become errors, pending ones restart), and the
/// periodic cleanup worker is spawned.
#[derive(Clone)]
pub struct AgentHub {
    store: FileStore,
    experiments: ExperimentManager,
    pulls: PullManager,
    registry: Arc<dyn ModelRegistry>,
    config: Arc<Config>,
    shutdown_token: CancellationToken,
}

impl AgentHub {
    /// Create a hub talking to the configured HTTP model registry
    ///
    /// The conversation producer is the external engine that actually runs
    /// multi-agent conversations; the hub only schedules and supervises it.
    ///
    /// Must be called from within a Tokio runtime (background workers are
    /// spawned during construction).
    pub fn new(config: Config, producer: Arc<dyn ConversationProducer>) -> Result<Self> {
        let registry: Arc<dyn ModelRegistry> = Arc::new(HttpRegistry::new(&config.registry));
        Self::with_registry(config, producer, registry)
    }

    /// Create a hub with a caller-supplied registry client
    ///
    /// Embedders use this to substitute their own [`ModelRegistry`]
    /// implementation (tests substitute mocks the same way).
    pub fn with_registry(
        config: Config,
        producer: Arc<dyn ConversationProducer>,
        registry: Arc<dyn ModelRegistry>,
    ) -> Result<Self> {
        let store = FileStore::open(&config.storage.data_dir)?;

        let experiments =
            ExperimentManager::new(store.clone(), producer, config.experiments.clone());
        let swept = experiments.fail_interrupted()?;
        if swept > 0 {
            tracing::info!(count = swept, "Failed experiments interrupted by restart");
        }

        let pulls = PullManager::new(store.clone(), registry.clone(), config.pulls.clone());
        pulls.resume_persisted()?;

        let shutdown_token = CancellationToken::new();
        pulls.spawn_cleanup_worker(shutdown_token.clone());

        tracing::info!(
            data_dir = %config.storage.data_dir.display(),
            registry = %config.registry.base_url,
            "AgentHub initialized"
        );

        Ok(Self {
            store,
            experiments,
            pulls,
            registry,
            config: Arc::new(config),
            shutdown_token,
        })
    }

    /// The experiment manager
    pub fn experiments(&self) -> &ExperimentManager {
        &self.experiments
    }

    /// The pull manager
    pub fn pulls(&self) -> &PullManager {
        &self.pulls
    }

    /// The model registry client
    pub fn registry(&self) -> Arc<dyn ModelRegistry> {
        self.registry.clone()
    }

    /// The durable file store
    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// The active configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Spawn the REST/WebSocket API server in a background task
    pub fn spawn_api_server(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        let hub = self.clone();
        let config = self.config();
        tokio::spawn(async move { crate::api::start_api_server(hub, config).await })
    }

    /// Gracefully shut down the hub
    ///
    /// Signals every experiment run and pull worker to stop, stops the
    /// cleanup worker, waits (bounded) for runs to reach their terminal
    /// notifications, and persists final state.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.shutdown_token.cancel();
        self.experiments.shutdown();
        self.pulls.shutdown();

        // Runs observe cancellation cooperatively; give them a bounded window
        // to write their terminal state
        let deadline = std::time::Duration::from_secs(10);
        let wait = async {
            while self.experiments.active_runs() > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        };
        if tokio::time::timeout(deadline, wait).await.is_err() {
            tracing::warn!("Timeout waiting for experiment runs, proceeding with shutdown");
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
