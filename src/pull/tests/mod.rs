use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use super::*;
use crate::config::{PullsConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::registry::{ModelRegistry, PullStream};
use crate::types::TaskStatus;

mod lifecycle;
mod persistence;

/// Retry schedule fast enough for tests
fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn fast_config() -> PullsConfig {
    PullsConfig {
        retry: fast_retry(),
        throttle_interval: Duration::from_millis(0),
        percent_delta: 0.0,
        // Long enough that scheduled removals never fire during a test
        failed_cleanup_delay: Duration::from_secs(600),
        ..PullsConfig::default()
    }
}

fn manager_with(registry: Arc<dyn ModelRegistry>, config: PullsConfig) -> (PullManager, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::open(temp_dir.path()).unwrap();
    (PullManager::new(store, registry, config), temp_dir)
}

/// Poll until `predicate` holds or a 5s deadline passes
async fn wait_until(predicate: impl Fn() -> bool) {
    for _ in 0..250 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within timeout");
}

async fn wait_for_status(manager: &PullManager, task_id: &str, status: TaskStatus) {
    wait_until(|| {
        manager
            .get(task_id)
            .map(|t| t.status == status)
            .unwrap_or(false)
    })
    .await;
}

// ── Mock registries ─────────────────────────────────────────────────────

/// Registry whose pull fails transiently `fail_times` times, then streams a
/// short successful transfer
pub(super) struct FlakyRegistry {
    pub attempts: AtomicU32,
    pub fail_times: u32,
}

impl FlakyRegistry {
    fn new(fail_times: u32) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            fail_times,
        }
    }
}

#[async_trait]
impl ModelRegistry for FlakyRegistry {
    async fn tags(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"models": []}))
    }

    async fn version(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"version": "0.0.0-test"}))
    }

    async fn pull(&self, _model: &str) -> Result<PullStream> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_times {
            return Err(Error::Registry("connection reset by peer".into()));
        }
        Ok(futures::stream::iter(vec![
            Ok(serde_json::json!({"status": "downloading", "completed": 512, "total": 1024})),
            Ok(serde_json::json!({"status": "success"})),
        ])
        .boxed())
    }

    async fn delete(&self, _model: &str) -> Result<()> {
        Ok(())
    }

    async fn show(&self, _model: &str) -> Result<serde_json::Value> {
        Ok(serde_json::json!({}))
    }
}

/// Registry whose pull streams progress forever (until the consumer stops)
pub(super) struct EndlessRegistry;

#[async_trait]
impl ModelRegistry for EndlessRegistry {
    async fn tags(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"models": []}))
    }

    async fn version(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"version": "0.0.0-test"}))
    }

    async fn pull(&self, _model: &str) -> Result<PullStream> {
        Ok(futures::stream::unfold(0u64, |n| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let payload =
                serde_json::json!({"status": "downloading", "completed": n, "total": 1_000_000u64});
            Some((Ok(payload), n + 1))
        })
        .boxed())
    }

    async fn delete(&self, _model: &str) -> Result<()> {
        Ok(())
    }

    async fn show(&self, _model: &str) -> Result<serde_json::Value> {
        Ok(serde_json::json!({}))
    }
}

/// Registry whose stream reports an application-level error payload
pub(super) struct BrokenModelRegistry;

#[async_trait]
impl ModelRegistry for BrokenModelRegistry {
    async fn tags(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"models": []}))
    }

    async fn version(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"version": "0.0.0-test"}))
    }

    async fn pull(&self, model: &str) -> Result<PullStream> {
        let error = format!("model '{model}' not found");
        Ok(futures::stream::iter(vec![
            Ok(serde_json::json!({"status": "pulling manifest"})),
            Ok(serde_json::json!({"error": error})),
        ])
        .boxed())
    }

    async fn delete(&self, _model: &str) -> Result<()> {
        Ok(())
    }

    async fn show(&self, _model: &str) -> Result<serde_json::Value> {
        Ok(serde_json::json!({}))
    }
}
