//! The transfer routine: a retrying consumer of the registry's pull stream
//!
//! Retry/backoff lives here, around the whole streaming transfer, not in the
//! manager: a mid-stream network drop restarts the download from scratch
//! (resumable byte ranges are out of scope), so each attempt is one complete
//! `pull` call.

use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::PullManager;
use crate::error::{Error, Result};
use crate::registry::ModelRegistry;
use crate::retry::with_retry;

/// Run one model pull to completion, with retry on transient failures
///
/// Cancellation is observed between progress chunks; a cancelled transfer
/// returns `Ok(())` and the manager's terminal rules keep the task
/// `cancelled`.
pub(crate) async fn run_pull(
    manager: PullManager,
    registry: Arc<dyn ModelRegistry>,
    task_id: String,
    model_name: String,
    cancel: CancellationToken,
) -> Result<()> {
    let retry_config = manager.config().retry.clone();

    let retry_manager = manager.clone();
    let retry_task_id = task_id.clone();
    let on_retry = move |_attempt: u32| {
        retry_manager.record_retry(&retry_task_id);
    };

    with_retry(&retry_config, on_retry, move || {
        let manager = manager.clone();
        let registry = registry.clone();
        let task_id = task_id.clone();
        let model_name = model_name.clone();
        let cancel = cancel.clone();

        async move {
            let mut stream = registry.pull(&model_name).await?;

            while let Some(chunk) = stream.next().await {
                if cancel.is_cancelled() {
                    tracing::info!(task_id = %task_id, "Transfer stopping on cancellation");
                    return Ok(());
                }

                let payload = chunk?;

                // Application-level failures arrive inside the stream
                if let Some(message) = payload.get("error").and_then(serde_json::Value::as_str) {
                    return Err(Error::Registry(message.to_string()));
                }

                manager.update_progress(&task_id, payload);
            }

            Ok(())
        }
    })
    .await
}
