//! Model registry client
//!
//! The registry (an Ollama-style HTTP API) is an external collaborator; this
//! module specifies the boundary as the [`ModelRegistry`] trait and provides
//! the production [`HttpRegistry`] implementation.
//!
//! All requests pass through a bounded concurrency gate so a burst of API
//! calls cannot flood the registry, and the cheap read endpoints (tags,
//! version) sit behind short-TTL caches. The `pull` operation streams NDJSON
//! progress chunks; retry/backoff around it belongs to the pull manager's
//! transfer routine, not to this client.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::config::RegistryConfig;
use crate::error::{Error, Result};

/// Streaming progress chunks from a model pull
pub type PullStream = futures::stream::BoxStream<'static, Result<serde_json::Value>>;

/// Model registry boundary
///
/// Implementations must be cheap to share (`Arc<dyn ModelRegistry>`); all
/// methods may be called concurrently from API handlers and transfer workers.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// List locally available models (`/api/tags`)
    async fn tags(&self) -> Result<serde_json::Value>;

    /// Registry version (`/api/version`)
    async fn version(&self) -> Result<serde_json::Value>;

    /// Start a streaming model download (`/api/pull`)
    ///
    /// Each stream item is one progress payload; an `error` field inside a
    /// payload is an application-level failure.
    async fn pull(&self, model: &str) -> Result<PullStream>;

    /// Delete a local model (`/api/delete`)
    async fn delete(&self, model: &str) -> Result<()>;

    /// Show model details (`/api/show`)
    async fn show(&self, model: &str) -> Result<serde_json::Value>;
}

/// Cached response with its fetch time
type CacheSlot = Mutex<Option<(Instant, serde_json::Value)>>;

/// HTTP implementation of [`ModelRegistry`]
pub struct HttpRegistry {
    http: reqwest::Client,
    base_url: String,
    gate: Arc<Semaphore>,
    cache_ttl: Duration,
    tags_cache: CacheSlot,
    version_cache: CacheSlot,
}

impl HttpRegistry {
    /// Create a client from registry configuration
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            gate: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            cache_ttl: config.cache_ttl,
            tags_cache: Mutex::new(None),
            version_cache: Mutex::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn cache_get(&self, slot: &CacheSlot) -> Option<serde_json::Value> {
        let guard = slot.lock().ok()?;
        match guard.as_ref() {
            Some((fetched, value)) if fetched.elapsed() < self.cache_ttl => Some(value.clone()),
            _ => None,
        }
    }

    fn cache_put(&self, slot: &CacheSlot, value: &serde_json::Value) {
        if let Ok(mut guard) = slot.lock() {
            *guard = Some((Instant::now(), value.clone()));
        }
    }

    /// GET a JSON endpoint through the concurrency gate
    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| Error::ShuttingDown)?;

        let response = self.http.get(self.url(path)).send().await?;
        if !response.status().is_success() {
            return Err(Error::Registry(format!(
                "{} returned {}",
                path,
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ModelRegistry for HttpRegistry {
    async fn tags(&self) -> Result<serde_json::Value> {
        if let Some(cached) = self.cache_get(&self.tags_cache) {
            return Ok(cached);
        }
        let value = self.get_json("/api/tags").await?;
        self.cache_put(&self.tags_cache, &value);
        Ok(value)
    }

    async fn version(&self) -> Result<serde_json::Value> {
        if let Some(cached) = self.cache_get(&self.version_cache) {
            return Ok(cached);
        }
        let value = self.get_json("/api/version").await?;
        self.cache_put(&self.version_cache, &value);
        Ok(value)
    }

    async fn pull(&self, model: &str) -> Result<PullStream> {
        // The permit is owned and moved into the stream state so the gate
        // stays occupied for the whole transfer, not just the request setup
        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::ShuttingDown)?;

        let response = self
            .http
            .post(self.url("/api/pull"))
            .json(&serde_json::json!({ "name": model, "stream": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Registry(format!(
                "pull of '{model}' failed with {status}: {body}"
            )));
        }

        // Re-frame the byte stream as NDJSON: buffer until a newline, then
        // parse one payload per line. Chunk boundaries do not align with
        // line boundaries.
        let bytes = response.bytes_stream();
        let ndjson = futures::stream::unfold(
            (bytes, Vec::<u8>::new(), false, permit),
            |(mut bytes, mut buf, mut exhausted, permit)| async move {
                loop {
                    if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buf.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line);
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let item = serde_json::from_str::<serde_json::Value>(line)
                            .map_err(Error::Serialization);
                        return Some((item, (bytes, buf, exhausted, permit)));
                    }

                    if exhausted {
                        // Trailing payload without a final newline
                        let line = String::from_utf8_lossy(&buf).trim().to_string();
                        buf.clear();
                        if line.is_empty() {
                            return None;
                        }
                        let item = serde_json::from_str::<serde_json::Value>(&line)
                            .map_err(Error::Serialization);
                        return Some((item, (bytes, buf, exhausted, permit)));
                    }

                    match bytes.next().await {
                        Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                        Some(Err(e)) => {
                            return Some((
                                Err(Error::Network(e)),
                                (bytes, buf, exhausted, permit),
                            ));
                        }
                        None => exhausted = true,
                    }
                }
            },
        );

        Ok(ndjson.boxed())
    }

    async fn delete(&self, model: &str) -> Result<()> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| Error::ShuttingDown)?;

        let response = self
            .http
            .delete(self.url("/api/delete"))
            .json(&serde_json::json!({ "name": model }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Registry(format!(
                "delete of '{model}' returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn show(&self, model: &str) -> Result<serde_json::Value> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| Error::ShuttingDown)?;

        let response = self
            .http
            .post(self.url("/api/show"))
            .json(&serde_json::json!({ "name": model }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Registry(format!(
                "show of '{model}' returned {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}
