//! Configuration types for agenthub

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Main configuration for [`AgentHub`](crate::AgentHub)
///
/// Fields are organized into logical sub-configs:
/// - [`storage`](StorageConfig) — durable data root
/// - [`pulls`](PullsConfig) — download retry, throttling, retention
/// - [`experiments`](ExperimentsConfig) — watchdog timeouts, streaming cadence
/// - [`registry`](RegistryConfig) — model registry endpoint and caching
/// - [`api`](ApiConfig) — REST/WebSocket server settings
///
/// Every field has a sensible default; `Config::default()` works out of the
/// box against a local registry on the standard port.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Durable data storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Model download behavior
    #[serde(default)]
    pub pulls: PullsConfig,

    /// Experiment run supervision
    #[serde(default)]
    pub experiments: ExperimentsConfig,

    /// Model registry client settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// API server settings
    #[serde(default)]
    pub api: ApiConfig,
}

/// Durable data storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for all persisted state (default: "./data")
    ///
    /// Layout: `experiments/{id}/experiment.json`,
    /// `experiments/{id}/conversations/{iteration}.json`,
    /// `experiments_index.json`, `imported_conversations/{id}.json`,
    /// `pull_tasks.json`, `locks/{experiment_id}.lock`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Model download behavior (retry, throttling, cleanup)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PullsConfig {
    /// Retry policy for transient transfer failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Minimum time between progress emissions for one task (default: 1s)
    #[serde(default = "default_throttle_interval", with = "duration_serde")]
    pub throttle_interval: Duration,

    /// Percent-complete delta that forces an emission regardless of the
    /// interval (default: 1.0)
    #[serde(default = "default_percent_delta")]
    pub percent_delta: f64,

    /// A running task with no progress update for this long is forced to
    /// error (default: 120s)
    #[serde(default = "default_stale_after", with = "duration_serde")]
    pub stale_after: Duration,

    /// How often the periodic cleanup worker runs (default: 30s)
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,

    /// How long completed tasks stay visible before removal (default: 5 min)
    #[serde(default = "default_completed_retention", with = "duration_serde")]
    pub completed_retention: Duration,

    /// How long errored tasks stay visible before removal (default: 30 min)
    #[serde(default = "default_error_retention", with = "duration_serde")]
    pub error_retention: Duration,

    /// How long cancelled tasks stay visible before removal (default: 5 min)
    #[serde(default = "default_cancelled_retention", with = "duration_serde")]
    pub cancelled_retention: Duration,

    /// Delay before an errored task's scheduled removal (default: 60s)
    #[serde(default = "default_failed_cleanup_delay", with = "duration_serde")]
    pub failed_cleanup_delay: Duration,
}

impl Default for PullsConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            throttle_interval: default_throttle_interval(),
            percent_delta: default_percent_delta(),
            stale_after: default_stale_after(),
            cleanup_interval: default_cleanup_interval(),
            completed_retention: default_completed_retention(),
            error_retention: default_error_retention(),
            cancelled_retention: default_cancelled_retention(),
            failed_cleanup_delay: default_failed_cleanup_delay(),
        }
    }
}

/// Retry configuration for transient failures
///
/// The default schedule sleeps `min(max_delay, initial_delay * 2^attempt)`
/// between attempts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Experiment run supervision settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentsConfig {
    /// Hard wall-clock limit for a whole experiment run; the watchdog forces
    /// the run to `error` when it elapses (None = unlimited)
    #[serde(default, with = "optional_duration_serde")]
    pub experiment_timeout: Option<Duration>,

    /// Hard wall-clock limit for a single iteration (None = unlimited)
    #[serde(default, with = "optional_duration_serde")]
    pub iteration_timeout: Option<Duration>,

    /// How long the stream relay waits on the event queue before re-checking
    /// terminal status (default: 500ms)
    #[serde(default = "default_stream_poll_interval", with = "duration_ms_serde")]
    pub stream_poll_interval: Duration,
}

impl Default for ExperimentsConfig {
    fn default() -> Self {
        Self {
            experiment_timeout: None,
            iteration_timeout: None,
            stream_poll_interval: default_stream_poll_interval(),
        }
    }
}

/// Model registry client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the registry HTTP API (default: "http://127.0.0.1:11434")
    #[serde(default = "default_registry_url")]
    pub base_url: String,

    /// Maximum concurrent requests to the registry (default: 4)
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// TTL of the tags/version response caches (default: 5s)
    #[serde(default = "default_cache_ttl", with = "duration_serde")]
    pub cache_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            max_concurrent_requests: default_max_concurrent_requests(),
            cache_ttl: default_cache_ttl(),
        }
    }
}

/// API server settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address for the REST/WebSocket server (default: 127.0.0.1:8710)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Enable the CORS layer (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins; "*" allows any (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Serve interactive Swagger UI at /swagger-ui (default: false)
    #[serde(default)]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: false,
        }
    }
}

// Default value functions for serde

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_throttle_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_percent_delta() -> f64 {
    1.0
}

fn default_stale_after() -> Duration {
    Duration::from_secs(120)
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_completed_retention() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_error_retention() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_cancelled_retention() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_failed_cleanup_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_stream_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_registry_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_max_concurrent_requests() -> usize {
    4
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(5)
}

// Constant literal, cannot fail to parse
#[allow(clippy::unwrap_used)]
fn default_bind_address() -> SocketAddr {
    "127.0.0.1:8710".parse().unwrap()
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds, for sub-second settings)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
