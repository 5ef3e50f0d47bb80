//! Runner configuration
//!
//! Defines all configurable parameters for the runner: the worker pool size,
//! polling interval, per-attempt deadline, retry policy, and where the style
//! map and generation provider live.

use spool_core::domain::job::JobKind;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Runner configuration
///
/// All timeouts and intervals are configurable to allow tuning
/// for different deployment scenarios (dev vs prod, fast vs slow providers).
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of this runner process; workers append their slot number
    pub worker_id: String,

    /// Orchestrator base URL (e.g., "http://localhost:8080")
    pub orchestrator_url: String,

    /// Base URL of the generation provider gateway
    pub provider_url: String,

    /// Kinds served by their own provider instead of the gateway
    pub kind_provider_urls: BTreeMap<JobKind, String>,

    /// How long an idle worker waits before looking for queued jobs again
    pub poll_interval: Duration,

    /// Number of workers, and so the bound on concurrent provider calls
    pub pool_size: usize,

    /// Hard deadline of a single executor attempt
    pub stage_timeout: Duration,

    /// How often a running job is touched while its executor is silent;
    /// must stay below the orchestrator's stale-running threshold
    pub keepalive_interval: Duration,

    /// Attempt budget and backoff for transient executor failures
    pub retry: RetryPolicy,

    /// JSON style map; the built-in map is used when absent
    pub style_map_path: Option<PathBuf>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(worker_id: String, orchestrator_url: String) -> Self {
        Self {
            worker_id,
            orchestrator_url,
            provider_url: "http://localhost:9000".to_string(),
            kind_provider_urls: BTreeMap::new(),
            poll_interval: Duration::from_secs(2),
            pool_size: 4,
            stage_timeout: Duration::from_secs(600), // 10 minutes
            keepalive_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            style_map_path: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - SPOOL_WORKER_ID (optional, random when unset)
    /// - SPOOL_ORCHESTRATOR_URL (required)
    /// - SPOOL_PROVIDER_URL (optional, default: http://localhost:9000)
    /// - SPOOL_PROVIDER_URL_<KIND> (optional, e.g. SPOOL_PROVIDER_URL_TTS)
    /// - SPOOL_POLL_INTERVAL_SECS (optional, default: 2)
    /// - SPOOL_POOL_SIZE (optional, default: 4)
    /// - SPOOL_STAGE_TIMEOUT_SECS (optional, default: 600)
    /// - SPOOL_KEEPALIVE_SECS (optional, default: 30)
    /// - SPOOL_MAX_ATTEMPTS (optional, default: 3)
    /// - SPOOL_BACKOFF_BASE_MS (optional, default: 1000)
    /// - SPOOL_BACKOFF_MAX_MS (optional, default: 30000)
    /// - SPOOL_JITTER_RATIO (optional, default: 0.2)
    /// - SPOOL_STYLE_MAP (optional, path to a JSON style map)
    pub fn from_env() -> anyhow::Result<Self> {
        let orchestrator_url = std::env::var("SPOOL_ORCHESTRATOR_URL")
            .map_err(|_| anyhow::anyhow!("SPOOL_ORCHESTRATOR_URL environment variable not set"))?;

        let worker_id = std::env::var("SPOOL_WORKER_ID")
            .ok()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(default_worker_id);

        let defaults = Self::new(worker_id, orchestrator_url);
        let retry_defaults = RetryPolicy::default();

        Ok(Self {
            provider_url: std::env::var("SPOOL_PROVIDER_URL").unwrap_or(defaults.provider_url.clone()),
            kind_provider_urls: kind_provider_urls(|name| std::env::var(name).ok()),
            poll_interval: parsed_var("SPOOL_POLL_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            pool_size: parsed_var("SPOOL_POOL_SIZE").unwrap_or(defaults.pool_size),
            stage_timeout: parsed_var("SPOOL_STAGE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stage_timeout),
            keepalive_interval: parsed_var("SPOOL_KEEPALIVE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.keepalive_interval),
            retry: RetryPolicy {
                max_attempts: parsed_var("SPOOL_MAX_ATTEMPTS").unwrap_or(retry_defaults.max_attempts),
                base_delay: parsed_var("SPOOL_BACKOFF_BASE_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.base_delay),
                max_delay: parsed_var("SPOOL_BACKOFF_MAX_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.max_delay),
                jitter_ratio: parsed_var("SPOOL_JITTER_RATIO").unwrap_or(retry_defaults.jitter_ratio),
            },
            style_map_path: std::env::var("SPOOL_STYLE_MAP")
                .ok()
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            ..defaults
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        let urls = [
            ("orchestrator_url".to_string(), &self.orchestrator_url),
            ("provider_url".to_string(), &self.provider_url),
        ]
        .into_iter()
        .chain(
            self.kind_provider_urls
                .iter()
                .map(|(kind, url)| (format!("provider_url for {}", kind), url)),
        );
        for (name, url) in urls {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", name);
            }
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.pool_size == 0 {
            anyhow::bail!("pool_size must be greater than 0");
        }

        if self.stage_timeout.is_zero() {
            anyhow::bail!("stage_timeout must be greater than 0");
        }

        if self.keepalive_interval.is_zero() {
            anyhow::bail!("keepalive_interval must be greater than 0");
        }

        self.retry.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(default_worker_id(), "http://localhost:8080".to_string())
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

/// `SPOOL_PROVIDER_URL_<KIND>` overrides, e.g. `SPOOL_PROVIDER_URL_RENDER_BATCH`
fn kind_provider_urls(lookup: impl Fn(&str) -> Option<String>) -> BTreeMap<JobKind, String> {
    JobKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let name = format!("SPOOL_PROVIDER_URL_{}", kind.as_str().to_uppercase());
            lookup(&name)
                .filter(|url| !url.is_empty())
                .map(|url| (kind, url))
        })
        .collect()
}

fn default_worker_id() -> String {
    format!("runner-{}", uuid::Uuid::new_v4().simple())
}
