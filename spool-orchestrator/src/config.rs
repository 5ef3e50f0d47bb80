//! Orchestrator configuration
//!
//! Defines the bind address, storage backend, stream credential settings and
//! the intervals of the background sweeps.

use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Postgres URL; the in-memory store is used when absent
    pub database_url: Option<String>,

    /// HMAC secret for stream credentials
    pub stream_secret: String,

    /// Lifetime of a stream credential
    pub credential_ttl: Duration,

    /// Interval between heartbeat events on a stream
    pub heartbeat_interval: Duration,

    /// Subscriptions silent for longer than this are closed by the sweep
    pub heartbeat_timeout: Duration,

    /// How often the subscription sweep runs
    pub subscription_sweep_interval: Duration,

    /// How long terminal jobs are kept before garbage collection
    pub retention: Duration,

    /// How often the retention sweep runs
    pub retention_sweep_interval: Duration,

    /// Running jobs with no update for this long are failed as `worker_lost`
    pub stale_running_after: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(bind_addr: String, stream_secret: String) -> Self {
        Self {
            bind_addr,
            database_url: None,
            stream_secret,
            credential_ttl: Duration::from_secs(600), // 10 minutes
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(45),
            subscription_sweep_interval: Duration::from_secs(10),
            retention: Duration::from_secs(7 * 24 * 3600),
            retention_sweep_interval: Duration::from_secs(3600),
            stale_running_after: Duration::from_secs(1800),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - SPOOL_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - DATABASE_URL (optional, in-memory store when unset)
    /// - SPOOL_STREAM_SECRET (optional, random per process when unset)
    /// - SPOOL_CREDENTIAL_TTL_SECS (optional, default: 600)
    /// - SPOOL_HEARTBEAT_INTERVAL_SECS (optional, default: 15)
    /// - SPOOL_HEARTBEAT_TIMEOUT_SECS (optional, default: 45)
    /// - SPOOL_SUBSCRIPTION_SWEEP_SECS (optional, default: 10)
    /// - SPOOL_RETENTION_SECS (optional, default: 604800)
    /// - SPOOL_RETENTION_SWEEP_SECS (optional, default: 3600)
    /// - SPOOL_STALE_RUNNING_SECS (optional, default: 1800)
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            std::env::var("SPOOL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let stream_secret = match std::env::var("SPOOL_STREAM_SECRET") {
            Ok(secret) => secret,
            Err(_) => {
                tracing::warn!(
                    "SPOOL_STREAM_SECRET not set, stream credentials will not survive a restart"
                );
                random_secret()
            }
        };

        let defaults = Self::new(bind_addr, stream_secret);

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            credential_ttl: secs_var("SPOOL_CREDENTIAL_TTL_SECS", defaults.credential_ttl),
            heartbeat_interval: secs_var(
                "SPOOL_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: secs_var("SPOOL_HEARTBEAT_TIMEOUT_SECS", defaults.heartbeat_timeout),
            subscription_sweep_interval: secs_var(
                "SPOOL_SUBSCRIPTION_SWEEP_SECS",
                defaults.subscription_sweep_interval,
            ),
            retention: secs_var("SPOOL_RETENTION_SECS", defaults.retention),
            retention_sweep_interval: secs_var(
                "SPOOL_RETENTION_SWEEP_SECS",
                defaults.retention_sweep_interval,
            ),
            stale_running_after: secs_var(
                "SPOOL_STALE_RUNNING_SECS",
                defaults.stale_running_after,
            ),
            ..defaults
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.stream_secret.len() < 16 {
            anyhow::bail!("stream_secret must be at least 16 bytes");
        }

        if self.credential_ttl.as_secs() == 0 {
            anyhow::bail!("credential_ttl must be greater than 0");
        }

        if self.heartbeat_interval.is_zero() {
            anyhow::bail!("heartbeat_interval must be greater than 0");
        }

        if self.heartbeat_timeout <= self.heartbeat_interval {
            anyhow::bail!("heartbeat_timeout must be longer than heartbeat_interval");
        }

        if self.subscription_sweep_interval.is_zero() || self.retention_sweep_interval.is_zero() {
            anyhow::bail!("sweep intervals must be greater than 0");
        }

        if self.stale_running_after.is_zero() {
            anyhow::bail!("stale_running_after must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("0.0.0.0:8080".to_string(), random_secret())
    }
}

fn secs_var(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn random_secret() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}
