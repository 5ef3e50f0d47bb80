//! Job watcher
//!
//! Follows one job to its terminal state. The live event stream is the
//! primary channel; every connection asks for a fresh credential, and a
//! stream that ends early is reopened with backoff. When the stream cannot be
//! established repeatedly the watcher falls back to polling the snapshot
//! endpoint. Both paths feed the same [`JobMirror`].

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use spool_core::domain::event::StreamEvent;
use spool_core::domain::job::{Job, JobId};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::OrchestratorClient;
use crate::error::Result;
use crate::reconcile::{JobMirror, Notification};

/// Where the watcher reads job status from
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Point-in-time snapshot (the polling path)
    async fn snapshot(&self, job_id: &JobId) -> Result<Job>;

    /// Open a new event stream for the job
    async fn connect(&self, job_id: &JobId) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

#[async_trait]
impl StatusSource for OrchestratorClient {
    async fn snapshot(&self, job_id: &JobId) -> Result<Job> {
        self.get_job(job_id).await
    }

    async fn connect(&self, job_id: &JobId) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let credential = self.stream_credential(job_id).await?;
        self.open_events(&credential).await
    }
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// First reconnect delay; doubles per consecutive failure
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    /// Consecutive failed connections before switching to polling
    pub max_connect_failures: u32,
    /// Silence on an open stream after which it is considered dead
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(10),
            max_connect_failures: 3,
            idle_timeout: Duration::from_secs(45),
            poll_interval: Duration::from_secs(2),
        }
    }
}

enum StreamOutcome {
    Terminal(Job),
    Closed { established: bool },
}

pub struct JobWatcher<S = OrchestratorClient> {
    source: S,
    config: WatchConfig,
}

impl<S: StatusSource> JobWatcher<S> {
    pub fn new(source: S) -> Self {
        Self::with_config(source, WatchConfig::default())
    }

    pub fn with_config(source: S, config: WatchConfig) -> Self {
        Self { source, config }
    }

    /// Follow `job_id` until it is terminal and return the final snapshot
    ///
    /// `notify` is called for every notification the mirror raises. Fails
    /// only when the job does not exist or polling hits a non-retryable
    /// error.
    pub async fn watch<F>(&self, job_id: &JobId, mirror: &mut JobMirror, mut notify: F) -> Result<Job>
    where
        F: FnMut(&Notification),
    {
        let mut failures = 0u32;

        while failures < self.config.max_connect_failures {
            match self.source.connect(job_id).await {
                Ok(stream) => match self.follow(stream, mirror, &mut notify).await {
                    StreamOutcome::Terminal(job) => return Ok(job),
                    StreamOutcome::Closed { established } => {
                        failures = if established { 0 } else { failures + 1 };
                        tracing::debug!("Event stream for job {} closed, reconnecting", job_id);
                    }
                },
                Err(e) if e.is_not_found() => return Err(e),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        "Failed to open event stream for job {} ({}/{}): {}",
                        job_id,
                        failures,
                        self.config.max_connect_failures,
                        e
                    );
                }
            }

            tokio::time::sleep(self.reconnect_delay(failures)).await;
        }

        tracing::warn!("Event stream for job {} unavailable, polling instead", job_id);
        self.poll(job_id, mirror, &mut notify).await
    }

    async fn follow<F>(
        &self,
        mut stream: BoxStream<'static, Result<StreamEvent>>,
        mirror: &mut JobMirror,
        notify: &mut F,
    ) -> StreamOutcome
    where
        F: FnMut(&Notification),
    {
        let mut established = false;

        loop {
            let event = match tokio::time::timeout(self.config.idle_timeout, stream.next()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!("Event stream idle for {:?}, dropping it", self.config.idle_timeout);
                    break;
                }
            };

            match event {
                Ok(StreamEvent::ConnectionEstablished(info)) => {
                    established = true;
                    tracing::debug!("Streaming job {} until {}", info.job_id, info.expires_at);
                }
                Ok(StreamEvent::Heartbeat(_)) => {}
                Ok(StreamEvent::Update(job)) | Ok(StreamEvent::Terminal(job)) => {
                    if let Some(notification) = mirror.merge(job.clone()) {
                        notify(&notification);
                    }
                    if job.is_terminal() {
                        return StreamOutcome::Terminal(job);
                    }
                }
                Err(e) => {
                    tracing::warn!("Event stream failed: {}", e);
                    break;
                }
            }
        }

        StreamOutcome::Closed { established }
    }

    async fn poll<F>(&self, job_id: &JobId, mirror: &mut JobMirror, notify: &mut F) -> Result<Job>
    where
        F: FnMut(&Notification),
    {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self.source.snapshot(job_id).await {
                Ok(job) => {
                    if let Some(notification) = mirror.merge(job.clone()) {
                        notify(&notification);
                    }
                    if job.is_terminal() {
                        return Ok(job);
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!("Polling job {} failed, retrying: {}", job_id, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn reconnect_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.config
            .reconnect_base
            .saturating_mul(1 << exponent)
            .min(self.config.reconnect_max)
    }
}
