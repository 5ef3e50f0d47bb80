//! Job worker
//!
//! One worker processes one job at a time:
//! 1. claim a queued job (losing the race is not an error)
//! 2. resolve its executor binding and record it on the job
//! 3. run executor attempts with a hard deadline each, forwarding progress
//! 4. retry transient failures with backoff, checking for cancellation
//!    before every attempt
//! 5. write `done` or a structured failure
//!
//! While an attempt runs, the job is touched every `keepalive_interval` when
//! the executor has nothing to report, so a long provider call is never
//! mistaken for a lost worker.
//!
//! Orchestrator writes that fail transiently are retried with their own
//! backoff. A job whose terminal write cannot be delivered stays `running`
//! and is failed later by the orchestrator's stale-job sweep.

use spool_client::Result as ClientResult;
use spool_core::domain::failure::{FailureCode, JobFailure};
use spool_core::domain::job::{Job, JobId};
use spool_core::domain::output::OutputDescriptor;
use spool_core::dto::job::ProgressReport;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::executor::{ExecutorError, ProgressSender, ProgressUpdate, StageInput, StageOutput};
use crate::registry::{ExecutorBinding, ExecutorRegistry};
use crate::repository::JobRepository;
use crate::retry::RetryPolicy;

/// How many queued jobs a worker looks at per poll
const CLAIM_BATCH: usize = 16;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub stage_timeout: Duration,
    pub keepalive_interval: Duration,
    pub retry: RetryPolicy,
    pub store_retry: RetryPolicy,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            stage_timeout: config.stage_timeout,
            keepalive_interval: config.keepalive_interval,
            retry: config.retry.clone(),
            store_retry: RetryPolicy::for_store_writes(),
        }
    }
}

enum AttemptError {
    Executor(ExecutorError),
    TimedOut(Duration),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Executor(e) => write!(f, "{}", e),
            AttemptError::TimedOut(limit) => write!(f, "no result within {:?}", limit),
        }
    }
}

enum Outcome {
    Done(Vec<OutputDescriptor>),
    Failed(JobFailure),
    /// The job was finished or taken over elsewhere; nothing to write
    Abandoned,
}

/// Result of the check made before each attempt
enum Gate {
    Proceed,
    Cancelled,
    Gone,
}

pub struct Worker {
    id: String,
    repo: Arc<dyn JobRepository>,
    registry: Arc<ExecutorRegistry>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        id: String,
        repo: Arc<dyn JobRepository>,
        registry: Arc<ExecutorRegistry>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id,
            repo,
            registry,
            settings,
        }
    }

    /// Claim and process jobs until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        info!("Worker {} started", self.id);

        while !cancel.is_cancelled() {
            if self.run_once(&cancel).await {
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        info!("Worker {} stopped", self.id);
    }

    /// Claim one job and process it; `false` when nothing could be claimed
    pub async fn run_once(&self, cancel: &CancellationToken) -> bool {
        match self.claim_next().await {
            Some(job) => {
                self.process(job, cancel).await;
                true
            }
            None => false,
        }
    }

    async fn claim_next(&self) -> Option<Job> {
        let queued = match self.repo.fetch_queued_jobs(CLAIM_BATCH).await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Worker {} failed to fetch queued jobs: {}", self.id, e);
                return None;
            }
        };

        for candidate in queued {
            match self.repo.claim_job(&candidate.job_id, &self.id).await {
                Ok(Some(job)) => return Some(job),
                Ok(None) => debug!("Job {} already claimed, trying the next one", candidate.job_id),
                // The job stays queued for another attempt
                Err(e) => warn!("Worker {} failed to claim job {}: {}", self.id, candidate.job_id, e),
            }
        }

        None
    }

    /// Drive a claimed job to its terminal state
    pub async fn process(&self, job: Job, cancel: &CancellationToken) {
        let binding = self.registry.resolve_for(&job);
        info!(
            "Worker {} running job {} ({}) with {} via {} [{}]",
            self.id, job.job_id, job.kind, binding.model, binding.provider, binding.source
        );

        let outcome = self.execute(&job, &binding, cancel).await;
        self.finish(&job.job_id, outcome).await;
    }

    async fn execute(&self, job: &Job, binding: &ExecutorBinding, cancel: &CancellationToken) -> Outcome {
        let job_id = &job.job_id;

        let started = ProgressReport {
            worker_id: self.id.clone(),
            message: Some(format!("Running {} with {}", job.kind, binding.model)),
            resolved: binding.resolved_metadata(),
            ..ProgressReport::default()
        };
        let mut floor = match self.write_progress(job_id, &started).await {
            Ok(snapshot) => snapshot.progress,
            Err(e) if e.is_transient() => job.progress,
            Err(e) => {
                warn!("Job {} is no longer ours: {}", job_id, e);
                return Outcome::Abandoned;
            }
        };

        let input = StageInput::from_job(job);
        let max_attempts = self.settings.retry.max_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.gate(job_id).await {
                Gate::Proceed => {}
                Gate::Cancelled => {
                    info!("Job {} cancelled before attempt {}", job_id, attempt);
                    return Outcome::Failed(JobFailure::cancelled());
                }
                Gate::Gone => return Outcome::Abandoned,
            }

            let error = match self.run_attempt(job_id, binding, &input, &mut floor).await {
                Ok(output) => return Outcome::Done(output.outputs),
                Err(AttemptError::Executor(e)) if !e.is_transient() => {
                    warn!("Job {} failed permanently: {}", job_id, e);
                    return e
                        .into_failure()
                        .map(Outcome::Failed)
                        .unwrap_or(Outcome::Abandoned);
                }
                Err(error) => error,
            };

            if !self.settings.retry.has_attempts_left(attempt) {
                warn!("Job {} gave up after {} attempt(s): {}", job_id, attempt, error);
                return Outcome::Failed(exhausted(&error, attempt));
            }

            let delay = self.settings.retry.delay(attempt);
            warn!(
                "Job {} attempt {}/{} failed, retrying in {:?}: {}",
                job_id, attempt, max_attempts, delay, error
            );

            let retrying = ProgressReport {
                worker_id: self.id.clone(),
                message: Some(format!(
                    "Retrying (attempt {}/{}) after {}",
                    attempt + 1,
                    max_attempts,
                    match error {
                        AttemptError::TimedOut(_) => "the provider timed out",
                        AttemptError::Executor(_) => "a temporary provider failure",
                    }
                )),
                ..ProgressReport::default()
            };
            if let Err(e) = self.write_progress(job_id, &retrying).await {
                debug!("Could not record retry of job {}: {}", job_id, e);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Outcome::Failed(JobFailure::new(
                        FailureCode::Interrupted,
                        "Runner shut down before the job finished",
                    ));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One executor call under the stage deadline, with progress forwarded
    /// to the orchestrator while it runs
    async fn run_attempt(
        &self,
        job_id: &JobId,
        binding: &ExecutorBinding,
        input: &StageInput,
        floor: &mut u8,
    ) -> Result<StageOutput, AttemptError> {
        let (progress, updates) = ProgressSender::channel();
        let limit = self.settings.stage_timeout;

        let call = async {
            tokio::time::timeout(limit, self.registry.execute(binding, input, progress)).await
        };
        let (result, reached) = tokio::join!(call, self.forward_progress(job_id, *floor, updates));
        *floor = reached;

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(AttemptError::Executor(e)),
            Err(_) => Err(AttemptError::TimedOut(limit)),
        }
    }

    /// Write executor progress until the sender is dropped
    ///
    /// Values that do not raise the progress are stripped, so what the
    /// orchestrator sees never decreases. When nothing has been written for
    /// `keepalive_interval`, an empty report refreshes the job's
    /// `updated_at`. Returns the highest value written.
    async fn forward_progress(
        &self,
        job_id: &JobId,
        mut floor: u8,
        mut updates: mpsc::UnboundedReceiver<ProgressUpdate>,
    ) -> u8 {
        let every = self.settings.keepalive_interval;
        let keepalive = tokio::time::sleep(every);
        tokio::pin!(keepalive);

        loop {
            let report = tokio::select! {
                update = updates.recv() => {
                    let Some(update) = update else { break };

                    let progress = update.progress.map(|p| p.min(100)).filter(|p| *p > floor);
                    if progress.is_none() && update.message.is_none() && update.outputs.is_empty() {
                        continue;
                    }

                    ProgressReport {
                        worker_id: self.id.clone(),
                        progress,
                        message: update.message,
                        outputs: update.outputs,
                        ..ProgressReport::default()
                    }
                }
                _ = &mut keepalive => {
                    debug!("Keeping job {} alive", job_id);
                    ProgressReport {
                        worker_id: self.id.clone(),
                        ..ProgressReport::default()
                    }
                }
            };

            match self.repo.report_progress(job_id, &report).await {
                Ok(snapshot) => floor = floor.max(snapshot.progress),
                Err(e) => debug!("Dropped progress update for job {}: {}", job_id, e),
            }
            keepalive.as_mut().reset(tokio::time::Instant::now() + every);
        }

        floor
    }

    async fn gate(&self, job_id: &JobId) -> Gate {
        match self.repo.get_job(job_id).await {
            Ok(job) if job.is_terminal() => {
                info!("Job {} was finished elsewhere ({})", job_id, job.state);
                Gate::Gone
            }
            Ok(job) if job.worker_id.as_deref() != Some(self.id.as_str()) => Gate::Gone,
            Ok(job) if job.cancel_requested => Gate::Cancelled,
            Ok(_) => Gate::Proceed,
            Err(e) if e.is_not_found() => Gate::Gone,
            Err(e) => {
                debug!("Could not re-read job {}, continuing: {}", job_id, e);
                Gate::Proceed
            }
        }
    }

    async fn finish(&self, job_id: &JobId, outcome: Outcome) {
        let result = match outcome {
            Outcome::Done(outputs) => self
                .with_store_retry("complete", || {
                    self.repo.complete_job(job_id, &self.id, outputs.clone())
                })
                .await
                .map(|_| info!("Job {} done", job_id)),
            Outcome::Failed(failure) => self
                .with_store_retry("fail", || self.repo.fail_job(job_id, &self.id, failure.clone()))
                .await
                .map(|_| info!("Job {} failed: {}", job_id, failure)),
            Outcome::Abandoned => Ok(()),
        };

        if let Err(e) = result {
            if e.is_transient() {
                error!(
                    "Could not record the outcome of job {}, leaving it to the stale-job sweep: {}",
                    job_id, e
                );
            } else {
                warn!("Outcome of job {} rejected by the orchestrator: {}", job_id, e);
            }
        }
    }

    async fn write_progress(&self, job_id: &JobId, report: &ProgressReport) -> ClientResult<Job> {
        self.with_store_retry("progress", || self.repo.report_progress(job_id, report))
            .await
    }

    async fn with_store_retry<T, F, Fut>(&self, what: &str, mut op: F) -> ClientResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let policy = &self.settings.store_retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && policy.has_attempts_left(attempt) => {
                    let delay = policy.delay(attempt);
                    warn!(
                        "Orchestrator {} write failed (attempt {}/{}), retrying in {:?}: {}",
                        what, attempt, policy.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn exhausted(error: &AttemptError, attempts: u32) -> JobFailure {
    match error {
        AttemptError::TimedOut(limit) => JobFailure::new(
            FailureCode::TimedOut,
            format!("Provider gave no result within {:?} (attempt {})", limit, attempts),
        ),
        AttemptError::Executor(e) => JobFailure::new(
            FailureCode::RetriesExhausted,
            format!("Provider failed after {} attempts: {}", attempts, e),
        ),
    }
}
