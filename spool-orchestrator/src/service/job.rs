//! Job Service
//!
//! Business logic for the job lifecycle. Every successful mutation is
//! handed to the status publisher with the snapshot the store returned.

use chrono::Utc;
use spool_core::domain::failure::Phase;
use spool_core::domain::job::{Job, JobId, JobState};
use spool_core::dto::job::{
    ClaimJob, CompleteJob, CreateJob, FailJob, JobFilter, ProgressReport, StreamCredential,
};

use crate::publisher::CredentialError;
use crate::repository::{JobPatch, StoreError};
use crate::state::AppState;

/// Service error type
#[derive(Debug)]
pub enum JobError {
    NotFound(JobId),
    ValidationError(String),
    Conflict(String),
    CredentialError(CredentialError),
    StoreUnavailable(String),
    InternalError(String),
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => JobError::NotFound(id),
            StoreError::InvalidMetadata(e) => JobError::ValidationError(e.to_string()),
            StoreError::InvalidPatch(msg) => JobError::ValidationError(msg),
            e @ (StoreError::AlreadyExists(_)
            | StoreError::Conflict { .. }
            | StoreError::InvalidTransition { .. }
            | StoreError::NotOwner { .. }) => JobError::Conflict(e.to_string()),
            StoreError::Unavailable(msg) => JobError::StoreUnavailable(msg),
            StoreError::Corrupt(msg) => JobError::InternalError(msg),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::NotFound(id) => write!(f, "Job {} not found", id),
            JobError::ValidationError(msg) => write!(f, "{}", msg),
            JobError::Conflict(msg) => write!(f, "{}", msg),
            JobError::CredentialError(e) => write!(f, "{}", e),
            JobError::StoreUnavailable(msg) => write!(f, "Job store unavailable: {}", msg),
            JobError::InternalError(msg) => write!(f, "{}", msg),
        }
    }
}

// =============================================================================
// Submission and Queries
// =============================================================================

/// Validate and enqueue a new job
pub async fn submit_job(state: &AppState, req: CreateJob) -> Result<Job, JobError> {
    let job_id = req
        .job_id
        .as_deref()
        .map(JobId::parse)
        .transpose()
        .map_err(|e| JobError::ValidationError(e.to_string()))?;

    let job = state.store.create(job_id, req.kind, req.metadata).await?;

    tracing::info!(job_id = %job.job_id, kind = %job.kind, "Job queued");

    state.publisher.publish(&job);
    Ok(job)
}

/// Point-in-time snapshot, identical in shape to a pushed `update`
pub async fn get_job(state: &AppState, job_id: &JobId) -> Result<Job, JobError> {
    Ok(state.store.get(job_id).await?)
}

pub async fn list_jobs(state: &AppState, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
    if let (Some(since), Some(until)) = (filter.since, filter.until) {
        if since > until {
            return Err(JobError::ValidationError(
                "'since' must not be after 'until'".to_string(),
            ));
        }
    }

    Ok(state.store.list(filter).await?)
}

/// Issue a short-lived stream credential for an existing job
pub async fn issue_stream_credential(
    state: &AppState,
    job_id: &JobId,
) -> Result<StreamCredential, JobError> {
    state.store.get(job_id).await?;

    state
        .credentials
        .issue(job_id)
        .map_err(JobError::CredentialError)
}

/// Request cooperative cancellation
pub async fn cancel_job(state: &AppState, job_id: &JobId) -> Result<Job, JobError> {
    let job = state.store.request_cancel(job_id).await?;

    match job.state {
        JobState::Error => tracing::info!(job_id = %job_id, "Queued job cancelled"),
        JobState::Running => tracing::info!(job_id = %job_id, "Cancellation requested"),
        _ => tracing::debug!(job_id = %job_id, state = %job.state, "Cancel on finished job ignored"),
    }

    state.publisher.publish(&job);
    Ok(job)
}

// =============================================================================
// Worker Lifecycle
// =============================================================================

/// Hand a queued job to a worker
pub async fn claim_job(state: &AppState, job_id: &JobId, req: ClaimJob) -> Result<Job, JobError> {
    let job = state
        .store
        .transition(
            job_id,
            JobState::Queued,
            JobState::Running,
            JobPatch::claim(req.worker_id.clone()),
        )
        .await?;

    tracing::info!(job_id = %job_id, worker_id = %req.worker_id, "Job claimed");

    state.publisher.publish(&job);
    Ok(job)
}

/// Merge a progress report from the owning worker
pub async fn report_progress(
    state: &AppState,
    job_id: &JobId,
    req: ProgressReport,
) -> Result<Job, JobError> {
    let patch = JobPatch {
        progress: req.progress,
        phase: req.message.map(Phase::Progress),
        outputs: req.outputs,
        metadata: req.resolved,
        ..JobPatch::claim(req.worker_id)
    };

    let job = state
        .store
        .transition(job_id, JobState::Running, JobState::Running, patch)
        .await?;

    tracing::debug!(
        job_id = %job_id,
        progress = job.progress,
        phase = job.phase_message.as_deref().unwrap_or(""),
        "Progress reported"
    );

    state.publisher.publish(&job);
    Ok(job)
}

pub async fn complete_job(
    state: &AppState,
    job_id: &JobId,
    req: CompleteJob,
) -> Result<Job, JobError> {
    let patch = JobPatch {
        outputs: req.outputs,
        ..JobPatch::claim(req.worker_id)
    };

    let job = state
        .store
        .transition(job_id, JobState::Running, JobState::Done, patch)
        .await?;

    tracing::info!(job_id = %job_id, outputs = job.outputs.len(), "Job done");

    state.publisher.publish(&job);
    Ok(job)
}

pub async fn fail_job(state: &AppState, job_id: &JobId, req: FailJob) -> Result<Job, JobError> {
    let failure = req.failure.clone();
    let patch = JobPatch::failure(req.failure).with_worker(req.worker_id);

    let job = state
        .store
        .transition(job_id, JobState::Running, JobState::Error, patch)
        .await?;

    tracing::info!(job_id = %job_id, code = %failure.code, "Job failed: {}", failure.message);

    state.publisher.publish(&job);
    Ok(job)
}

// =============================================================================
// Maintenance
// =============================================================================

/// Fail jobs left `running` by a previous process that have gone quiet
pub async fn recover_interrupted(state: &AppState) -> Result<usize, JobError> {
    let recovered = state.store.recover_interrupted(stale_cutoff(state)?).await?;

    for job in &recovered {
        tracing::warn!(job_id = %job.job_id, "Running job interrupted by restart");
        state.publisher.publish(job);
    }

    Ok(recovered.len())
}

/// Fail running jobs whose worker stopped reporting
pub async fn fail_stale_jobs(state: &AppState) -> Result<usize, JobError> {
    let failed = state.store.fail_stale_running(stale_cutoff(state)?).await?;

    for job in &failed {
        tracing::warn!(
            job_id = %job.job_id,
            worker_id = job.worker_id.as_deref().unwrap_or("unknown"),
            "Running job lost its worker"
        );
        state.publisher.publish(job);
    }

    Ok(failed.len())
}

/// Delete terminal jobs past the retention window
pub async fn purge_expired(state: &AppState) -> Result<u64, JobError> {
    let retention = chrono::Duration::from_std(state.config.retention)
        .map_err(|e| JobError::InternalError(e.to_string()))?;

    Ok(state.store.purge_terminal(Utc::now() - retention).await?)
}

/// Running jobs untouched since this instant have lost their worker
fn stale_cutoff(state: &AppState) -> Result<chrono::DateTime<Utc>, JobError> {
    let threshold = chrono::Duration::from_std(state.config.stale_running_after)
        .map_err(|e| JobError::InternalError(e.to_string()))?;

    Ok(Utc::now() - threshold)
}
