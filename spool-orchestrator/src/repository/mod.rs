//! Repository Module
//!
//! The job store: the single source of truth for job state.
//!
//! [`JobStore`] is injected (as `Arc<dyn JobStore>`) into the service layer,
//! the status publisher and the background sweeps. Two implementations exist:
//! [`MemoryJobStore`] for development and tests, and [`PgJobStore`] for
//! durable deployments. Both delegate state rules to [`apply_transition`].

pub mod memory;
pub mod postgres;
pub mod transition;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;
pub use transition::{JobPatch, apply_transition};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spool_core::domain::failure::{FailureCode, JobFailure};
use spool_core::domain::job::{Job, JobId, JobKind, JobState};
use spool_core::domain::metadata::{Metadata, MetadataError};
use spool_core::dto::job::{JobFilter, ListOrder};

/// CAS attempts for store-level read-modify-write helpers
///
/// States only move forward, so a helper can lose at most a couple of races
/// before the job reaches a state it no longer acts on.
const MAX_CAS_ATTEMPTS: usize = 4;

/// Job store error type
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {0} already exists")]
    AlreadyExists(JobId),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(#[from] MetadataError),

    #[error("job {job_id} is {actual}, expected {expected}")]
    Conflict {
        job_id: JobId,
        expected: JobState,
        actual: JobState,
    },

    #[error("transition {from} -> {to} is not allowed")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    #[error("job {job_id} is owned by another worker")]
    NotOwner { job_id: JobId },

    #[error("stored job is corrupt: {0}")]
    Corrupt(String),

    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable keyed record of job state and progress
///
/// Every mutation goes through [`JobStore::transition`], an atomic
/// compare-and-swap on `state`. Implementations must not hold any lock that
/// outlives a single call.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `queued` job with zero progress
    ///
    /// Fails with [`StoreError::InvalidMetadata`] when the fields required
    /// for `kind` are missing, and [`StoreError::AlreadyExists`] when a
    /// caller-supplied id is taken.
    async fn create(
        &self,
        job_id: Option<JobId>,
        kind: JobKind,
        metadata: Metadata,
    ) -> StoreResult<Job>;

    async fn get(&self, job_id: &JobId) -> StoreResult<Job>;

    /// Compare-and-swap `expected → next`, merging `patch` into the record
    async fn transition(
        &self,
        job_id: &JobId,
        expected: JobState,
        next: JobState,
        patch: JobPatch,
    ) -> StoreResult<Job>;

    /// Jobs matching the filter, ordered by `created_at` per `filter.order`
    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>>;

    /// Delete terminal jobs completed before `before`
    async fn purge_terminal(&self, before: DateTime<Utc>) -> StoreResult<u64>;

    /// Request cooperative cancellation
    ///
    /// A queued job fails immediately with code `cancelled`; a running job
    /// gets its `cancel_requested` flag set for the owning worker to honor.
    /// Terminal jobs are returned unchanged.
    async fn request_cancel(&self, job_id: &JobId) -> StoreResult<Job> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let job = self.get(job_id).await?;
            let result = match job.state {
                JobState::Queued => {
                    let patch = JobPatch::failure(JobFailure::cancelled()).with_cancel_request();
                    self.transition(job_id, JobState::Queued, JobState::Error, patch)
                        .await
                }
                JobState::Running if !job.cancel_requested => {
                    let patch = JobPatch::default().with_cancel_request();
                    self.transition(job_id, JobState::Running, JobState::Running, patch)
                        .await
                }
                _ => return Ok(job),
            };

            match result {
                Err(StoreError::Conflict { .. }) => continue,
                other => return other,
            }
        }

        self.get(job_id).await
    }

    /// Fail `running` jobs left over from a previous process
    ///
    /// Called once at startup. Only jobs already quiet since `older_than`
    /// are failed; runners are separate processes, so a job that is still
    /// reporting keeps its worker and is left to the stale sweep. Queued
    /// jobs are kept and resumed by workers.
    async fn recover_interrupted(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        let failure = JobFailure::new(
            FailureCode::Interrupted,
            "Job was interrupted by an orchestrator restart",
        );
        fail_running_before(self, older_than, failure).await
    }

    /// Fail `running` jobs whose record has not changed since `older_than`
    async fn fail_stale_running(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        let failure = JobFailure::new(
            FailureCode::WorkerLost,
            "The worker running this job stopped reporting",
        );
        fail_running_before(self, older_than, failure).await
    }
}

async fn fail_running_before<S>(
    store: &S,
    older_than: DateTime<Utc>,
    failure: JobFailure,
) -> StoreResult<Vec<Job>>
where
    S: JobStore + ?Sized,
{
    let running = store
        .list(&JobFilter {
            state: Some(JobState::Running),
            ..JobFilter::default()
        })
        .await?;

    let mut failed = Vec::new();
    for job in running.into_iter().filter(|job| job.updated_at < older_than) {
        match store
            .transition(
                &job.job_id,
                JobState::Running,
                JobState::Error,
                JobPatch::failure(failure.clone()).expecting_unchanged_since(job.updated_at),
            )
            .await
        {
            Ok(job) => failed.push(job),
            Err(StoreError::Conflict { .. }) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(failed)
}

/// Sort in the filter's order and apply its limit
pub(crate) fn finish_listing(mut jobs: Vec<Job>, filter: &JobFilter) -> Vec<Job> {
    match filter.order {
        ListOrder::NewestFirst => jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        ListOrder::OldestFirst => jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
    }
    if let Some(limit) = filter.limit {
        jobs.truncate(limit);
    }
    jobs
}
