//! Job state transition rules
//!
//! [`apply_transition`] is the one place that decides whether a mutation is
//! legal and how a [`JobPatch`] merges into a record. Store implementations
//! load the current record, call it, and persist the result atomically.

use chrono::{DateTime, Duration, Utc};
use spool_core::domain::failure::{JobFailure, Phase};
use spool_core::domain::job::{Job, JobId, JobState};
use spool_core::domain::metadata::{Metadata, RESOLVED_KEYS};
use spool_core::domain::output::{OutputDescriptor, merge_outputs};

use super::{StoreError, StoreResult};

/// Changes merged into a job by a transition
///
/// Every field is additive: absent fields leave the record untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    /// Worker performing the mutation; required to claim a job
    pub worker_id: Option<String>,
    pub progress: Option<u8>,
    pub phase: Option<Phase>,
    pub outputs: Vec<OutputDescriptor>,
    /// Provider-resolved metadata entries
    pub metadata: Metadata,
    pub request_cancel: bool,
    /// Only apply if the record was last updated at exactly this instant
    pub unchanged_since: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn claim(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: Some(worker_id.into()),
            ..Self::default()
        }
    }

    pub fn failure(failure: JobFailure) -> Self {
        Self {
            phase: Some(Phase::Failure(failure)),
            ..Self::default()
        }
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_cancel_request(mut self) -> Self {
        self.request_cancel = true;
        self
    }

    pub fn expecting_unchanged_since(mut self, updated_at: DateTime<Utc>) -> Self {
        self.unchanged_since = Some(updated_at);
        self
    }
}

/// Apply `expected → next` with `patch` to `job`
///
/// On error `job` is left untouched.
pub fn apply_transition(
    job: &mut Job,
    expected: JobState,
    next: JobState,
    patch: JobPatch,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    if job.state != expected {
        return Err(StoreError::Conflict {
            job_id: job.job_id.clone(),
            expected,
            actual: job.state,
        });
    }

    if !expected.can_transition_to(next) {
        return Err(StoreError::InvalidTransition {
            from: expected,
            to: next,
        });
    }

    if let Some(since) = patch.unchanged_since {
        if job.updated_at != since {
            return Err(StoreError::Conflict {
                job_id: job.job_id.clone(),
                expected,
                actual: job.state,
            });
        }
    }

    check_owner(job, expected, next, patch.worker_id.as_deref())?;

    let failure = match (&patch.phase, next) {
        (Some(Phase::Failure(failure)), JobState::Error) => Some(failure.clone()),
        (Some(Phase::Failure(_)), _) => {
            return Err(StoreError::InvalidPatch(format!(
                "a failure can only accompany a transition to error, not {}",
                next
            )));
        }
        (_, JobState::Error) => {
            return Err(StoreError::InvalidPatch(
                "a transition to error requires a failure".to_string(),
            ));
        }
        _ => None,
    };

    if let Some(key) = patch
        .metadata
        .keys()
        .find(|key| !RESOLVED_KEYS.contains(&key.as_str()))
    {
        return Err(StoreError::InvalidPatch(format!(
            "metadata key '{}' is read-only after creation",
            key
        )));
    }

    // Validated; mutate from here on.

    if expected == JobState::Queued && next == JobState::Running {
        job.worker_id = patch.worker_id;
        job.started_at = Some(now);
        job.phase_message = None;
    }

    if let Some(progress) = patch.progress {
        job.progress = job.progress.max(progress.min(100));
    }

    if let Some(Phase::Progress(message)) = patch.phase {
        job.phase_message = Some(message);
    }

    merge_outputs(&mut job.outputs, patch.outputs);
    job.metadata.extend(patch.metadata);

    if patch.request_cancel {
        job.cancel_requested = true;
    }

    match next {
        JobState::Done => {
            job.progress = 100;
            job.completed_at = Some(now);
        }
        JobState::Error => {
            if let Some(failure) = failure {
                job.error_message = Some(failure.message);
                job.error_code = Some(failure.code);
            }
            job.completed_at = Some(now);
        }
        JobState::Queued | JobState::Running => {}
    }

    job.state = next;
    job.updated_at = advance(job.updated_at, now);

    Ok(())
}

/// Only the claiming worker may write to a running job
///
/// Patches without a worker id come from the orchestrator itself
/// (cancellation, recovery, sweeps).
fn check_owner(
    job: &Job,
    expected: JobState,
    next: JobState,
    worker_id: Option<&str>,
) -> StoreResult<()> {
    if expected == JobState::Queued && next == JobState::Running {
        return match worker_id {
            Some(id) if !id.is_empty() => Ok(()),
            _ => Err(StoreError::InvalidPatch(
                "claiming a job requires a worker id".to_string(),
            )),
        };
    }

    match (worker_id, job.worker_id.as_deref()) {
        (Some(worker), Some(owner)) if expected == JobState::Running && worker != owner => {
            Err(not_owner(&job.job_id))
        }
        _ => Ok(()),
    }
}

fn not_owner(job_id: &JobId) -> StoreError {
    StoreError::NotOwner {
        job_id: job_id.clone(),
    }
}

/// `updated_at` strictly increases, even when the clock does not
fn advance(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}
