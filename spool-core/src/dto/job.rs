//! Job DTOs for inter-service communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::failure::JobFailure;
use crate::domain::job::{JobId, JobKind, JobState};
use crate::domain::metadata::Metadata;
use crate::domain::output::OutputDescriptor;

/// Request to submit a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    pub kind: JobKind,
    #[serde(default)]
    pub metadata: Metadata,
    /// Caller-chosen id; generated by the orchestrator when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Response to a successful submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreated {
    pub job_id: JobId,
}

/// Runner request to take ownership of a queued job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimJob {
    pub worker_id: String,
}

/// Incremental progress from the owning worker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressReport {
    pub worker_id: String,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub outputs: Vec<OutputDescriptor>,
    /// Provider-resolved metadata (resolved model and friends)
    #[serde(default)]
    pub resolved: Metadata,
}

/// Successful completion from the owning worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteJob {
    pub worker_id: String,
    pub outputs: Vec<OutputDescriptor>,
}

/// Permanent failure from the owning worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailJob {
    pub worker_id: String,
    pub failure: JobFailure,
}

/// Listing order by `created_at`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrder {
    #[default]
    NewestFirst,
    /// Queue order, used by workers picking the next job
    OldestFirst,
}

impl ListOrder {
    pub fn is_newest_first(&self) -> bool {
        *self == ListOrder::NewestFirst
    }
}

/// Operator listing filter (`GET /jobs?state=&kind=&since=&order=`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<JobKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "ListOrder::is_newest_first")]
    pub order: ListOrder,
}

impl JobFilter {
    /// The next `limit` queued jobs in submission order
    pub fn next_queued(limit: usize) -> Self {
        Self {
            state: Some(JobState::Queued),
            limit: Some(limit),
            order: ListOrder::OldestFirst,
            ..Self::default()
        }
    }

    /// Whether a job with these attributes passes the filter (limit aside)
    pub fn matches(&self, state: JobState, kind: JobKind, created_at: DateTime<Utc>) -> bool {
        self.state.is_none_or(|s| s == state)
            && self.kind.is_none_or(|k| k == kind)
            && self.since.is_none_or(|since| created_at >= since)
            && self.until.is_none_or(|until| created_at < until)
    }
}

/// Short-lived credential for the live status stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamCredential {
    pub job_id: JobId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}
