//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::failure::FailureCode;
use crate::domain::metadata::Metadata;
use crate::domain::output::OutputDescriptor;

/// Longest caller-supplied job id accepted.
const MAX_JOB_ID_LEN: usize = 128;

/// Opaque, immutable job identifier
///
/// Either supplied by the caller at submission or generated by the
/// orchestrator (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generates a fresh server-side id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Parses a caller-supplied id
    ///
    /// Ids must be 1..=128 characters of ASCII alphanumerics, `-`, `_` or `.`
    /// so they can be embedded in URLs and SQL keys without escaping.
    pub fn parse(raw: &str) -> Result<Self, InvalidJobId> {
        if raw.is_empty() || raw.len() > MAX_JOB_ID_LEN {
            return Err(InvalidJobId(raw.to_string()));
        }

        let valid = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(InvalidJobId(raw.to_string()));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = InvalidJobId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Rejected job id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job id '{0}'")]
pub struct InvalidJobId(pub String);

/// What kind of generation work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Text-to-speech narration
    Tts,
    /// A batch of AI image (or clip) renders
    RenderBatch,
    /// Video composition of previously rendered assets
    Compose,
    /// End-to-end "universe" creation: script, voice, images and video
    QuickCreateUniverse,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Tts,
        JobKind::RenderBatch,
        JobKind::Compose,
        JobKind::QuickCreateUniverse,
    ];

    /// Wire / storage name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Tts => "tts",
            JobKind::RenderBatch => "render_batch",
            JobKind::Compose => "compose",
            JobKind::QuickCreateUniverse => "quick_create_universe",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown job kind '{}'", s))
    }
}

/// Job lifecycle state
///
/// Transitions only move forward: `queued → running → {done | error}`.
/// A queued job may also go straight to `error` when it is cancelled or
/// rejected during recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Error,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Queued,
        JobState::Running,
        JobState::Done,
        JobState::Error,
    ];

    /// Whether no further transition is permitted
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }

    /// Whether `self → next` is an edge of the lifecycle graph
    ///
    /// `running → running` is allowed so that workers can patch progress.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Error)
                | (JobState::Running, JobState::Running)
                | (JobState::Running, JobState::Done)
                | (JobState::Running, JobState::Error)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Error => "error",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown job state '{}'", s))
    }
}

/// Full job record
///
/// This is also the snapshot shape: the poll endpoint and every push
/// `update` / `terminal` event serialize exactly this structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub kind: JobKind,
    pub state: JobState,

    /// 0..=100, non-decreasing while running
    pub progress: u8,

    /// Informational description of the current step. Never an error signal.
    #[serde(default)]
    pub phase_message: Option<String>,

    /// Present iff `state == error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Structured failure code, present iff `state == error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<FailureCode>,

    #[serde(default)]
    pub outputs: Vec<OutputDescriptor>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Cooperative cancellation flag checked by the owning worker
    #[serde(default)]
    pub cancel_requested: bool,

    /// Worker currently (or last) owning the job
    #[serde(default)]
    pub worker_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a fresh `queued` record with zero progress
    pub fn new(job_id: JobId, kind: JobKind, metadata: Metadata, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            kind,
            state: JobState::Queued,
            progress: 0,
            phase_message: None,
            error_message: None,
            error_code: None,
            outputs: Vec::new(),
            metadata,
            cancel_requested: false,
            worker_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Look up a string metadata field
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|value| value.as_str())
    }
}
