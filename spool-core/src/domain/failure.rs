//! Failure domain types
//!
//! A [`JobFailure`] is the only thing allowed to put a job into the `error`
//! state. Informational progress text travels as [`Phase::Progress`] and can
//! never be mistaken for one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable machine-readable failure code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// The provider rejected the input as invalid
    InvalidInput,
    /// The provider reported the request as impossible
    ProviderRejected,
    /// Transient failures persisted past the retry budget
    RetriesExhausted,
    /// The final attempt exceeded the stage deadline
    TimedOut,
    /// Cancelled on request
    Cancelled,
    /// The orchestrator restarted while the job was running
    Interrupted,
    /// The owning worker stopped reporting
    WorkerLost,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::InvalidInput => "invalid_input",
            FailureCode::ProviderRejected => "provider_rejected",
            FailureCode::RetriesExhausted => "retries_exhausted",
            FailureCode::TimedOut => "timed_out",
            FailureCode::Cancelled => "cancelled",
            FailureCode::Interrupted => "interrupted",
            FailureCode::WorkerLost => "worker_lost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let code = match s {
            "invalid_input" => FailureCode::InvalidInput,
            "provider_rejected" => FailureCode::ProviderRejected,
            "retries_exhausted" => FailureCode::RetriesExhausted,
            "timed_out" => FailureCode::TimedOut,
            "cancelled" => FailureCode::Cancelled,
            "interrupted" => FailureCode::Interrupted,
            "worker_lost" => FailureCode::WorkerLost,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A permanent, user-visible job failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: FailureCode,
    pub message: String,
}

impl JobFailure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureCode::Cancelled, "Job was cancelled")
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// What a worker is reporting about the current step
///
/// Progress text and failures are distinct variants so that a status line
/// such as "Retrying after provider error" can never be rendered as a job
/// error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Phase {
    Progress(String),
    Failure(JobFailure),
}

impl Phase {
    pub fn progress(message: impl Into<String>) -> Self {
        Phase::Progress(message.into())
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Phase::Failure(_))
    }
}
