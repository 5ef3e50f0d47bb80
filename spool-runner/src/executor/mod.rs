//! Stage executors
//!
//! A stage executor is the runner's view of an external generation provider.
//! It receives the resolved binding and the job input, streams progress
//! through a [`ProgressSender`], and either returns the produced outputs or
//! a classified [`ExecutorError`]. Executors never retry; the worker owns the
//! retry policy.

pub mod http;

pub use http::HttpStageExecutor;

use async_trait::async_trait;
use spool_core::domain::failure::{FailureCode, JobFailure};
use spool_core::domain::job::{Job, JobId, JobKind};
use spool_core::domain::metadata::Metadata;
use spool_core::domain::output::OutputDescriptor;
use tokio::sync::mpsc;

use crate::registry::ExecutorBinding;

/// What an executor needs from the job
#[derive(Debug, Clone, PartialEq)]
pub struct StageInput {
    pub job_id: JobId,
    pub kind: JobKind,
    pub metadata: Metadata,
}

impl StageInput {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            kind: job.kind,
            metadata: job.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    pub outputs: Vec<OutputDescriptor>,
}

/// One incremental report from a running executor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub outputs: Vec<OutputDescriptor>,
}

/// Executor side of the progress channel
///
/// Sends never block and never fail; updates are discarded once the worker
/// stops listening. Executors must not keep clones alive past `execute`.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, update: ProgressUpdate) {
        let _ = self.tx.send(update);
    }

    pub fn percent(&self, progress: u8) {
        self.send(ProgressUpdate {
            progress: Some(progress),
            ..ProgressUpdate::default()
        });
    }

    /// Progress with informational phase text
    pub fn step(&self, progress: u8, message: impl Into<String>) {
        self.send(ProgressUpdate {
            progress: Some(progress),
            message: Some(message.into()),
            outputs: Vec::new(),
        });
    }
}

/// Classified executor failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// Timeouts, 5xx-class answers and rate limits; worth another attempt
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// The provider will never accept this input
    #[error("{message}")]
    Permanent { code: FailureCode, message: String },
}

impl ExecutorError {
    pub fn transient(message: impl Into<String>) -> Self {
        ExecutorError::Transient(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        ExecutorError::Permanent {
            code: FailureCode::InvalidInput,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        ExecutorError::Permanent {
            code: FailureCode::ProviderRejected,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutorError::Transient(_))
    }

    /// The user-visible failure for a permanent error
    pub fn into_failure(self) -> Option<JobFailure> {
        match self {
            ExecutorError::Permanent { code, message } => Some(JobFailure::new(code, message)),
            ExecutorError::Transient(_) => None,
        }
    }
}

/// Abstraction over a generation provider
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Provider name recorded on the job as `resolved_provider`
    fn provider(&self) -> &str;

    async fn execute(
        &self,
        binding: &ExecutorBinding,
        input: &StageInput,
        progress: ProgressSender,
    ) -> Result<StageOutput, ExecutorError>;
}
