//! Jobs repository
//!
//! The worker-facing slice of the orchestrator API:
//! - Listing queued jobs
//! - Claiming a job (compare-and-swap on the orchestrator side)
//! - Re-reading a job to see cancellation requests
//! - Reporting progress and the terminal outcome

use async_trait::async_trait;
use spool_client::{OrchestratorClient, Result};
use spool_core::domain::failure::JobFailure;
use spool_core::domain::job::{Job, JobId};
use spool_core::domain::output::OutputDescriptor;
use spool_core::dto::job::{JobFilter, ProgressReport};

/// Repository trait for job-related operations with the orchestrator
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// The oldest queued jobs, at most `limit`
    async fn fetch_queued_jobs(&self, limit: usize) -> Result<Vec<Job>>;

    /// Claims a queued job
    ///
    /// Returns `None` when the job is no longer queued, which includes
    /// losing the race to another worker.
    async fn claim_job(&self, job_id: &JobId, worker_id: &str) -> Result<Option<Job>>;

    async fn get_job(&self, job_id: &JobId) -> Result<Job>;

    async fn report_progress(&self, job_id: &JobId, report: &ProgressReport) -> Result<Job>;

    async fn complete_job(
        &self,
        job_id: &JobId,
        worker_id: &str,
        outputs: Vec<OutputDescriptor>,
    ) -> Result<Job>;

    async fn fail_job(&self, job_id: &JobId, worker_id: &str, failure: JobFailure) -> Result<Job>;
}

/// HTTP implementation of JobRepository
pub struct HttpJobRepository {
    client: OrchestratorClient,
}

impl HttpJobRepository {
    pub fn new(client: OrchestratorClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobRepository for HttpJobRepository {
    async fn fetch_queued_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.client.list_jobs(&JobFilter::next_queued(limit)).await
    }

    async fn claim_job(&self, job_id: &JobId, worker_id: &str) -> Result<Option<Job>> {
        self.client.claim_job(job_id, worker_id).await
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Job> {
        self.client.get_job(job_id).await
    }

    async fn report_progress(&self, job_id: &JobId, report: &ProgressReport) -> Result<Job> {
        self.client.report_progress(job_id, report).await
    }

    async fn complete_job(
        &self,
        job_id: &JobId,
        worker_id: &str,
        outputs: Vec<OutputDescriptor>,
    ) -> Result<Job> {
        self.client.complete_job(job_id, worker_id, outputs).await
    }

    async fn fail_job(&self, job_id: &JobId, worker_id: &str, failure: JobFailure) -> Result<Job> {
        self.client.fail_job(job_id, worker_id, failure).await
    }
}
