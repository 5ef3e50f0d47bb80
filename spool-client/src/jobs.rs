//! Job-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use spool_core::domain::failure::JobFailure;
use spool_core::domain::job::{Job, JobId};
use spool_core::domain::output::OutputDescriptor;
use spool_core::dto::job::{
    ClaimJob, CompleteJob, CreateJob, FailJob, JobCreated, JobFilter, ProgressReport,
    StreamCredential,
};

impl OrchestratorClient {
    // =============================================================================
    // Submission and Queries
    // =============================================================================

    /// Submit a new job
    ///
    /// # Arguments
    /// * `req` - Kind, metadata and an optional caller-chosen id
    ///
    /// # Returns
    /// The id of the queued job
    ///
    /// # Example
    /// ```no_run
    /// # use spool_client::OrchestratorClient;
    /// # use spool_core::domain::job::JobKind;
    /// # use spool_core::dto::job::CreateJob;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let created = client.submit_job(CreateJob {
    ///     kind: JobKind::Tts,
    ///     metadata: [("text".to_string(), "hello".into())].into(),
    ///     job_id: None,
    /// }).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit_job(&self, req: CreateJob) -> Result<JobCreated> {
        let response = self.client.post(self.url("/jobs")).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Get the current snapshot of a job
    pub async fn get_job(&self, job_id: &JobId) -> Result<Job> {
        let url = self.url(&format!("/jobs/{}", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List jobs, newest first
    ///
    /// # Arguments
    /// * `filter` - State, kind, creation window and limit; unset fields match everything
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let response = self
            .client
            .get(self.url("/jobs"))
            .query(filter)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Request cancellation
    ///
    /// Queued jobs fail immediately; running jobs get their cancel flag set
    /// and stop at the worker's next check.
    pub async fn cancel_job(&self, job_id: &JobId) -> Result<Job> {
        let url = self.url(&format!("/jobs/{}/cancel", job_id));
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Live Status
    // =============================================================================

    /// Fetch a short-lived credential for the job's event stream
    pub async fn stream_credential(&self, job_id: &JobId) -> Result<StreamCredential> {
        let url = self.url(&format!("/jobs/{}/auth", job_id));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Worker Lifecycle
    // =============================================================================

    /// Claim a queued job for execution
    ///
    /// # Returns
    /// The claimed job, or `None` when another worker got there first or the
    /// job is no longer queued
    pub async fn claim_job(&self, job_id: &JobId, worker_id: &str) -> Result<Option<Job>> {
        let url = self.url(&format!("/jobs/{}/claim", job_id));
        let response = self
            .client
            .post(&url)
            .json(&ClaimJob {
                worker_id: worker_id.to_string(),
            })
            .send()
            .await?;

        match self.handle_response(response).await {
            Ok(job) => Ok(Some(job)),
            Err(e) if e.is_conflict() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Report progress, phase text, partial outputs or resolved metadata
    pub async fn report_progress(&self, job_id: &JobId, report: &ProgressReport) -> Result<Job> {
        let url = self.url(&format!("/jobs/{}/progress", job_id));
        let response = self.client.post(&url).json(report).send().await?;

        self.handle_response(response).await
    }

    /// Mark a job as done with its final outputs
    pub async fn complete_job(
        &self,
        job_id: &JobId,
        worker_id: &str,
        outputs: Vec<OutputDescriptor>,
    ) -> Result<Job> {
        let url = self.url(&format!("/jobs/{}/complete", job_id));
        let response = self
            .client
            .post(&url)
            .json(&CompleteJob {
                worker_id: worker_id.to_string(),
                outputs,
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Mark a job as permanently failed
    pub async fn fail_job(&self, job_id: &JobId, worker_id: &str, failure: JobFailure) -> Result<Job> {
        let url = self.url(&format!("/jobs/{}/fail", job_id));
        let response = self
            .client
            .post(&url)
            .json(&FailJob {
                worker_id: worker_id.to_string(),
                failure,
            })
            .send()
            .await?;

        self.handle_response(response).await
    }
}
