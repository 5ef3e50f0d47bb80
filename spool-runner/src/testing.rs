//! Test doubles for the worker and registry tests

use async_trait::async_trait;
use chrono::Utc;
use spool_client::{ClientError, Result as ClientResult};
use spool_core::domain::failure::{FailureCode, JobFailure};
use spool_core::domain::job::{Job, JobId, JobKind, JobState};
use spool_core::domain::metadata::Metadata;
use spool_core::domain::output::{OutputDescriptor, merge_outputs};
use spool_core::dto::job::ProgressReport;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::executor::{ExecutorError, ProgressSender, StageExecutor, StageInput, StageOutput};
use crate::registry::ExecutorBinding;
use crate::repository::JobRepository;

pub fn queued_job(id: &str, kind: JobKind) -> Job {
    let metadata = Metadata::from([("text".to_string(), "hello".into())]);
    Job::new(JobId::parse(id).unwrap(), kind, metadata, Utc::now())
}

/// In-memory orchestrator with the same ownership rules as the real one
#[derive(Default)]
pub struct FakeRepository {
    jobs: Mutex<HashMap<JobId, Job>>,
    reports: Mutex<Vec<(JobId, ProgressReport)>>,
    failures: Mutex<HashMap<&'static str, u32>>,
    cancel_on_claim: AtomicBool,
}

impl FakeRepository {
    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        let repo = Self::default();
        repo.jobs
            .lock()
            .unwrap()
            .extend(jobs.into_iter().map(|job| (job.job_id.clone(), job)));
        repo
    }

    pub fn job(&self, id: &str) -> Job {
        self.jobs.lock().unwrap()[&JobId::parse(id).unwrap()].clone()
    }

    /// Make the next `times` calls of `op` fail with a 503
    pub fn fail_next(&self, op: &'static str, times: u32) {
        self.failures.lock().unwrap().insert(op, times);
    }

    /// Set the cancel flag as soon as a job is claimed
    pub fn cancel_on_claim(&self) {
        self.cancel_on_claim.store(true, Ordering::SeqCst);
    }

    pub fn progress_values(&self, id: &str) -> Vec<u8> {
        self.reports_for(id).filter_map(|r| r.progress).collect()
    }

    pub fn messages(&self, id: &str) -> Vec<String> {
        self.reports_for(id).filter_map(|r| r.message).collect()
    }

    /// Reports that carried nothing but the worker id
    pub fn keepalives(&self, id: &str) -> usize {
        self.reports_for(id)
            .filter(|r| {
                r.progress.is_none()
                    && r.message.is_none()
                    && r.outputs.is_empty()
                    && r.resolved.is_empty()
            })
            .count()
    }

    fn reports_for(&self, id: &str) -> impl Iterator<Item = ProgressReport> {
        let id = JobId::parse(id).unwrap();
        self.reports
            .lock()
            .unwrap()
            .iter()
            .filter(|(job_id, _)| *job_id == id)
            .map(|(_, report)| report.clone())
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn injected(&self, op: &'static str) -> ClientResult<()> {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ClientError::api_error(503, "Job store unavailable"))
            }
            _ => Ok(()),
        }
    }

    fn owned_mut<'a>(
        jobs: &'a mut HashMap<JobId, Job>,
        job_id: &JobId,
        worker_id: &str,
    ) -> ClientResult<&'a mut Job> {
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| ClientError::api_error(404, "not found"))?;
        if job.state != JobState::Running || job.worker_id.as_deref() != Some(worker_id) {
            return Err(ClientError::api_error(409, "not the owner of a running job"));
        }
        job.updated_at = Utc::now();
        Ok(job)
    }
}

#[async_trait]
impl JobRepository for FakeRepository {
    async fn fetch_queued_jobs(&self, limit: usize) -> ClientResult<Vec<Job>> {
        self.injected("fetch")?;
        let mut queued: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|job| job.state == JobState::Queued)
            .cloned()
            .collect();
        queued.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        queued.truncate(limit);
        Ok(queued)
    }

    async fn claim_job(&self, job_id: &JobId, worker_id: &str) -> ClientResult<Option<Job>> {
        self.injected("claim")?;
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(job_id) else {
            return Err(ClientError::api_error(404, "not found"));
        };
        if job.state != JobState::Queued {
            return Ok(None);
        }

        job.state = JobState::Running;
        job.worker_id = Some(worker_id.to_string());
        job.started_at = Some(Utc::now());
        job.cancel_requested = self.cancel_on_claim.load(Ordering::SeqCst);
        Ok(Some(job.clone()))
    }

    async fn get_job(&self, job_id: &JobId) -> ClientResult<Job> {
        self.jobs
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .ok_or_else(|| ClientError::api_error(404, "not found"))
    }

    async fn report_progress(&self, job_id: &JobId, report: &ProgressReport) -> ClientResult<Job> {
        self.injected("progress")?;
        let mut jobs = self.jobs.lock().unwrap();
        let job = Self::owned_mut(&mut jobs, job_id, &report.worker_id)?;

        if let Some(progress) = report.progress {
            job.progress = job.progress.max(progress.min(100));
        }
        if let Some(message) = &report.message {
            job.phase_message = Some(message.clone());
        }
        merge_outputs(&mut job.outputs, report.outputs.clone());
        job.metadata.extend(report.resolved.clone());

        let snapshot = job.clone();
        self.reports
            .lock()
            .unwrap()
            .push((job_id.clone(), report.clone()));
        Ok(snapshot)
    }

    async fn complete_job(
        &self,
        job_id: &JobId,
        worker_id: &str,
        outputs: Vec<OutputDescriptor>,
    ) -> ClientResult<Job> {
        self.injected("complete")?;
        let mut jobs = self.jobs.lock().unwrap();
        let job = Self::owned_mut(&mut jobs, job_id, worker_id)?;
        job.state = JobState::Done;
        job.progress = 100;
        merge_outputs(&mut job.outputs, outputs);
        job.completed_at = Some(Utc::now());
        Ok(job.clone())
    }

    async fn fail_job(
        &self,
        job_id: &JobId,
        worker_id: &str,
        failure: JobFailure,
    ) -> ClientResult<Job> {
        self.injected("fail")?;
        let mut jobs = self.jobs.lock().unwrap();
        let job = Self::owned_mut(&mut jobs, job_id, worker_id)?;
        job.state = JobState::Error;
        job.error_message = Some(failure.message);
        job.error_code = Some(failure.code);
        job.completed_at = Some(Utc::now());
        Ok(job.clone())
    }
}

/// What a scripted executor does on one call
pub enum Step {
    Succeed(Vec<OutputDescriptor>),
    /// Report these progress values, then succeed
    Report(Vec<u8>),
    Transient,
    Reject,
    /// Never answer
    Hang,
}

/// Executor that plays back a script, one step per call
///
/// Calls past the end of the script succeed with a single output.
pub struct ScriptedExecutor {
    name: String,
    script: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
}

impl ScriptedExecutor {
    pub fn new(name: &str, script: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

fn default_output(input: &StageInput) -> Vec<OutputDescriptor> {
    vec![OutputDescriptor::done(
        "main",
        format!("https://cdn.example/{}.bin", input.job_id),
    )]
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _binding: &ExecutorBinding,
        input: &StageInput,
        progress: ProgressSender,
    ) -> Result<StageOutput, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();

        match step {
            None => Ok(StageOutput {
                outputs: default_output(input),
            }),
            Some(Step::Succeed(outputs)) => Ok(StageOutput { outputs }),
            Some(Step::Report(values)) => {
                for value in values {
                    progress.percent(value);
                }
                Ok(StageOutput {
                    outputs: default_output(input),
                })
            }
            Some(Step::Transient) => Err(ExecutorError::transient("provider answered 503")),
            Some(Step::Reject) => Err(ExecutorError::Permanent {
                code: FailureCode::ProviderRejected,
                message: "Prompt violates the provider content policy".to_string(),
            }),
            Some(Step::Hang) => std::future::pending().await,
        }
    }
}
