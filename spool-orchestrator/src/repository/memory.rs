//! In-memory job store
//!
//! Used when no `DATABASE_URL` is configured, and by tests. State does not
//! survive a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spool_core::domain::job::{Job, JobId, JobKind, JobState};
use spool_core::domain::metadata::{Metadata, validate_metadata};
use spool_core::dto::job::JobFilter;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{JobPatch, JobStore, StoreError, StoreResult, apply_transition, finish_listing};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        job_id: Option<JobId>,
        kind: JobKind,
        metadata: Metadata,
    ) -> StoreResult<Job> {
        validate_metadata(kind, &metadata)?;

        let job_id = job_id.unwrap_or_else(JobId::generate);
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job_id) {
            return Err(StoreError::AlreadyExists(job_id));
        }

        let job = Job::new(job_id.clone(), kind, metadata, Utc::now());
        jobs.insert(job_id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<Job> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))
    }

    async fn transition(
        &self,
        job_id: &JobId,
        expected: JobState,
        next: JobState,
        patch: JobPatch,
    ) -> StoreResult<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;

        // Work on a copy so a rejected patch leaves the record untouched.
        let mut updated = job.clone();
        apply_transition(&mut updated, expected, next, patch, Utc::now())?;
        *job = updated.clone();
        Ok(updated)
    }

    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let jobs = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| filter.matches(job.state, job.kind, job.created_at))
            .cloned()
            .collect();
        Ok(finish_listing(jobs, filter))
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut jobs = self.jobs.write().await;
        let count = jobs.len();
        jobs.retain(|_, job| {
            !(job.is_terminal() && job.completed_at.is_some_and(|at| at < before))
        });
        Ok((count - jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use spool_core::domain::failure::{FailureCode, JobFailure};
    use spool_core::domain::metadata::MetadataError;
    use spool_core::dto::job::ListOrder;
    use std::sync::Arc;

    fn tts(text: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("text".to_string(), serde_json::json!(text));
        metadata
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryJobStore::new();
        let job = store.create(None, JobKind::Tts, tts("hello")).await.unwrap();

        let fetched = store.get(&job.job_id).await.unwrap();
        assert_eq!(fetched.state, JobState::Queued);
        assert_eq!(fetched.progress, 0);
        assert_eq!(fetched, job);
    }

    #[tokio::test]
    async fn test_create_rejects_missing_fields() {
        let store = MemoryJobStore::new();
        let err = store
            .create(None, JobKind::Tts, Metadata::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::InvalidMetadata(MetadataError::Missing {
                kind: JobKind::Tts,
                field: "text"
            })
        );
        assert!(store.list(&JobFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_caller_supplied_id_must_be_unused() {
        let store = MemoryJobStore::new();
        let id = JobId::parse("narration-1").unwrap();
        store
            .create(Some(id.clone()), JobKind::Tts, tts("a"))
            .await
            .unwrap();

        let err = store
            .create(Some(id.clone()), JobKind::Tts, tts("b"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists(id));
    }

    #[tokio::test]
    async fn test_get_unknown_job() {
        let store = MemoryJobStore::new();
        let id = JobId::parse("missing").unwrap();
        assert_eq!(store.get(&id).await, Err(StoreError::NotFound(id)));
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryJobStore::new());
        let job = store.create(None, JobKind::Tts, tts("hi")).await.unwrap();

        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = store.clone();
            let job_id = job.job_id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .transition(
                        &job_id,
                        JobState::Queued,
                        JobState::Running,
                        JobPatch::claim(format!("worker-{}", worker)),
                    )
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(StoreError::Conflict { .. }) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_rejected_patch_leaves_record_untouched() {
        let store = MemoryJobStore::new();
        let job = store.create(None, JobKind::Tts, tts("hi")).await.unwrap();
        store
            .transition(
                &job.job_id,
                JobState::Queued,
                JobState::Running,
                JobPatch::claim("w1"),
            )
            .await
            .unwrap();
        let before = store.get(&job.job_id).await.unwrap();

        let patch = JobPatch {
            progress: Some(50),
            ..JobPatch::claim("w2")
        };
        assert!(
            store
                .transition(&job.job_id, JobState::Running, JobState::Running, patch)
                .await
                .is_err()
        );
        assert_eq!(store.get(&job.job_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_list_filters_newest_first() {
        let store = MemoryJobStore::new();
        let first = store.create(None, JobKind::Tts, tts("one")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let mut clips = Metadata::new();
        clips.insert("clips".to_string(), serde_json::json!(["a.mp4"]));
        let second = store.create(None, JobKind::Compose, clips).await.unwrap();

        let all = store.list(&JobFilter::default()).await.unwrap();
        assert_eq!(all[0].job_id, second.job_id);
        assert_eq!(all[1].job_id, first.job_id);

        let tts_only = store
            .list(&JobFilter {
                kind: Some(JobKind::Tts),
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(tts_only.len(), 1);

        let limited = store
            .list(&JobFilter {
                limit: Some(1),
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let next = store
            .list(&JobFilter {
                limit: Some(1),
                order: ListOrder::OldestFirst,
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].job_id, first.job_id);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_fails_it() {
        let store = MemoryJobStore::new();
        let job = store.create(None, JobKind::Tts, tts("hi")).await.unwrap();

        let cancelled = store.request_cancel(&job.job_id).await.unwrap();
        assert_eq!(cancelled.state, JobState::Error);
        assert_eq!(cancelled.error_code, Some(FailureCode::Cancelled));
        assert!(cancelled.cancel_requested);
    }

    #[tokio::test]
    async fn test_cancel_running_job_sets_flag() {
        let store = MemoryJobStore::new();
        let job = store.create(None, JobKind::Tts, tts("hi")).await.unwrap();
        store
            .transition(
                &job.job_id,
                JobState::Queued,
                JobState::Running,
                JobPatch::claim("w1"),
            )
            .await
            .unwrap();

        let flagged = store.request_cancel(&job.job_id).await.unwrap();
        assert_eq!(flagged.state, JobState::Running);
        assert!(flagged.cancel_requested);

        // Idempotent
        let again = store.request_cancel(&job.job_id).await.unwrap();
        assert_eq!(again.updated_at, flagged.updated_at);
    }

    #[tokio::test]
    async fn test_recover_interrupted_keeps_queued() {
        let store = MemoryJobStore::new();
        let queued = store.create(None, JobKind::Tts, tts("a")).await.unwrap();
        let running = store.create(None, JobKind::Tts, tts("b")).await.unwrap();
        store
            .transition(
                &running.job_id,
                JobState::Queued,
                JobState::Running,
                JobPatch::claim("w1"),
            )
            .await
            .unwrap();

        let recovered = store
            .recover_interrupted(Utc::now() + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].error_code, Some(FailureCode::Interrupted));
        assert_eq!(
            store.get(&queued.job_id).await.unwrap().state,
            JobState::Queued
        );
    }

    #[tokio::test]
    async fn test_recover_interrupted_spares_live_workers() {
        let store = MemoryJobStore::new();
        let job = store.create(None, JobKind::Tts, tts("a")).await.unwrap();
        store
            .transition(
                &job.job_id,
                JobState::Queued,
                JobState::Running,
                JobPatch::claim("runner-0"),
            )
            .await
            .unwrap();

        let recovered = store
            .recover_interrupted(Utc::now() - Duration::minutes(5))
            .await
            .unwrap();
        assert!(recovered.is_empty());

        // The worker that kept running can still finish the job
        let done = store
            .transition(
                &job.job_id,
                JobState::Running,
                JobState::Done,
                JobPatch::default().with_worker("runner-0"),
            )
            .await
            .unwrap();
        assert_eq!(done.state, JobState::Done);
        assert_eq!(done.error_code, None);
    }

    #[tokio::test]
    async fn test_fail_stale_running() {
        let store = MemoryJobStore::new();
        let job = store.create(None, JobKind::Tts, tts("a")).await.unwrap();
        store
            .transition(
                &job.job_id,
                JobState::Queued,
                JobState::Running,
                JobPatch::claim("w1"),
            )
            .await
            .unwrap();

        let fresh = store
            .fail_stale_running(Utc::now() - Duration::minutes(5))
            .await
            .unwrap();
        assert!(fresh.is_empty());

        let stale = store
            .fail_stale_running(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].error_code, Some(FailureCode::WorkerLost));
    }

    #[tokio::test]
    async fn test_purge_terminal_only() {
        let store = MemoryJobStore::new();
        let done = store.create(None, JobKind::Tts, tts("a")).await.unwrap();
        let queued = store.create(None, JobKind::Tts, tts("b")).await.unwrap();
        store
            .transition(
                &done.job_id,
                JobState::Queued,
                JobState::Error,
                JobPatch::failure(JobFailure::cancelled()),
            )
            .await
            .unwrap();

        let purged = store
            .purge_terminal(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.get(&done.job_id).await.is_err());
        assert!(store.get(&queued.job_id).await.is_ok());
    }
}
