//! Client-side job mirror
//!
//! Keeps a local copy of every job the client has seen, split into active and
//! completed collections. Push events and poll responses carry the same
//! snapshot shape and go through the same [`JobMirror::merge`], which is
//! keyed by job id and ordered by `updated_at` so replays and out-of-order
//! deliveries are harmless.

use serde::Serialize;
use spool_core::domain::job::{Job, JobId, JobState};
use std::collections::HashMap;

/// Severity of a user-facing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Success,
    Error,
}

impl NotificationKind {
    /// The only mapping from job state to severity; phase text plays no part
    pub fn for_state(state: JobState) -> Self {
        match state {
            JobState::Error => NotificationKind::Error,
            JobState::Done => NotificationKind::Success,
            JobState::Queued | JobState::Running => NotificationKind::Info,
        }
    }
}

/// Raised once per observed state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub job_id: JobId,
    pub kind: NotificationKind,
    pub state: JobState,
    pub message: String,
}

impl Notification {
    fn for_job(job: &Job) -> Self {
        let message = match job.state {
            JobState::Queued => format!("{} job queued", job.kind),
            JobState::Running => format!("{} job started", job.kind),
            JobState::Done => format!("{} job completed", job.kind),
            JobState::Error => job
                .error_message
                .clone()
                .unwrap_or_else(|| format!("{} job failed", job.kind)),
        };

        Self {
            job_id: job.job_id.clone(),
            kind: NotificationKind::for_state(job.state),
            state: job.state,
            message,
        }
    }
}

fn stage(state: JobState) -> u8 {
    match state {
        JobState::Queued => 0,
        JobState::Running => 1,
        JobState::Done | JobState::Error => 2,
    }
}

/// Local view of active and completed jobs
#[derive(Debug, Default)]
pub struct JobMirror {
    active: HashMap<JobId, Job>,
    completed: HashMap<JobId, Job>,
}

impl JobMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a snapshot from either transport
    ///
    /// Returns a notification when the snapshot moves the job into a state
    /// the mirror has not shown yet (including its first sighting). Snapshots
    /// older than the stored one, or equal to it in both `updated_at` and
    /// state, are dropped. A terminal job is never reopened.
    pub fn merge(&mut self, snapshot: Job) -> Option<Notification> {
        let previous = self.get(&snapshot.job_id);

        if let Some(previous) = previous {
            if previous.is_terminal() {
                return None;
            }
            if snapshot.updated_at < previous.updated_at {
                tracing::debug!("Dropping stale snapshot for job {}", snapshot.job_id);
                return None;
            }
            if snapshot.updated_at == previous.updated_at && snapshot.state == previous.state {
                return None;
            }
            // A skipped state (queued straight to done) is fine, a backwards
            // one only comes from a misordered delivery
            if stage(snapshot.state) < stage(previous.state) {
                return None;
            }
        }

        let state_changed = previous.is_none_or(|previous| previous.state != snapshot.state);
        let notification = state_changed.then(|| Notification::for_job(&snapshot));

        if snapshot.is_terminal() {
            self.active.remove(&snapshot.job_id);
            self.completed.insert(snapshot.job_id.clone(), snapshot);
        } else {
            self.active.insert(snapshot.job_id.clone(), snapshot);
        }

        notification
    }

    /// Latest known snapshot, active or completed
    pub fn get(&self, job_id: &JobId) -> Option<&Job> {
        self.active.get(job_id).or_else(|| self.completed.get(job_id))
    }

    pub fn active(&self) -> impl Iterator<Item = &Job> {
        self.active.values()
    }

    pub fn completed(&self) -> impl Iterator<Item = &Job> {
        self.completed.values()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Forget a completed job (dismissed by the user)
    pub fn dismiss(&mut self, job_id: &JobId) -> Option<Job> {
        self.completed.remove(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use spool_core::domain::failure::FailureCode;
    use spool_core::domain::job::JobKind;
    use spool_core::domain::metadata::Metadata;

    struct Timeline {
        job: Job,
    }

    impl Timeline {
        fn new(id: &str) -> Self {
            Self {
                job: Job::new(JobId::parse(id).unwrap(), JobKind::Tts, Metadata::new(), Utc::now()),
            }
        }

        fn next(&mut self, state: JobState, progress: u8, phase: Option<&str>) -> Job {
            self.job.state = state;
            self.job.progress = progress;
            self.job.phase_message = phase.map(str::to_string);
            self.job.updated_at += Duration::milliseconds(10);
            self.job.clone()
        }
    }

    #[test]
    fn test_one_notification_per_state_change() {
        let mut mirror = JobMirror::new();
        let mut timeline = Timeline::new("job-a");

        let queued = mirror.merge(timeline.job.clone()).unwrap();
        assert_eq!(queued.kind, NotificationKind::Info);
        assert_eq!(queued.state, JobState::Queued);

        let started = mirror.merge(timeline.next(JobState::Running, 0, None)).unwrap();
        assert_eq!(started.state, JobState::Running);

        for progress in [10, 40, 80] {
            assert!(mirror.merge(timeline.next(JobState::Running, progress, None)).is_none());
        }
        assert_eq!(mirror.get(&timeline.job.job_id).unwrap().progress, 80);

        let done = mirror.merge(timeline.next(JobState::Done, 100, None)).unwrap();
        assert_eq!(done.kind, NotificationKind::Success);
    }

    #[test]
    fn test_phase_text_never_raises_error() {
        let mut mirror = JobMirror::new();
        let mut timeline = Timeline::new("job-b");
        mirror.merge(timeline.next(JobState::Running, 10, None));

        let snapshot = timeline.next(
            JobState::Running,
            20,
            Some("Retrying (attempt 2/3) after provider error: 503"),
        );
        assert!(mirror.merge(snapshot).is_none());
        assert_eq!(mirror.active_count(), 1);
    }

    #[test]
    fn test_error_notification_carries_failure_message() {
        let mut mirror = JobMirror::new();
        let mut timeline = Timeline::new("job-c");
        mirror.merge(timeline.next(JobState::Running, 30, None));

        let mut failed = timeline.next(JobState::Error, 30, None);
        failed.error_message = Some("Provider rejected the prompt".to_string());
        failed.error_code = Some(FailureCode::ProviderRejected);

        let notification = mirror.merge(failed).unwrap();
        assert_eq!(notification.kind, NotificationKind::Error);
        assert_eq!(notification.message, "Provider rejected the prompt");
        assert_eq!(mirror.completed_count(), 1);
        assert_eq!(mirror.active_count(), 0);
    }

    #[test]
    fn test_duplicate_and_stale_snapshots_are_ignored() {
        let mut mirror = JobMirror::new();
        let mut timeline = Timeline::new("job-d");

        let early = timeline.next(JobState::Running, 10, None);
        let late = timeline.next(JobState::Running, 50, None);

        mirror.merge(late.clone());
        assert!(mirror.merge(late.clone()).is_none());
        assert!(mirror.merge(early).is_none());

        assert_eq!(mirror.active_count(), 1);
        assert_eq!(mirror.get(&late.job_id).unwrap().progress, 50);
    }

    #[test]
    fn test_completed_job_is_not_reopened() {
        let mut mirror = JobMirror::new();
        let mut timeline = Timeline::new("job-e");

        let running = timeline.next(JobState::Running, 60, None);
        let done = timeline.next(JobState::Done, 100, None);

        mirror.merge(done.clone());
        assert!(mirror.merge(running).is_none());
        assert!(mirror.merge(done.clone()).is_none());

        assert_eq!(mirror.active_count(), 0);
        assert_eq!(mirror.completed_count(), 1);
        assert_eq!(mirror.dismiss(&done.job_id).map(|job| job.state), Some(JobState::Done));
        assert!(mirror.get(&done.job_id).is_none());
    }

    #[test]
    fn test_missed_running_state() {
        let mut mirror = JobMirror::new();
        let mut timeline = Timeline::new("job-g");
        mirror.merge(timeline.job.clone());

        let done = mirror.merge(timeline.next(JobState::Done, 100, None)).unwrap();
        assert_eq!(done.state, JobState::Done);

        let mut late = timeline.job.clone();
        late.state = JobState::Running;
        late.updated_at += Duration::milliseconds(10);
        assert!(mirror.merge(late).is_none());
    }

    #[test]
    fn test_first_sighting_of_terminal_job_notifies_once() {
        let mut mirror = JobMirror::new();
        let mut timeline = Timeline::new("job-f");
        let done = timeline.next(JobState::Done, 100, None);

        assert_eq!(
            mirror.merge(done.clone()).map(|n| n.kind),
            Some(NotificationKind::Success)
        );
        assert!(mirror.merge(done).is_none());
    }
}
