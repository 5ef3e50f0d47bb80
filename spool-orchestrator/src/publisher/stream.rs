//! Per-subscription event stream

use chrono::{DateTime, Utc};
use futures::Stream;
use spool_core::domain::event::{ConnectionInfo, HeartbeatInfo, StreamEvent};
use spool_core::domain::job::{Job, JobId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{AckClock, StatusPublisher};

/// An open subscription to one job
///
/// Convert into a stream with [`Subscription::into_stream`]; dropping the
/// stream deregisters it. A subscription that is never streamed is reclaimed
/// by the sweep.
pub struct Subscription {
    pub(crate) id: u64,
    pub(crate) publisher: Arc<StatusPublisher>,
    pub(crate) job_id: JobId,
    pub(crate) receiver: broadcast::Receiver<Job>,
    pub(crate) snapshot: Job,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) ack: AckClock,
    pub(crate) close: CancellationToken,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("job_id", &self.job_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

enum Next {
    Close,
    Heartbeat,
    Snapshot(Job),
    Resync,
}

/// Deregisters the subscription when the stream goes away
struct Registration {
    id: u64,
    job_id: JobId,
    publisher: Arc<StatusPublisher>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.publisher.deregister(self.id, &self.job_id);
    }
}

impl Subscription {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Events for this subscription
    ///
    /// Emits `connection_established`, then the current snapshot, then live
    /// snapshots and heartbeats. Ends after a terminal snapshot, at credential
    /// expiry, or when the sweep closes the subscription.
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let Subscription {
            id,
            publisher,
            job_id,
            mut receiver,
            snapshot,
            expires_at,
            ack,
            close,
        } = self;

        let heartbeat_every = publisher.heartbeat_interval();
        let store = Arc::clone(publisher.store());
        let registration = Registration {
            id,
            job_id: job_id.clone(),
            publisher,
        };

        async_stream::stream! {
            let _registration = registration;

            yield StreamEvent::ConnectionEstablished(ConnectionInfo {
                job_id: job_id.clone(),
                expires_at,
                heartbeat_interval_ms: heartbeat_every.as_millis() as u64,
            });
            ack.touch();

            let mut last_delivered = snapshot.updated_at;
            let finished = snapshot.is_terminal();
            yield StreamEvent::for_snapshot(snapshot);
            if finished {
                return;
            }

            let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            let expiry = tokio::time::sleep_until(Instant::now() + remaining);
            tokio::pin!(expiry);

            let mut heartbeat =
                tokio::time::interval_at(Instant::now() + heartbeat_every, heartbeat_every);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ack.touch();

                let next = tokio::select! {
                    biased;
                    _ = close.cancelled() => Next::Close,
                    _ = &mut expiry => Next::Close,
                    received = receiver.recv() => match received {
                        Ok(job) => Next::Snapshot(job),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(job_id = %job_id, skipped, "Subscriber lagged, re-reading job");
                            Next::Resync
                        }
                        Err(RecvError::Closed) => Next::Close,
                    },
                    _ = heartbeat.tick() => Next::Heartbeat,
                };

                let job = match next {
                    Next::Close => break,
                    Next::Heartbeat => {
                        yield StreamEvent::Heartbeat(HeartbeatInfo { at: Utc::now() });
                        continue;
                    }
                    Next::Snapshot(job) => job,
                    Next::Resync => match store.get(&job_id).await {
                        Ok(job) => job,
                        Err(e) => {
                            tracing::warn!(job_id = %job_id, error = %e, "Failed to re-read job for lagged subscriber");
                            break;
                        }
                    },
                };

                if job.updated_at <= last_delivered {
                    continue;
                }
                last_delivered = job.updated_at;

                let finished = job.is_terminal();
                yield StreamEvent::for_snapshot(job);
                if finished {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::{CredentialIssuer, PublishError};
    use crate::repository::{JobPatch, JobStore, MemoryJobStore};
    use futures::StreamExt;
    use spool_core::domain::job::{JobKind, JobState};
    use spool_core::domain::metadata::Metadata;
    use spool_core::domain::event;

    struct Fixture {
        store: Arc<MemoryJobStore>,
        publisher: Arc<StatusPublisher>,
        credentials: CredentialIssuer,
    }

    fn fixture() -> Fixture {
        fixture_with_ttl(Duration::from_secs(600))
    }

    fn fixture_with_ttl(ttl: Duration) -> Fixture {
        let store = Arc::new(MemoryJobStore::new());
        let credentials = CredentialIssuer::new("publisher-test-secret", ttl);
        let publisher = Arc::new(StatusPublisher::new(
            store.clone(),
            credentials.clone(),
            Duration::from_secs(15),
            Duration::from_secs(45),
        ));
        Fixture {
            store,
            publisher,
            credentials,
        }
    }

    async fn create(store: &MemoryJobStore) -> Job {
        let mut metadata = Metadata::new();
        metadata.insert("text".to_string(), serde_json::json!("hello"));
        store.create(None, JobKind::Tts, metadata).await.unwrap()
    }

    async fn claim(store: &MemoryJobStore, job: &Job) -> Job {
        store
            .transition(
                &job.job_id,
                JobState::Queued,
                JobState::Running,
                JobPatch::claim("w1"),
            )
            .await
            .unwrap()
    }

    async fn report(store: &MemoryJobStore, job: &Job, progress: u8) -> Job {
        store
            .transition(
                &job.job_id,
                JobState::Running,
                JobState::Running,
                JobPatch {
                    progress: Some(progress),
                    ..JobPatch::claim("w1")
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_requires_valid_credential() {
        let f = fixture();
        let job = create(&f.store).await;

        let err = f
            .publisher
            .subscribe(&job.job_id, "garbage")
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Unauthorized(_)));
        assert_eq!(f.publisher.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_job() {
        let f = fixture();
        let job_id = JobId::parse("nope").unwrap();
        let credential = f.credentials.issue(&job_id).unwrap();

        let err = f
            .publisher
            .subscribe(&job_id, &credential.token)
            .await
            .unwrap_err();
        assert_eq!(err, PublishError::NotFound(job_id));
        assert_eq!(f.publisher.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_follows_job_to_terminal() {
        let f = fixture();
        let job = create(&f.store).await;
        let credential = f.credentials.issue(&job.job_id).unwrap();

        let subscription = f
            .publisher
            .subscribe(&job.job_id, &credential.token)
            .await
            .unwrap();
        let mut events = Box::pin(subscription.into_stream());

        let first = events.next().await.unwrap();
        assert_eq!(first.event_name(), event::CONNECTION_ESTABLISHED);

        let initial = events.next().await.unwrap();
        assert_eq!(initial, StreamEvent::Update(job.clone()));

        let running = claim(&f.store, &job).await;
        f.publisher.publish(&running);
        let halfway = report(&f.store, &job, 50).await;
        f.publisher.publish(&halfway);
        let done = f
            .store
            .transition(
                &job.job_id,
                JobState::Running,
                JobState::Done,
                JobPatch::claim("w1"),
            )
            .await
            .unwrap();
        f.publisher.publish(&done);

        assert_eq!(events.next().await.unwrap(), StreamEvent::Update(running));
        assert_eq!(events.next().await.unwrap(), StreamEvent::Update(halfway));
        assert_eq!(events.next().await.unwrap(), StreamEvent::Terminal(done));
        assert!(events.next().await.is_none());

        drop(events);
        assert_eq!(f.publisher.subscription_count(), 0);
        assert_eq!(f.publisher.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_matches_poll_shape() {
        let f = fixture();
        let job = create(&f.store).await;
        let credential = f.credentials.issue(&job.job_id).unwrap();
        let subscription = f
            .publisher
            .subscribe(&job.job_id, &credential.token)
            .await
            .unwrap();
        let mut events = Box::pin(subscription.into_stream());
        events.next().await.unwrap();

        let pushed = events.next().await.unwrap();
        let polled = f.store.get(&job.job_id).await.unwrap();
        assert_eq!(
            pushed.data().unwrap(),
            serde_json::to_string(&polled).unwrap()
        );
    }

    #[tokio::test]
    async fn test_stale_snapshots_are_skipped() {
        let f = fixture();
        let job = create(&f.store).await;
        let running = claim(&f.store, &job).await;
        let credential = f.credentials.issue(&job.job_id).unwrap();

        let subscription = f
            .publisher
            .subscribe(&job.job_id, &credential.token)
            .await
            .unwrap();
        let mut events = Box::pin(subscription.into_stream());
        events.next().await.unwrap();
        assert_eq!(
            events.next().await.unwrap(),
            StreamEvent::Update(running.clone())
        );

        // Already delivered as the initial snapshot
        f.publisher.publish(&running);
        let newer = report(&f.store, &job, 10).await;
        f.publisher.publish(&newer);

        assert_eq!(events.next().await.unwrap(), StreamEvent::Update(newer));
    }

    #[tokio::test]
    async fn test_terminal_job_closes_immediately() {
        let f = fixture();
        let job = create(&f.store).await;
        let cancelled = f.store.request_cancel(&job.job_id).await.unwrap();
        let credential = f.credentials.issue(&job.job_id).unwrap();

        let subscription = f
            .publisher
            .subscribe(&job.job_id, &credential.token)
            .await
            .unwrap();
        let events: Vec<StreamEvent> = subscription.into_stream().collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[1], StreamEvent::Terminal(cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_while_idle() {
        let f = fixture();
        let job = create(&f.store).await;
        let credential = f.credentials.issue(&job.job_id).unwrap();
        let subscription = f
            .publisher
            .subscribe(&job.job_id, &credential.token)
            .await
            .unwrap();
        let mut events = Box::pin(subscription.into_stream());
        events.next().await.unwrap();
        events.next().await.unwrap();

        let heartbeat = events.next().await.unwrap();
        assert_eq!(heartbeat.event_name(), event::HEARTBEAT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_closes_unacknowledged_subscription() {
        let f = fixture();
        let job = create(&f.store).await;
        let credential = f.credentials.issue(&job.job_id).unwrap();
        let subscription = f
            .publisher
            .subscribe(&job.job_id, &credential.token)
            .await
            .unwrap();
        let mut events = Box::pin(subscription.into_stream());
        events.next().await.unwrap();
        events.next().await.unwrap();

        assert_eq!(f.publisher.sweep(), 0);

        // The transport stops pulling events.
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(f.publisher.sweep(), 1);
        assert_eq!(f.publisher.subscription_count(), 0);

        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_ends_at_credential_expiry() {
        let f = fixture_with_ttl(Duration::from_secs(2));
        let job = create(&f.store).await;
        let credential = f.credentials.issue(&job.job_id).unwrap();
        let subscription = f
            .publisher
            .subscribe(&job.job_id, &credential.token)
            .await
            .unwrap();

        let events: Vec<StreamEvent> =
            tokio::time::timeout(Duration::from_secs(5), subscription.into_stream().collect())
                .await
                .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_a_no_op() {
        let f = fixture();
        let job = create(&f.store).await;
        f.publisher.publish(&job);
        assert_eq!(f.publisher.channel_count(), 0);
    }
}
