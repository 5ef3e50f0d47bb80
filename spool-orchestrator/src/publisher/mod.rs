//! Status Publisher
//!
//! Turns job store mutations into push events for subscribers.
//!
//! Each job with at least one subscriber has a `broadcast` channel. The
//! service layer calls [`StatusPublisher::publish`] with the snapshot that a
//! mutation returned; every open [`Subscription`] on that job receives it.
//! A background sweep closes subscriptions that stopped pulling events or
//! outlived their credential.

pub mod credential;
pub mod stream;

pub use credential::{CredentialError, CredentialIssuer};
pub use stream::Subscription;

use chrono::{DateTime, Utc};
use spool_core::domain::job::{Job, JobId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::repository::{JobStore, StoreError};

/// Snapshots buffered per job before a slow subscriber lags
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PublishError {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] CredentialError),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PublishError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(job_id) => PublishError::NotFound(job_id),
            other => PublishError::Store(other),
        }
    }
}

/// Last time a subscription's transport pulled an event
///
/// Stored as milliseconds since the publisher's epoch so it can live in an
/// atomic and follow tokio's (possibly paused) clock.
#[derive(Clone)]
pub(crate) struct AckClock {
    epoch: Instant,
    last_ack_ms: Arc<AtomicU64>,
}

impl AckClock {
    fn new(epoch: Instant) -> Self {
        let clock = Self {
            epoch,
            last_ack_ms: Arc::new(AtomicU64::new(0)),
        };
        clock.touch();
        clock
    }

    pub(crate) fn touch(&self) {
        let elapsed = Instant::now().duration_since(self.epoch).as_millis() as u64;
        self.last_ack_ms.store(elapsed, Ordering::Relaxed);
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let now_ms = now.duration_since(self.epoch).as_millis() as u64;
        Duration::from_millis(now_ms.saturating_sub(self.last_ack_ms.load(Ordering::Relaxed)))
    }
}

struct SubscriptionEntry {
    job_id: JobId,
    expires_at: DateTime<Utc>,
    ack: AckClock,
    close: CancellationToken,
}

/// Fans job snapshots out to live subscribers
pub struct StatusPublisher {
    store: Arc<dyn JobStore>,
    credentials: CredentialIssuer,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    channels: Mutex<HashMap<JobId, broadcast::Sender<Job>>>,
    subscriptions: Mutex<HashMap<u64, SubscriptionEntry>>,
    next_subscription_id: AtomicU64,
    epoch: Instant,
}

impl StatusPublisher {
    pub fn new(
        store: Arc<dyn JobStore>,
        credentials: CredentialIssuer,
        heartbeat_interval: Duration,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            store,
            credentials,
            heartbeat_interval,
            heartbeat_timeout,
            channels: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription_id: AtomicU64::new(1),
            epoch: Instant::now(),
        }
    }

    /// Open a subscription to `job_id`
    ///
    /// The channel is joined before the current snapshot is read, so no
    /// mutation can fall between the initial snapshot and the live events.
    ///
    /// # Arguments
    /// * `job_id` - Job to follow
    /// * `token` - Stream credential issued for that job
    pub async fn subscribe(
        self: &Arc<Self>,
        job_id: &JobId,
        token: &str,
    ) -> Result<Subscription, PublishError> {
        let expires_at = self.credentials.verify(job_id, token)?;

        let receiver = self.channel(job_id).subscribe();

        let snapshot = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(e) => {
                drop(receiver);
                self.prune_channel(job_id);
                return Err(e.into());
            }
        };

        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let ack = AckClock::new(self.epoch);
        let close = CancellationToken::new();

        lock(&self.subscriptions).insert(
            id,
            SubscriptionEntry {
                job_id: job_id.clone(),
                expires_at,
                ack: ack.clone(),
                close: close.clone(),
            },
        );

        tracing::debug!(job_id = %job_id, subscription = id, "Subscription opened");

        Ok(Subscription {
            id,
            publisher: Arc::clone(self),
            job_id: job_id.clone(),
            receiver,
            snapshot,
            expires_at,
            ack,
            close,
        })
    }

    /// Push a snapshot to every subscriber of its job
    ///
    /// A terminal snapshot also retires the job's channel; subscribers still
    /// drain everything already sent to them.
    pub fn publish(&self, job: &Job) {
        let mut channels = lock(&self.channels);

        if let Some(sender) = channels.get(&job.job_id) {
            let delivered = sender.send(job.clone()).unwrap_or(0);
            tracing::debug!(
                job_id = %job.job_id,
                state = %job.state,
                progress = job.progress,
                subscribers = delivered,
                "Published job snapshot"
            );
        }

        if job.is_terminal() {
            channels.remove(&job.job_id);
        }
    }

    /// Close stale and expired subscriptions, drop idle channels
    ///
    /// Returns the number of subscriptions closed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let wall_now = Utc::now();

        let closed: Vec<(u64, JobId)> = {
            let mut subscriptions = lock(&self.subscriptions);
            let stale: Vec<u64> = subscriptions
                .iter()
                .filter(|(_, entry)| {
                    entry.ack.idle_for(now) > self.heartbeat_timeout
                        || entry.expires_at <= wall_now
                })
                .map(|(id, _)| *id)
                .collect();

            stale
                .into_iter()
                .filter_map(|id| subscriptions.remove(&id).map(|entry| (id, entry)))
                .map(|(id, entry)| {
                    entry.close.cancel();
                    (id, entry.job_id)
                })
                .collect()
        };

        for (id, job_id) in &closed {
            tracing::info!(job_id = %job_id, subscription = id, "Closed stale subscription");
        }

        lock(&self.channels).retain(|_, sender| sender.receiver_count() > 0);

        closed.len()
    }

    /// Close every open subscription (server shutdown)
    pub fn close_all(&self) {
        for (_, entry) in lock(&self.subscriptions).drain() {
            entry.close.cancel();
        }
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.subscriptions).len()
    }

    pub fn channel_count(&self) -> usize {
        lock(&self.channels).len()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub(crate) fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub(crate) fn deregister(&self, id: u64, job_id: &JobId) {
        if lock(&self.subscriptions).remove(&id).is_some() {
            tracing::debug!(job_id = %job_id, subscription = id, "Subscription closed");
        }
        self.prune_channel(job_id);
    }

    fn channel(&self, job_id: &JobId) -> broadcast::Sender<Job> {
        lock(&self.channels)
            .entry(job_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn prune_channel(&self, job_id: &JobId) {
        let mut channels = lock(&self.channels);
        if channels
            .get(job_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(job_id);
        }
    }
}

/// Registry maps are never left half-updated, so a poisoned lock is usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
