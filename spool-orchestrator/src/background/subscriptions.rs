//! Subscription cleanup
//!
//! Closes subscriptions whose transport stopped pulling events within the
//! heartbeat timeout or whose credential expired. Runs independently of job
//! processing.

use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Run the subscription sweep until `cancel` is triggered
pub async fn run(state: AppState, cancel: CancellationToken) {
    let every = state.config.subscription_sweep_interval;

    tracing::info!(interval_secs = every.as_secs(), "Subscription sweep started");

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Subscription sweep stopping");
                break;
            }
            _ = interval.tick() => {
                let closed = state.publisher.sweep();
                if closed > 0 {
                    tracing::info!(closed, "Subscription sweep: closed stale subscriptions");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::repository::MemoryJobStore;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_cancel() {
        let mut config = Config::default();
        config.subscription_sweep_interval = Duration::from_secs(1);
        let state = AppState::new(Arc::new(MemoryJobStore::new()), config);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(state, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
