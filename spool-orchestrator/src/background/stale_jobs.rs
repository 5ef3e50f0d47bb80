//! Lost-worker detection
//!
//! A running job whose record has not changed for `stale_running_after` is
//! failed with code `worker_lost` so that it never stays `running` forever.

use tokio_util::sync::CancellationToken;

use crate::service::job_service;
use crate::state::AppState;

/// Run the stale-job sweep until `cancel` is triggered
pub async fn run(state: AppState, cancel: CancellationToken) {
    // Checking a few times per threshold bounds detection latency.
    let every = (state.config.stale_running_after / 4).max(std::time::Duration::from_secs(1));

    tracing::info!(
        threshold_secs = state.config.stale_running_after.as_secs(),
        "Stale job sweep started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stale job sweep stopping");
                break;
            }
            _ = interval.tick() => {
                match job_service::fail_stale_jobs(&state).await {
                    Ok(0) => tracing::debug!("Stale job sweep: all running jobs healthy"),
                    Ok(failed) => tracing::warn!(failed, "Stale job sweep: failed lost jobs"),
                    Err(e) => tracing::error!(error = %e, "Stale job sweep failed"),
                }
            }
        }
    }
}
