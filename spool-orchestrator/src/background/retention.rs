//! Periodic garbage collection of finished jobs
//!
//! Deletes terminal jobs whose `completed_at` is older than the configured
//! retention window.

use tokio_util::sync::CancellationToken;

use crate::service::job_service;
use crate::state::AppState;

/// Run the retention loop until `cancel` is triggered
pub async fn run(state: AppState, cancel: CancellationToken) {
    let every = state.config.retention_sweep_interval;

    tracing::info!(
        retention_secs = state.config.retention.as_secs(),
        interval_secs = every.as_secs(),
        "Job retention task started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                match job_service::purge_expired(&state).await {
                    Ok(0) => tracing::debug!("Job retention: nothing to purge"),
                    Ok(deleted) => tracing::info!(deleted, "Job retention: purged finished jobs"),
                    Err(e) => tracing::error!(error = %e, "Job retention: purge failed"),
                }
            }
        }
    }
}
