//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific concern.

pub mod error;
pub mod events;
pub mod health;
pub mod job;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Submission and queries
        .route("/jobs", post(job::create_job).get(job::list_jobs))
        .route("/jobs/{id}", get(job::get_job))
        .route("/jobs/{id}/auth", get(job::stream_credential))
        .route("/jobs/{id}/events", get(events::job_events))
        .route("/jobs/{id}/cancel", post(job::cancel_job))
        // Worker endpoints
        .route("/jobs/{id}/claim", post(job::claim_job))
        .route("/jobs/{id}/progress", post(job::report_progress))
        .route("/jobs/{id}/complete", post(job::complete_job))
        .route("/jobs/{id}/fail", post(job::fail_job))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // Browser dashboards open the event stream cross-origin
        .layer(CorsLayer::permissive())
}
