//! Health Check API Handler
//!
//! Liveness plus a few gauges for monitoring.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub subscriptions: usize,
    pub channels: usize,
}

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        subscriptions: state.publisher.subscription_count(),
        channels: state.publisher.channel_count(),
    })
}
