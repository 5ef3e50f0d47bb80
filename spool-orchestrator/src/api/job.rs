//! Job API Handlers
//!
//! HTTP endpoints for submission, queries, cancellation and the worker-facing
//! lifecycle calls.

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
};
use spool_core::domain::job::{Job, JobId};
use spool_core::dto::job::{
    ClaimJob, CompleteJob, CreateJob, FailJob, JobCreated, JobFilter, ProgressReport,
    StreamCredential,
};

use crate::api::error::{ApiError, ApiResult};
use crate::service::job_service;
use crate::state::AppState;

// =============================================================================
// Submission and Queries
// =============================================================================

/// POST /jobs
/// Validate and enqueue a new job
pub async fn create_job(
    State(state): State<AppState>,
    body: Result<Json<CreateJob>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobCreated>)> {
    let Json(req) = body.map_err(bad_body)?;
    tracing::debug!("Submitting {} job", req.kind);

    let job = job_service::submit_job(&state, req).await?;

    Ok((StatusCode::CREATED, Json(JobCreated { job_id: job.job_id })))
}

/// GET /jobs/{id}
/// Current job snapshot
pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Job>> {
    let job_id = parse_job_id(&id)?;
    tracing::debug!("Getting job: {}", job_id);

    let job = job_service::get_job(&state, &job_id).await?;
    Ok(Json(job))
}

/// GET /jobs
/// Operator listing
///
/// Query parameters (all optional):
/// - `state`: queued | running | done | error
/// - `kind`: tts | render_batch | compose | quick_create_universe
/// - `since` / `until`: RFC 3339 bounds on `created_at`
/// - `limit`: maximum number of jobs returned
/// - `order`: newest_first (default) | oldest_first
pub async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<JobFilter>, QueryRejection>,
) -> ApiResult<Json<Vec<Job>>> {
    let Query(filter) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    tracing::debug!("Listing jobs: {:?}", filter);

    let jobs = job_service::list_jobs(&state, &filter).await?;
    Ok(Json(jobs))
}

/// GET /jobs/{id}/auth
/// Short-lived credential for the event stream
pub async fn stream_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StreamCredential>> {
    let job_id = parse_job_id(&id)?;

    let credential = job_service::issue_stream_credential(&state, &job_id).await?;
    Ok(Json(credential))
}

/// POST /jobs/{id}/cancel
/// Request cooperative cancellation
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job_id = parse_job_id(&id)?;
    tracing::info!("Cancelling job: {}", job_id);

    let job = job_service::cancel_job(&state, &job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

// =============================================================================
// Worker Endpoints
// =============================================================================

/// POST /jobs/{id}/claim
/// Take ownership of a queued job; 409 when another worker won
pub async fn claim_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ClaimJob>, JsonRejection>,
) -> ApiResult<Json<Job>> {
    let job_id = parse_job_id(&id)?;
    let Json(req) = body.map_err(bad_body)?;

    let job = job_service::claim_job(&state, &job_id, req).await?;
    Ok(Json(job))
}

/// POST /jobs/{id}/progress
pub async fn report_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ProgressReport>, JsonRejection>,
) -> ApiResult<Json<Job>> {
    let job_id = parse_job_id(&id)?;
    let Json(req) = body.map_err(bad_body)?;

    let job = job_service::report_progress(&state, &job_id, req).await?;
    Ok(Json(job))
}

/// POST /jobs/{id}/complete
pub async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<CompleteJob>, JsonRejection>,
) -> ApiResult<Json<Job>> {
    let job_id = parse_job_id(&id)?;
    let Json(req) = body.map_err(bad_body)?;

    let job = job_service::complete_job(&state, &job_id, req).await?;
    Ok(Json(job))
}

/// POST /jobs/{id}/fail
pub async fn fail_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<FailJob>, JsonRejection>,
) -> ApiResult<Json<Job>> {
    let job_id = parse_job_id(&id)?;
    let Json(req) = body.map_err(bad_body)?;

    let job = job_service::fail_job(&state, &job_id, req).await?;
    Ok(Json(job))
}

// =============================================================================
// Helper Functions
// =============================================================================

/// An id that cannot be parsed cannot name an existing job
pub(crate) fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    JobId::parse(raw).map_err(|_| ApiError::NotFound(format!("Job {} not found", raw)))
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}
