//! Live status stream
//!
//! `GET /jobs/{id}/events` as Server-Sent Events. The credential from
//! `GET /jobs/{id}/auth` is accepted as `?token=` (for `EventSource`, which
//! cannot set headers) or as an `Authorization: Bearer` header.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, header},
    response::sse::{Event, Sse},
};
use futures::{Stream, StreamExt, future};
use serde::Deserialize;
use spool_core::domain::event::StreamEvent;
use std::convert::Infallible;

use crate::api::error::{ApiError, ApiResult};
use crate::api::job::parse_job_id;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

/// GET /jobs/{id}/events
pub async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let job_id = parse_job_id(&id)?;

    let token = query
        .token
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| ApiError::Unauthorized("missing stream credential".to_string()))?;

    let subscription = state.publisher.subscribe(&job_id, &token).await?;
    tracing::info!("Streaming job {} until {}", job_id, subscription.expires_at());

    let events = subscription
        .into_stream()
        .filter_map(|event| future::ready(to_sse_event(&event).map(Ok)));

    Ok(Sse::new(events))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

fn to_sse_event(event: &StreamEvent) -> Option<Event> {
    let data = match event.data() {
        Ok(data) => data,
        Err(e) => {
            tracing::error!("Failed to encode {} event: {}", event.event_name(), e);
            return None;
        }
    };

    let mut sse = Event::default().event(event.event_name()).data(data);
    if let Some(job) = event.snapshot() {
        sse = sse.id(job.updated_at.timestamp_millis().to_string());
    }
    Some(sse)
}
