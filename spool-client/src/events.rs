//! Server-Sent Events reader for the live status stream
//!
//! Framing is handled by `eventsource-stream`; this module maps the named
//! events the orchestrator emits onto [`StreamEvent`].

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use spool_core::domain::event::{StreamEvent, StreamEventError};
use spool_core::dto::job::StreamCredential;

use crate::OrchestratorClient;
use crate::error::{ClientError, Result};

/// Decode one message; event names this client does not know are skipped
pub fn decode(raw: &Event) -> Option<Result<StreamEvent>> {
    match StreamEvent::from_parts(&raw.event, &raw.data) {
        Ok(event) => Some(Ok(event)),
        Err(StreamEventError::UnknownEvent(name)) => {
            tracing::debug!("Skipping unknown stream event '{}'", name);
            None
        }
        Err(e) => Some(Err(ClientError::StreamError(e.to_string()))),
    }
}

/// Turn a byte stream into decoded status events
///
/// A transport or framing error is yielded once and ends the stream.
pub fn event_stream<S, B, E>(chunks: S) -> impl Stream<Item = Result<StreamEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ClientError> + std::fmt::Display + Send,
{
    async_stream::stream! {
        let events = chunks.eventsource();
        futures::pin_mut!(events);

        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if let Some(decoded) = decode(&event) {
                        yield decoded;
                    }
                }
                Err(EventStreamError::Transport(e)) => {
                    yield Err(e.into());
                    return;
                }
                Err(e) => {
                    yield Err(ClientError::StreamError(e.to_string()));
                    return;
                }
            }
        }
    }
}

impl OrchestratorClient {
    /// Open the live status stream for the credential's job
    ///
    /// The stream ends when the server closes it: after the terminal event,
    /// when the credential expires, or when the subscription is swept.
    pub async fn open_events(
        &self,
        credential: &StreamCredential,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = self.url(&format!("/jobs/{}/events", credential.job_id));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&credential.token)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let response = Self::check_status(response).await?;
        tracing::debug!("Opened event stream for job {}", credential.job_id);

        Ok(event_stream(response.bytes_stream()).boxed())
    }
}
