//! Spool HTTP Client
//!
//! A type-safe HTTP client for the Spool orchestrator API, plus the pieces a
//! front end needs to mirror job state: an SSE reader for the live status
//! stream, a reconciliation layer that turns snapshots into notifications,
//! and a watcher that keeps a job in sync with streaming and polling
//! fallback.
//!
//! The runner uses the same client for its worker-facing calls.
//!
//! # Example
//!
//! ```no_run
//! use spool_client::{JobMirror, JobWatcher, OrchestratorClient};
//! use spool_core::domain::job::JobKind;
//! use spool_core::dto::job::CreateJob;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let created = client.submit_job(CreateJob {
//!         kind: JobKind::Tts,
//!         metadata: [("text".to_string(), "hello".into())].into(),
//!         job_id: None,
//!     }).await?;
//!
//!     let mut mirror = JobMirror::new();
//!     let watcher = JobWatcher::new(client);
//!     let job = watcher
//!         .watch(&created.job_id, &mut mirror, |n| println!("{}", n.message))
//!         .await?;
//!
//!     println!("Finished as {}", job.state);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod events;
mod jobs;
pub mod reconcile;
pub mod watch;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use reconcile::{JobMirror, Notification, NotificationKind};
pub use watch::{JobWatcher, StatusSource, WatchConfig};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Spool orchestrator API
///
/// Methods are organized into groups:
/// - Submission and queries (submit, get, list, cancel)
/// - Worker lifecycle (claim, progress, complete, fail)
/// - Live status (stream credential, event stream)
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the orchestrator API (e.g., "http://localhost:8080")
    ///
    /// # Example
    /// ```
    /// use spool_client::OrchestratorClient;
    ///
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new orchestrator client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    /// Keep in mind that a total request timeout also bounds how long the
    /// event stream can stay open.
    ///
    /// # Example
    /// ```
    /// use spool_client::OrchestratorClient;
    /// use reqwest::Client;
    /// use std::time::Duration;
    ///
    /// let http_client = Client::builder()
    ///     .connect_timeout(Duration::from_secs(5))
    ///     .build()
    ///     .unwrap();
    ///
    /// let client = OrchestratorClient::with_client("http://localhost:8080", http_client);
    /// ```
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Fail with an API error unless the status is a success
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(response)
    }

    /// Handle an API response and deserialize JSON
    ///
    /// This method checks the status code and returns an appropriate error if
    /// the request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
