//! HTTP provider executor
//!
//! Talks to a generation gateway that exposes one endpoint per job kind:
//! `POST {provider_url}/{kind}` with `{job_id, kind, model, input}` and an
//! answer of `{outputs: [...]}`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use spool_core::domain::job::{JobId, JobKind};
use spool_core::domain::metadata::Metadata;
use spool_core::domain::output::OutputDescriptor;

use crate::executor::{ExecutorError, ProgressSender, StageExecutor, StageInput, StageOutput};
use crate::registry::ExecutorBinding;

#[derive(Debug, Serialize)]
struct ProviderRequest<'a> {
    job_id: &'a JobId,
    kind: JobKind,
    model: &'a str,
    input: &'a Metadata,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    outputs: Vec<OutputDescriptor>,
}

pub struct HttpStageExecutor {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpStageExecutor {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn endpoint(&self, kind: JobKind) -> String {
        format!("{}/{}", self.base_url, kind)
    }
}

#[async_trait]
impl StageExecutor for HttpStageExecutor {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        binding: &ExecutorBinding,
        input: &StageInput,
        progress: ProgressSender,
    ) -> Result<StageOutput, ExecutorError> {
        progress.step(5, format!("Sending request to {} ({})", self.name, binding.model));

        let request = ProviderRequest {
            job_id: &input.job_id,
            kind: input.kind,
            model: &binding.model,
            input: &input.metadata,
        };

        let response = self
            .client
            .post(self.endpoint(input.kind))
            .json(&request)
            .send()
            .await
            .map_err(|e| ExecutorError::transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body: ProviderResponse = response
            .json()
            .await
            .map_err(|e| ExecutorError::transient(format!("unreadable provider response: {}", e)))?;

        tracing::debug!(
            "Provider {} returned {} output(s) for job {}",
            self.name,
            body.outputs.len(),
            input.job_id
        );

        Ok(StageOutput {
            outputs: body.outputs,
        })
    }
}

/// Map a non-success provider answer to a retry class
fn classify_status(status: StatusCode, body: String) -> ExecutorError {
    let message = if body.trim().is_empty() {
        format!("provider answered {}", status)
    } else {
        format!("provider answered {}: {}", status, body.trim())
    };

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ExecutorError::Transient(message)
        }
        s if s.is_server_error() => ExecutorError::Transient(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ExecutorError::invalid_input(message)
        }
        _ => ExecutorError::rejected(message),
    }
}
