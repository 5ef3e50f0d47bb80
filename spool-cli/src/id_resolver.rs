//! ID resolver module
//!
//! Lets users type a short, unambiguous prefix instead of a full job id.

use anyhow::{Context, Result, anyhow};
use spool_client::OrchestratorClient;
use spool_core::domain::job::JobId;
use spool_core::dto::job::JobFilter;

/// Resolve a job id or prefix to a full job id
///
/// An exact id wins even when it is also the prefix of another job.
/// Otherwise all jobs are fetched and matched by prefix.
///
/// # Errors
/// Returns an error if:
/// - The input contains characters no job id can contain
/// - No job matches the prefix
/// - Multiple jobs match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_job_id(client: &OrchestratorClient, input: &str) -> Result<JobId> {
    let candidate = JobId::parse(input).map_err(|e| anyhow!("{}", e))?;

    match client.get_job(&candidate).await {
        Ok(job) => return Ok(job.job_id),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e).context("Failed to look up job"),
    }

    let jobs = client
        .list_jobs(&JobFilter::default())
        .await
        .context("Failed to fetch jobs for ID resolution")?;

    match_prefix(jobs.iter().map(|j| &j.job_id), input)
}

/// Pick the single id starting with `prefix` (case-insensitive)
fn match_prefix<'a>(ids: impl Iterator<Item = &'a JobId>, prefix: &str) -> Result<JobId> {
    let prefix = prefix.to_lowercase();

    let matches: Vec<&JobId> = ids
        .filter(|id| id.as_str().to_lowercase().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No job found with ID starting with '{}'", prefix)),
        [only] => Ok((*only).clone()),
        _ => {
            let ids: Vec<&str> = matches.iter().map(|id| id.as_str()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
