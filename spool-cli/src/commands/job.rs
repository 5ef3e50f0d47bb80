//! Job command handlers
//!
//! Handles all job-related CLI commands including submission, listing,
//! viewing details and following a job until it finishes.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::*;
use serde_json::Value as JsonValue;
use spool_client::{JobMirror, JobWatcher, Notification, NotificationKind, OrchestratorClient};
use spool_core::domain::job::{Job, JobId, JobKind, JobState};
use spool_core::domain::metadata::{MODEL_KEY, Metadata, STYLE_KEY};
use spool_core::domain::output::OutputStatus;
use spool_core::dto::job::{CreateJob, JobFilter};

use crate::config::Config;
use crate::id_resolver::resolve_job_id;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Submit a new job
    Submit {
        /// Job kind: tts, render_batch, compose or quick_create_universe
        #[arg(short, long)]
        kind: JobKind,

        /// Style preset used to pick a default model
        #[arg(long)]
        style: Option<String>,

        /// Explicit model override
        #[arg(long)]
        model: Option<String>,

        /// Caller-chosen job id
        #[arg(long)]
        id: Option<String>,

        /// Metadata entries (KEY=VALUE, VALUE parsed as JSON when possible)
        #[arg(short = 'm', long = "meta", value_parser = parse_key_val)]
        metadata: Vec<(String, JsonValue)>,

        /// Follow the job until it finishes
        #[arg(short, long)]
        watch: bool,
    },
    /// List jobs, newest first
    List {
        /// Only jobs in this state
        #[arg(long)]
        state: Option<JobState>,

        /// Only jobs of this kind
        #[arg(long)]
        kind: Option<JobKind>,

        /// Only jobs created at or after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Maximum number of jobs shown
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Get job details
    Get {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Follow a job until it finishes
    Watch {
        /// Job ID or unambiguous prefix
        id: String,
    },
    /// Request cancellation
    Cancel {
        /// Job ID or unambiguous prefix
        id: String,
    },
}

/// Handle job commands
///
/// Routes job subcommands to their respective handlers.
///
/// # Arguments
/// * `command` - The job command to execute
/// * `config` - The CLI configuration
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        JobCommands::Submit {
            kind,
            style,
            model,
            id,
            metadata,
            watch,
        } => submit_job(&client, kind, style, model, id, metadata, watch).await,
        JobCommands::List {
            state,
            kind,
            since,
            limit,
        } => {
            let filter = JobFilter {
                state,
                kind,
                since,
                limit,
                ..JobFilter::default()
            };
            list_jobs(&client, &filter).await
        }
        JobCommands::Get { id } => get_job(&client, &id).await,
        JobCommands::Watch { id } => {
            let job_id = resolve_job_id(&client, &id).await?;
            watch_job(client, &job_id).await
        }
        JobCommands::Cancel { id } => cancel_job(&client, &id).await,
    }
}

/// Submit a job and optionally follow it
async fn submit_job(
    client: &OrchestratorClient,
    kind: JobKind,
    style: Option<String>,
    model: Option<String>,
    id: Option<String>,
    entries: Vec<(String, JsonValue)>,
    watch: bool,
) -> Result<()> {
    let mut metadata: Metadata = entries.into_iter().collect();
    if let Some(style) = style {
        metadata.insert(STYLE_KEY.to_string(), JsonValue::String(style));
    }
    if let Some(model) = model {
        metadata.insert(MODEL_KEY.to_string(), JsonValue::String(model));
    }

    let created = client
        .submit_job(CreateJob {
            kind,
            metadata,
            job_id: id,
        })
        .await
        .context("Failed to submit job")?;

    println!(
        "{} Submitted {} job {}",
        "✓".green(),
        kind,
        created.job_id.to_string().cyan()
    );

    if watch {
        println!();
        watch_job(client.clone(), &created.job_id).await?;
    }

    Ok(())
}

/// List jobs matching a filter
async fn list_jobs(client: &OrchestratorClient, filter: &JobFilter) -> Result<()> {
    let jobs = client.list_jobs(filter).await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

/// Get and display a single job
async fn get_job(client: &OrchestratorClient, id: &str) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;

    let job = client.get_job(&job_id).await?;

    print_job_details(&job);

    Ok(())
}

/// Request cancellation and show the resulting state
async fn cancel_job(client: &OrchestratorClient, id: &str) -> Result<()> {
    let job_id = resolve_job_id(client, id).await?;

    let job = client.cancel_job(&job_id).await?;

    if job.state.is_terminal() {
        println!(
            "{} Job {} is {}",
            "✓".green(),
            job.job_id.to_string().cyan(),
            colorize_state(&job.state)
        );
    } else {
        println!(
            "{} Cancellation requested for job {}; it stops at the worker's next check",
            "✓".green(),
            job.job_id.to_string().cyan()
        );
    }

    Ok(())
}

/// Follow a job over the live stream, falling back to polling
async fn watch_job(client: OrchestratorClient, job_id: &JobId) -> Result<()> {
    let watcher = JobWatcher::new(client);
    let mut mirror = JobMirror::new();

    let job = watcher
        .watch(job_id, &mut mirror, print_notification)
        .await
        .with_context(|| format!("Failed to follow job {}", job_id))?;

    println!();
    print_job_details(&job);

    if job.state == JobState::Error {
        return Err(anyhow!("Job {} failed", job.job_id));
    }

    Ok(())
}

/// Print a job summary
fn print_job_summary(job: &Job) {
    let state_colored = colorize_state(&job.state);

    println!("  {} Job {}", "▸".cyan(), job.job_id.to_string().dimmed());
    println!("    Kind:     {}", job.kind);
    println!("    State:    {} ({}%)", state_colored, job.progress);
    println!(
        "    Created:  {}",
        job.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    if let Some(worker) = &job.worker_id {
        println!("    Worker:   {}", worker.dimmed());
    }
    println!();
}

/// Print detailed job information
fn print_job_details(job: &Job) {
    let state_colored = colorize_state(&job.state);

    println!("{}", "Job Details:".bold());
    println!("  ID:          {}", job.job_id.to_string().cyan());
    println!("  Kind:        {}", job.kind);
    println!("  State:       {}", state_colored);
    println!("  Progress:    {}%", job.progress);
    println!("  Created:     {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));

    if let Some(started) = job.started_at {
        println!("  Started:     {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(completed) = job.completed_at {
        println!("  Completed:   {}", completed.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = job.started_at {
            let duration = completed.signed_duration_since(started);
            println!("  Duration:    {}s", duration.num_seconds());
        }
    }

    if let Some(worker) = &job.worker_id {
        println!("  Worker:      {}", worker);
    }

    if job.cancel_requested && !job.state.is_terminal() {
        println!("  Cancel:      {}", "requested".yellow());
    }

    if let Some(phase) = &job.phase_message {
        println!("  Phase:       {}", phase.dimmed());
    }

    if !job.metadata.is_empty() {
        println!("\n{}", "Metadata:".bold());
        for (key, value) in &job.metadata {
            println!("  {} = {}", key.cyan(), value);
        }
    }

    if !job.outputs.is_empty() {
        println!("\n{}", "Outputs:".bold());
        for output in &job.outputs {
            let status = match output.status {
                OutputStatus::Pending => "pending".dimmed(),
                OutputStatus::Running => "running".cyan(),
                OutputStatus::Done => "done".green(),
                OutputStatus::Error => "error".red(),
            };
            print!("  {} [{}]", output.id, status);
            if let Some(url) = &output.url {
                print!(" {}", url.dimmed());
            }
            println!();
        }
    }

    if let Some(error) = &job.error_message {
        println!("\n{}", "Error:".bold());
        match &job.error_code {
            Some(code) => println!("{} {}", format!("[{}]", code.as_str()).red(), error.red()),
            None => println!("{}", error.red()),
        }
    }
}

fn print_notification(notification: &Notification) {
    let marker = match notification.kind {
        NotificationKind::Info => "•".cyan(),
        NotificationKind::Success => "✓".green(),
        NotificationKind::Error => "✗".red(),
    };

    println!(
        "{} {} {}",
        marker,
        colorize_state(&notification.state),
        notification.message
    );
}

/// Colorize job state for display
fn colorize_state(state: &JobState) -> ColoredString {
    match state {
        JobState::Queued => state.as_str().yellow(),
        JobState::Running => state.as_str().cyan(),
        JobState::Done => state.as_str().green(),
        JobState::Error => state.as_str().red(),
    }
}

/// Parse a `KEY=VALUE` metadata entry
///
/// Values that are valid JSON keep their type (`count=3`, `voices=["a","b"]`);
/// anything else is taken as a plain string.
fn parse_key_val(s: &str) -> Result<(String, JsonValue), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;

    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in '{}'", s));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| JsonValue::String(value.to_string()));
    Ok((key.to_string(), value))
}
