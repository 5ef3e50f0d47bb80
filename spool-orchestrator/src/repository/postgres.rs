//! Postgres job store
//!
//! Compare-and-swap is a `SELECT ... FOR UPDATE` followed by an `UPDATE`
//! inside one transaction, so concurrent claims on the same row serialize.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use spool_core::domain::failure::FailureCode;
use spool_core::domain::job::{Job, JobId, JobKind, JobState};
use spool_core::domain::metadata::{Metadata, validate_metadata};
use spool_core::domain::output::OutputDescriptor;
use spool_core::dto::job::{JobFilter, ListOrder};
use sqlx::PgPool;

use super::{JobPatch, JobStore, StoreError, StoreResult, apply_transition};

const JOB_COLUMNS: &str = r#"
    job_id, kind, state, progress, phase_message, error_message, error_code,
    outputs, metadata, cancel_requested, worker_id,
    created_at, updated_at, started_at, completed_at
"#;

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Timestamps are stored with microsecond precision
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(
        &self,
        job_id: Option<JobId>,
        kind: JobKind,
        metadata: Metadata,
    ) -> StoreResult<Job> {
        validate_metadata(kind, &metadata)?;

        let job = Job::new(job_id.unwrap_or_else(JobId::generate), kind, metadata, now());
        let metadata = to_json(&job.metadata)?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (job_id, kind, state, progress, outputs, metadata,
                              cancel_requested, created_at, updated_at)
            VALUES ($1, $2, $3, 0, '[]'::jsonb, $4, FALSE, $5, $5)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(job.job_id.as_str())
        .bind(job.kind.as_str())
        .bind(job.state.as_str())
        .bind(metadata)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(job.job_id));
        }

        Ok(job)
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE job_id = $1",
            JOB_COLUMNS
        ))
        .bind(job_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound(job_id.clone()))?
            .try_into()
    }

    async fn transition(
        &self,
        job_id: &JobId,
        expected: JobState,
        next: JobState,
        patch: JobPatch,
    ) -> StoreResult<Job> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE job_id = $1 FOR UPDATE",
            JOB_COLUMNS
        ))
        .bind(job_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let mut job: Job = row
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))?
            .try_into()?;

        // Dropping `tx` on error rolls back and releases the row lock.
        apply_transition(&mut job, expected, next, patch, now())?;

        sqlx::query(
            r#"
            UPDATE jobs
            SET state = $1, progress = $2, phase_message = $3, error_message = $4,
                error_code = $5, outputs = $6, metadata = $7, cancel_requested = $8,
                worker_id = $9, updated_at = $10, started_at = $11, completed_at = $12
            WHERE job_id = $13
            "#,
        )
        .bind(job.state.as_str())
        .bind(i16::from(job.progress))
        .bind(&job.phase_message)
        .bind(&job.error_message)
        .bind(job.error_code.map(|code| code.as_str()))
        .bind(to_json(&job.outputs)?)
        .bind(to_json(&job.metadata)?)
        .bind(job.cancel_requested)
        .bind(&job.worker_id)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.job_id.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(job)
    }

    async fn list(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {} FROM jobs
            WHERE ($1::text IS NULL OR state = $1)
              AND ($2::text IS NULL OR kind = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at < $4)
            ORDER BY created_at {}
            LIMIT $5
            "#,
            JOB_COLUMNS,
            match filter.order {
                ListOrder::NewestFirst => "DESC",
                ListOrder::OldestFirst => "ASC",
            }
        ))
        .bind(filter.state.map(|state| state.as_str()))
        .bind(filter.kind.map(|kind| kind.as_str()))
        .bind(filter.since)
        .bind(filter.until)
        .bind(filter.limit.map(|limit| limit as i64))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn purge_terminal(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE state IN ('done', 'error') AND completed_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn to_json<T: serde::Serialize>(value: &T) -> StoreResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StoreError::InvalidPatch(e.to_string()))
}

fn corrupt(job_id: &str, what: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("job {}: {}", job_id, what))
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: String,
    kind: String,
    state: String,
    progress: i16,
    phase_message: Option<String>,
    error_message: Option<String>,
    error_code: Option<String>,
    outputs: serde_json::Value,
    metadata: serde_json::Value,
    cancel_requested: bool,
    worker_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row.job_id.as_str();
        let job_id = JobId::parse(id).map_err(|e| corrupt(id, e))?;
        let kind: JobKind = row.kind.parse().map_err(|e| corrupt(id, e))?;
        let state: JobState = row.state.parse().map_err(|e| corrupt(id, e))?;
        let progress = u8::try_from(row.progress)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| corrupt(id, format!("progress {} out of range", row.progress)))?;
        let error_code = match row.error_code.as_deref() {
            Some(code) => Some(
                FailureCode::parse(code)
                    .ok_or_else(|| corrupt(id, format!("unknown failure code '{}'", code)))?,
            ),
            None => None,
        };
        let outputs: Vec<OutputDescriptor> =
            serde_json::from_value(row.outputs).map_err(|e| corrupt(id, e))?;
        let metadata: Metadata =
            serde_json::from_value(row.metadata).map_err(|e| corrupt(id, e))?;

        Ok(Job {
            job_id,
            kind,
            state,
            progress,
            phase_message: row.phase_message,
            error_message: row.error_message,
            error_code,
            outputs,
            metadata,
            cancel_requested: row.cancel_requested,
            worker_id: row.worker_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}
