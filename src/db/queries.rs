use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::db::{CancelOutcome, StoreError};
use crate::models::job::{Job, JobKind, JobPayload, JobResult, JobStatus};

const JOB_COLUMNS: &str =
    "id, kind, status, payload, progress, result, error, claimed_by, created_at, updated_at";

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let payload: Json<JobPayload> = row.try_get("payload")?;
    let result: Option<Json<JobResult>> = row.try_get("result")?;
    let progress: i16 = row.try_get("progress")?;

    Ok(Job {
        id: row.try_get("id")?,
        kind: JobKind::from_str(&kind)
            .map_err(|_| StoreError::Decode(format!("unknown job kind '{kind}'")))?,
        status: JobStatus::from_str(&status)
            .map_err(|_| StoreError::Decode(format!("unknown job status '{status}'")))?,
        payload: payload.0,
        progress: progress.clamp(0, 100) as u8,
        result: result.map(|r| r.0),
        error: row.try_get("error")?,
        claimed_by: row.try_get("claimed_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new pending job
pub async fn insert_job(pool: &PgPool, job: &Job) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO creative_jobs (id, kind, status, payload, progress, created_at, updated_at)
        VALUES ($1, $2, 'pending', $3, 0, $4, $5)
        "#,
    )
    .bind(job.id)
    .bind(job.kind.to_string())
    .bind(Json(&job.payload))
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<Job>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM creative_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Exclusively claim a pending job for a worker
pub async fn claim_job(
    pool: &PgPool,
    job_id: Uuid,
    worker_id: &str,
) -> Result<Option<Job>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE creative_jobs
        SET status = 'running', claimed_by = $2, updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(worker_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Raise progress of a running job
pub async fn update_progress(pool: &PgPool, job_id: Uuid, progress: u8) -> Result<bool, StoreError> {
    let done = sqlx::query(
        r#"
        UPDATE creative_jobs
        SET progress = GREATEST(progress, $2), updated_at = NOW()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(job_id)
    .bind(i16::from(progress.min(100)))
    .execute(pool)
    .await?;

    Ok(done.rows_affected() > 0)
}

/// Record the result of a running job
pub async fn complete_job(
    pool: &PgPool,
    job_id: Uuid,
    result: &JobResult,
) -> Result<bool, StoreError> {
    let done = sqlx::query(
        r#"
        UPDATE creative_jobs
        SET status = 'completed', result = $2, error = NULL, progress = 100, updated_at = NOW()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(job_id)
    .bind(Json(result))
    .execute(pool)
    .await?;

    Ok(done.rows_affected() == 1)
}

/// Record the terminal error of a running job
pub async fn fail_job(pool: &PgPool, job_id: Uuid, error: &str) -> Result<bool, StoreError> {
    let done = sqlx::query(
        r#"
        UPDATE creative_jobs
        SET status = 'failed', error = $2, result = NULL, updated_at = NOW()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(job_id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(done.rows_affected() == 1)
}

/// Cancel a job that has not reached a terminal state
pub async fn cancel_job(pool: &PgPool, job_id: Uuid) -> Result<Option<CancelOutcome>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE creative_jobs
        SET status = 'cancelled', updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'running')
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = row {
        return Ok(Some(CancelOutcome::Cancelled(job_from_row(&row)?)));
    }

    Ok(get_job(pool, job_id)
        .await?
        .map(CancelOutcome::AlreadyTerminal))
}

/// Put a running job back to pending
pub async fn requeue_job(pool: &PgPool, job_id: Uuid) -> Result<bool, StoreError> {
    let done = sqlx::query(
        r#"
        UPDATE creative_jobs
        SET status = 'pending', claimed_by = NULL, progress = 0, updated_at = NOW()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(done.rows_affected() == 1)
}

/// Get pending jobs, oldest first (used to repopulate the broker)
pub async fn get_pending_job_ids(pool: &PgPool, limit: i64) -> Result<Vec<Uuid>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id FROM creative_jobs
        WHERE status = 'pending'
        ORDER BY created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| r.try_get("id").map_err(StoreError::from))
        .collect()
}
