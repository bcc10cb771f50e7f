//! Job Repository
//!
//! Handles all database operations related to jobs.

use conveyor_core::domain::job::{Job, JobResult, JobSpec, JobStatus};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

/// Insert a new job
pub async fn create(pool: &PgPool, job: &Job) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO jobs (id, run_id, stage, action, spec, status, requested_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(job.id)
    .bind(job.run_id)
    .bind(&job.stage)
    .bind(&job.action)
    .bind(Json(&job.spec))
    .bind(status_to_string(job.status))
    .bind(job.requested_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a job by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, run_id, stage, action, spec, status, requested_at, started_at,
               completed_at, runner_id, result
        FROM jobs
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Find jobs by status, oldest first
pub async fn find_by_status(pool: &PgPool, status: JobStatus) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, run_id, stage, action, spec, status, requested_at, started_at,
               completed_at, runner_id, result
        FROM jobs
        WHERE status = $1
        ORDER BY requested_at ASC
        "#,
    )
    .bind(status_to_string(status))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Find the jobs a runner is currently executing
pub async fn find_running_by_runner(pool: &PgPool, runner_id: &str) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRow>(
        r#"
        SELECT id, run_id, stage, action, spec, status, requested_at, started_at,
               completed_at, runner_id, result
        FROM jobs
        WHERE runner_id = $1 AND status = $2
        "#,
    )
    .bind(runner_id)
    .bind("Running")
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Assign a queued job to a runner
///
/// Returns false when the job does not exist or is no longer queued, so two
/// runners can never claim the same job.
pub async fn claim(pool: &PgPool, job_id: Uuid, runner_id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $1, started_at = $2, runner_id = $3
        WHERE id = $4 AND status = $5
        "#,
    )
    .bind("Running")
    .bind(chrono::Utc::now())
    .bind(runner_id)
    .bind(job_id)
    .bind("Queued")
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record the result of a running job
///
/// Returns false when the job is not running anymore.
pub async fn complete(pool: &PgPool, job_id: Uuid, result: &JobResult) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $1, completed_at = $2, result = $3
        WHERE id = $4 AND status = $5
        "#,
    )
    .bind(status_to_string(result.status()))
    .bind(chrono::Utc::now())
    .bind(Json(result))
    .bind(job_id)
    .bind("Running")
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

/// Mark a job cancelled unless it already finished
pub async fn mark_cancelled(pool: &PgPool, job_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $1, completed_at = $2
        WHERE id = $3 AND status IN ('Queued', 'Running')
        "#,
    )
    .bind("Cancelled")
    .bind(chrono::Utc::now())
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Cancel every unfinished job, returning how many were touched
pub async fn cancel_unfinished(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $1, completed_at = $2
        WHERE status IN ('Queued', 'Running')
        "#,
    )
    .bind("Cancelled")
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "Queued",
        JobStatus::Running => "Running",
        JobStatus::Succeeded => "Succeeded",
        JobStatus::Failed => "Failed",
        JobStatus::Cancelled => "Cancelled",
        JobStatus::TimedOut => "TimedOut",
    }
}

fn string_to_status(s: &str) -> JobStatus {
    match s {
        "Queued" => JobStatus::Queued,
        "Running" => JobStatus::Running,
        "Succeeded" => JobStatus::Succeeded,
        "Failed" => JobStatus::Failed,
        "Cancelled" => JobStatus::Cancelled,
        "TimedOut" => JobStatus::TimedOut,
        _ => JobStatus::Failed,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    run_id: Uuid,
    stage: String,
    action: String,
    spec: Json<JobSpec>,
    status: String,
    requested_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    runner_id: Option<String>,
    result: Option<Json<JobResult>>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: row.id,
            run_id: row.run_id,
            stage: row.stage,
            action: row.action,
            spec: row.spec.0,
            status: string_to_status(&row.status),
            requested_at: row.requested_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            runner_id: row.runner_id,
            result: row.result.map(|r| r.0),
        }
    }
}
