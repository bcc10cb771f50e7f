//! Log Repository
//!
//! Handles all database operations related to job logs.

use conveyor_core::domain::log::{LogEntry, LogLevel};
use conveyor_core::dto::log::RunLogEntry;
use sqlx::PgPool;
use uuid::Uuid;

/// Add log entries for a job
pub async fn add_entries(
    pool: &PgPool,
    job_id: Uuid,
    entries: Vec<LogEntry>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO job_logs (job_id, timestamp, level, message)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(job_id)
        .bind(entry.timestamp)
        .bind(entry.level.to_string())
        .bind(&entry.message)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

/// Get all log entries for a job
pub async fn find_by_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<LogEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT timestamp, level, message
        FROM job_logs
        WHERE job_id = $1
        ORDER BY timestamp ASC, id ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Get the logs of every job of a run, in emission order
pub async fn find_by_run(pool: &PgPool, run_id: Uuid) -> Result<Vec<RunLogEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunLogRow>(
        r#"
        SELECT l.job_id, j.stage, j.action, l.timestamp, l.level, l.message
        FROM job_logs l
        JOIN jobs j ON j.id = l.job_id
        WHERE j.run_id = $1
        ORDER BY l.timestamp ASC, l.id ASC
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LogRow {
    timestamp: chrono::DateTime<chrono::Utc>,
    level: String,
    message: String,
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        LogEntry {
            timestamp: row.timestamp,
            level: row.level.parse().unwrap_or(LogLevel::Info),
            message: row.message,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunLogRow {
    job_id: Uuid,
    stage: String,
    action: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    level: String,
    message: String,
}

impl From<RunLogRow> for RunLogEntry {
    fn from(row: RunLogRow) -> Self {
        RunLogEntry {
            job_id: row.job_id,
            stage: row.stage,
            action: row.action,
            entry: LogEntry {
                timestamp: row.timestamp,
                level: row.level.parse().unwrap_or(LogLevel::Info),
                message: row.message,
            },
        }
    }
}
