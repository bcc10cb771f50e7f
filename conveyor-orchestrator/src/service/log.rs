//! Log Service
//!
//! Business logic for job log management.

use conveyor_core::domain::log::LogEntry;
use conveyor_core::dto::log::RunLogEntry;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{job_repository, log_repository};

const MAX_MESSAGE_LENGTH: usize = 10_000;
const MAX_BATCH_SIZE: usize = 1000;

/// Service error type
#[derive(Debug)]
pub enum LogError {
    JobNotFound(Uuid),
    ValidationError(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for LogError {
    fn from(err: sqlx::Error) -> Self {
        LogError::DatabaseError(err)
    }
}

pub type Result<T> = std::result::Result<T, LogError>;

/// Add log entries for a job
pub async fn add_log_entries(pool: &PgPool, job_id: Uuid, entries: Vec<LogEntry>) -> Result<()> {
    validate_log_entries(&entries)?;

    if entries.is_empty() {
        return Ok(());
    }

    if job_repository::find_by_id(pool, job_id).await?.is_none() {
        return Err(LogError::JobNotFound(job_id));
    }

    let count = entries.len();
    log_repository::add_entries(pool, job_id, entries).await?;

    tracing::debug!("Added {} log entries for job: {}", count, job_id);

    Ok(())
}

/// Get all log entries for a job
pub async fn get_job_logs(pool: &PgPool, job_id: Uuid) -> Result<Vec<LogEntry>> {
    if job_repository::find_by_id(pool, job_id).await?.is_none() {
        return Err(LogError::JobNotFound(job_id));
    }

    let logs = log_repository::find_by_job(pool, job_id).await?;
    Ok(logs)
}

/// Get the logs of every job of a run
pub async fn get_run_logs(pool: &PgPool, run_id: Uuid) -> Result<Vec<RunLogEntry>> {
    let logs = log_repository::find_by_run(pool, run_id).await?;
    Ok(logs)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_log_entries(entries: &[LogEntry]) -> Result<()> {
    if entries.len() > MAX_BATCH_SIZE {
        return Err(LogError::ValidationError(format!(
            "Too many log entries in batch (max: {})",
            MAX_BATCH_SIZE
        )));
    }

    for (i, entry) in entries.iter().enumerate() {
        if entry.message.len() > MAX_MESSAGE_LENGTH {
            return Err(LogError::ValidationError(format!(
                "Log entry {} message too long (max: {} chars)",
                i, MAX_MESSAGE_LENGTH
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::log::LogLevel;

    #[test]
    fn test_validate_log_entries_valid() {
        let entries = vec![
            LogEntry::now(LogLevel::Info, "$ make build"),
            LogEntry::now(LogLevel::Error, "make: *** [build] Error 2"),
        ];

        assert!(validate_log_entries(&entries).is_ok());
    }

    #[test]
    fn test_validate_log_entries_too_many() {
        let entries: Vec<LogEntry> = (0..MAX_BATCH_SIZE + 1)
            .map(|i| LogEntry::now(LogLevel::Debug, format!("line {}", i)))
            .collect();

        assert!(matches!(
            validate_log_entries(&entries),
            Err(LogError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_log_entries_message_too_long() {
        let entries = vec![LogEntry::now(LogLevel::Info, "x".repeat(MAX_MESSAGE_LENGTH + 1))];
        assert!(validate_log_entries(&entries).is_err());
    }

    #[test]
    fn test_validate_empty_batch() {
        assert!(validate_log_entries(&[]).is_ok());
    }
}
