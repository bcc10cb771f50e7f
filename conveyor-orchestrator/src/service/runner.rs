//! Runner Service
//!
//! Business logic for runner management.

use conveyor_core::domain::runner::Runner;
use conveyor_core::dto::runner::RegisterRunner;
use sqlx::PgPool;

use crate::repository::runner_repository;

/// Capabilities a runner may report
pub const KNOWN_CAPABILITIES: [&str; 3] = ["source", "command", "privileged"];

/// Service error type
#[derive(Debug)]
pub enum RunnerError {
    NotFound(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for RunnerError {
    fn from(err: sqlx::Error) -> Self {
        RunnerError::DatabaseError(err)
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Register a runner with the orchestrator
///
/// This creates a new runner entry or updates an existing one.
/// When a runner re-registers, it updates its heartbeat.
pub async fn register_runner(pool: &PgPool, req: RegisterRunner) -> Result<Runner> {
    validate_register_request(&req)?;

    let runner = runner_repository::register(pool, req).await?;

    tracing::info!(
        "Runner registered: {} [{}]",
        runner.id,
        runner.capabilities.join(", ")
    );

    Ok(runner)
}

/// Update heartbeat for a runner
///
/// Keeps the runner marked as online. Should be called periodically by runners.
pub async fn update_heartbeat(pool: &PgPool, runner_id: &str) -> Result<()> {
    let updated = runner_repository::update_heartbeat(pool, runner_id).await?;

    if !updated {
        return Err(RunnerError::NotFound(runner_id.to_string()));
    }

    tracing::debug!("Heartbeat received from runner: {}", runner_id);

    Ok(())
}

/// List all runners
pub async fn list_runners(pool: &PgPool) -> Result<Vec<Runner>> {
    let runners = runner_repository::list_all(pool).await?;
    Ok(runners)
}

/// Mark stale runners as offline
///
/// Called periodically to mark runners that haven't sent a heartbeat
/// within `timeout_seconds` as offline. Returns the IDs of the runners that went offline.
pub async fn mark_stale_runners_offline(pool: &PgPool, timeout_seconds: i64) -> Result<Vec<String>> {
    let runner_ids = runner_repository::mark_stale_runners_offline(pool, timeout_seconds).await?;

    if !runner_ids.is_empty() {
        tracing::info!(
            "Marked {} runner(s) as offline: {}",
            runner_ids.len(),
            runner_ids.join(", ")
        );
    }

    Ok(runner_ids)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_register_request(req: &RegisterRunner) -> Result<()> {
    if req.runner_id.trim().is_empty() {
        return Err(RunnerError::ValidationError(
            "Runner ID cannot be empty".to_string(),
        ));
    }

    if req.runner_id.len() > 255 {
        return Err(RunnerError::ValidationError(
            "Runner ID is too long (max 255 characters)".to_string(),
        ));
    }

    if let Some(unknown) = req
        .capabilities
        .iter()
        .find(|c| !KNOWN_CAPABILITIES.contains(&c.as_str()))
    {
        return Err(RunnerError::ValidationError(format!(
            "Unknown capability '{}'",
            unknown
        )));
    }

    Ok(())
}
