//! Runner Repository
//!
//! Handles all database operations related to runners.

use conveyor_core::domain::runner::{Runner, RunnerStatus};
use conveyor_core::dto::runner::RegisterRunner;
use sqlx::PgPool;

/// Create or update a runner registration in the database
///
/// A re-registering runner keeps its original registration time.
pub async fn register(pool: &PgPool, req: RegisterRunner) -> Result<Runner, sqlx::Error> {
    let now = chrono::Utc::now();

    let row = sqlx::query_as::<_, RunnerRow>(
        r#"
        INSERT INTO runners (id, capabilities, registered_at, last_heartbeat_at, status)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO UPDATE SET
            capabilities = EXCLUDED.capabilities,
            last_heartbeat_at = EXCLUDED.last_heartbeat_at,
            status = EXCLUDED.status
        RETURNING id, capabilities, registered_at, last_heartbeat_at, status
        "#,
    )
    .bind(&req.runner_id)
    .bind(&req.capabilities)
    .bind(now)
    .bind(now)
    .bind("Online")
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

/// Update the last heartbeat time for a runner
pub async fn update_heartbeat(pool: &PgPool, runner_id: &str) -> Result<bool, sqlx::Error> {
    let now = chrono::Utc::now();

    let result = sqlx::query(
        r#"
        UPDATE runners
        SET last_heartbeat_at = $1, status = $2
        WHERE id = $3
        "#,
    )
    .bind(now)
    .bind("Online")
    .bind(runner_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Find a runner by ID
pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Runner>, sqlx::Error> {
    let row = sqlx::query_as::<_, RunnerRow>(
        r#"
        SELECT id, capabilities, registered_at, last_heartbeat_at, status
        FROM runners
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all runners
pub async fn list_all(pool: &PgPool) -> Result<Vec<Runner>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunnerRow>(
        r#"
        SELECT id, capabilities, registered_at, last_heartbeat_at, status
        FROM runners
        ORDER BY registered_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Mark runners as offline if they haven't sent a heartbeat recently
/// Returns the IDs of the runners marked as offline
pub async fn mark_stale_runners_offline(
    pool: &PgPool,
    timeout_seconds: i64,
) -> Result<Vec<String>, sqlx::Error> {
    let cutoff_time = chrono::Utc::now() - chrono::Duration::seconds(timeout_seconds);

    sqlx::query_scalar::<_, String>(
        r#"
        UPDATE runners
        SET status = $1
        WHERE last_heartbeat_at < $2 AND status != $3
        RETURNING id
        "#,
    )
    .bind("Offline")
    .bind(cutoff_time)
    .bind("Offline")
    .fetch_all(pool)
    .await
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunnerRow {
    id: String,
    capabilities: Vec<String>,
    registered_at: chrono::DateTime<chrono::Utc>,
    last_heartbeat_at: chrono::DateTime<chrono::Utc>,
    status: String,
}

impl From<RunnerRow> for Runner {
    fn from(row: RunnerRow) -> Self {
        let status = match row.status.as_str() {
            "Online" => RunnerStatus::Online,
            _ => RunnerStatus::Offline,
        };

        Runner {
            id: row.id,
            capabilities: row.capabilities,
            registered_at: row.registered_at,
            last_heartbeat_at: row.last_heartbeat_at,
            status,
        }
    }
}
