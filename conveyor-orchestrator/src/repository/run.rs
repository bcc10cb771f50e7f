//! Run Repository
//!
//! Archive of run snapshots. The live copy of a run belongs to its driver;
//! rows here are overwritten every time the driver publishes a new state.

use conveyor_core::domain::run::PipelineRun;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

/// State names of runs that have not finished yet
const UNFINISHED_STATES: [&str; 3] = ["NotStarted", "Running", "AwaitingApproval"];

/// Insert a new run
pub async fn create(pool: &PgPool, run: &PipelineRun) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO runs (id, pipeline_id, pipeline_name, state, snapshot, requested_at, completed_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(run.id)
    .bind(run.pipeline_id)
    .bind(&run.pipeline_name)
    .bind(run.state.name())
    .bind(Json(run))
    .bind(run.requested_at)
    .bind(run.completed_at)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Overwrite the archived snapshot of a run
pub async fn save(pool: &PgPool, run: &PipelineRun) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE runs
        SET state = $1, snapshot = $2, completed_at = $3, updated_at = $4
        WHERE id = $5
        "#,
    )
    .bind(run.state.name())
    .bind(Json(run))
    .bind(run.completed_at)
    .bind(chrono::Utc::now())
    .bind(run.id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Find a run by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<PipelineRun>, sqlx::Error> {
    let row = sqlx::query_as::<_, RunRow>("SELECT snapshot FROM runs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.into()))
}

/// List runs, newest first, optionally restricted to one pipeline
pub async fn list(pool: &PgPool, pipeline_id: Option<Uuid>) -> Result<Vec<PipelineRun>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT snapshot
        FROM runs
        WHERE ($1::uuid IS NULL OR pipeline_id = $1)
        ORDER BY requested_at DESC
        "#,
    )
    .bind(pipeline_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Runs whose archived state is not terminal
pub async fn find_unfinished(pool: &PgPool) -> Result<Vec<PipelineRun>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT snapshot
        FROM runs
        WHERE state = ANY($1)
        ORDER BY requested_at ASC
        "#,
    )
    .bind(&UNFINISHED_STATES[..])
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Number of unfinished runs of a pipeline
pub async fn count_unfinished(pool: &PgPool, pipeline_id: Uuid) -> Result<i64, sqlx::Error> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM runs WHERE pipeline_id = $1 AND state = ANY($2)")
            .bind(pipeline_id)
            .bind(&UNFINISHED_STATES[..])
            .fetch_one(pool)
            .await?;

    Ok(count)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    snapshot: Json<PipelineRun>,
}

impl From<RunRow> for PipelineRun {
    fn from(row: RunRow) -> Self {
        row.snapshot.0
    }
}
