//! Pipeline Repository
//!
//! Pipelines are stored with their Lua source and the validated definition
//! it produced. The definition is what runs are built from.

use conveyor_core::domain::pipeline::Pipeline;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

/// Insert a validated pipeline together with the source it was parsed from
pub async fn create(pool: &PgPool, pipeline: &Pipeline, source: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO pipelines (id, name, description, source, definition, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(pipeline.id)
    .bind(&pipeline.name)
    .bind(&pipeline.description)
    .bind(source)
    .bind(Json(pipeline))
    .bind(pipeline.created_at)
    .bind(pipeline.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a pipeline by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>("SELECT definition FROM pipelines WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.into()))
}

/// Returns true if a pipeline with this name already exists
pub async fn exists_by_name(pool: &PgPool, name: &str) -> Result<bool, sqlx::Error> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pipelines WHERE name = $1)")
        .bind(name)
        .fetch_one(pool)
        .await?;

    Ok(exists)
}

/// List all pipelines, newest first
pub async fn list_all(pool: &PgPool) -> Result<Vec<Pipeline>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT definition
        FROM pipelines
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Delete a pipeline by ID, together with its archived runs
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pipelines WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    definition: Json<Pipeline>,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        row.definition.0
    }
}
