//! Pipeline Service
//!
//! Business logic for pipeline definitions. The orchestrator parses every
//! definition itself, so a client preview is never trusted.

use conveyor_core::domain::pipeline::Pipeline;
use conveyor_core::dto::pipeline::CreatePipeline;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{pipeline_repository, run_repository};

/// Largest accepted definition source
const MAX_DEFINITION_SIZE: usize = 1024 * 1024;

/// Service error type
#[derive(Debug)]
pub enum PipelineError {
    NotFound(Uuid),
    ValidationError(String),
    Conflict(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::DatabaseError(err)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Parse, validate and store a pipeline definition
pub async fn create_pipeline(pool: &PgPool, req: CreatePipeline) -> Result<Pipeline> {
    validate_definition_source(&req.definition)?;

    let pipeline = conveyor_lua::parse_pipeline(&req.definition)
        .map_err(|e| PipelineError::ValidationError(format!("{:#}", e)))?;

    if pipeline_repository::exists_by_name(pool, &pipeline.name).await? {
        return Err(PipelineError::Conflict(format!(
            "Pipeline '{}' already exists",
            pipeline.name
        )));
    }

    pipeline_repository::create(pool, &pipeline, &req.definition).await?;

    tracing::info!(
        "Pipeline created: {} ({}) with {} stage(s)",
        pipeline.name,
        pipeline.id,
        pipeline.stages.len()
    );

    Ok(pipeline)
}

/// Get a pipeline by ID
pub async fn get_pipeline(pool: &PgPool, id: Uuid) -> Result<Pipeline> {
    pipeline_repository::find_by_id(pool, id)
        .await?
        .ok_or(PipelineError::NotFound(id))
}

/// List all pipelines
pub async fn list_pipelines(pool: &PgPool) -> Result<Vec<Pipeline>> {
    let pipelines = pipeline_repository::list_all(pool).await?;
    Ok(pipelines)
}

/// Delete a pipeline and its archived runs
///
/// Refused while any of its runs is unfinished.
pub async fn delete_pipeline(pool: &PgPool, id: Uuid) -> Result<()> {
    let active = run_repository::count_unfinished(pool, id).await?;
    if active > 0 {
        return Err(PipelineError::Conflict(format!(
            "Pipeline {} still has {} unfinished run(s)",
            id, active
        )));
    }

    let deleted = pipeline_repository::delete(pool, id).await?;

    if !deleted {
        return Err(PipelineError::NotFound(id));
    }

    tracing::info!("Pipeline deleted: {}", id);

    Ok(())
}

// =============================================================================
// Validation
// =============================================================================

fn validate_definition_source(source: &str) -> Result<()> {
    if source.trim().is_empty() {
        return Err(PipelineError::ValidationError(
            "Pipeline definition cannot be empty".to_string(),
        ));
    }

    if source.len() > MAX_DEFINITION_SIZE {
        return Err(PipelineError::ValidationError(format!(
            "Pipeline definition is too large (max {} bytes)",
            MAX_DEFINITION_SIZE
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_empty_definition() {
        assert!(matches!(
            validate_definition_source("   \n"),
            Err(PipelineError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_oversized_definition() {
        let source = "-".repeat(MAX_DEFINITION_SIZE + 1);
        assert!(validate_definition_source(&source).is_err());
    }

    #[test]
    fn test_validate_definition() {
        assert!(validate_definition_source("return pipeline.define { name = 'x' }").is_ok());
    }
}
