//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline definitions and for triggering runs.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use conveyor_core::domain::pipeline::Pipeline;
use conveyor_core::domain::run::PipelineRun;
use conveyor_core::dto::pipeline::{CreatePipeline, PipelineSummary};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::pipeline_service;
use crate::state::AppState;

/// POST /pipeline/create
/// Parse, validate and store a Lua pipeline definition
pub async fn create_pipeline(
    State(state): State<AppState>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<(StatusCode, Json<Pipeline>)> {
    tracing::info!("Creating pipeline from {} byte definition", req.definition.len());

    let pipeline = pipeline_service::create_pipeline(&state.pool, req).await?;

    Ok((StatusCode::CREATED, Json(pipeline)))
}

/// GET /pipeline/list
pub async fn list_pipelines(State(state): State<AppState>) -> ApiResult<Json<Vec<PipelineSummary>>> {
    tracing::debug!("Listing pipelines");

    let pipelines = pipeline_service::list_pipelines(&state.pool).await?;

    Ok(Json(pipelines.iter().map(PipelineSummary::from).collect()))
}

/// GET /pipeline/{id}
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::debug!("Getting pipeline: {}", id);

    let pipeline = pipeline_service::get_pipeline(&state.pool, id).await?;

    Ok(Json(pipeline))
}

/// DELETE /pipeline/{id}
pub async fn delete_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting pipeline: {}", id);

    pipeline_service::delete_pipeline(&state.pool, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /pipeline/{id}/run
/// Trigger a new run of the pipeline
pub async fn run_pipeline(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    tracing::info!("Triggering run of pipeline: {}", id);

    let run = state.runs.trigger(id).await?;

    Ok((StatusCode::CREATED, Json(run)))
}
