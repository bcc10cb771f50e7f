//! Run API Handlers
//!
//! Status and external commands of pipeline runs. Refused transitions are
//! answered with 409 Conflict and leave the run untouched.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use conveyor_core::domain::run::PipelineRun;
use conveyor_core::dto::log::RunLogEntry;
use conveyor_core::dto::run::{ListRuns, RunSummary};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::log_service;
use crate::state::AppState;

/// GET /run/list
///
/// Query parameters:
/// - `pipeline_id` (optional): only runs of this pipeline
pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<ListRuns>,
) -> ApiResult<Json<Vec<RunSummary>>> {
    tracing::debug!("Listing runs (pipeline: {:?})", params.pipeline_id);

    let runs = state.runs.list(params.pipeline_id).await?;

    Ok(Json(runs.iter().map(RunSummary::from).collect()))
}

/// GET /run/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting run: {}", id);

    Ok(Json(state.runs.get(id).await?))
}

/// POST /run/{id}/approve
pub async fn approve_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::info!("Approving run: {}", id);

    Ok(Json(state.runs.approve(id).await?))
}

/// POST /run/{id}/reject
pub async fn reject_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::info!("Rejecting run: {}", id);

    Ok(Json(state.runs.reject(id).await?))
}

/// POST /run/{id}/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::info!("Cancelling run: {}", id);

    Ok(Json(state.runs.cancel(id).await?))
}

/// POST /run/{id}/retry
/// Re-run the failed stage of a run
pub async fn retry_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::info!("Retrying run: {}", id);

    Ok(Json(state.runs.retry(id).await?))
}

/// GET /run/{id}/logs
/// Logs of every job the run dispatched
pub async fn get_run_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<RunLogEntry>>> {
    tracing::debug!("Getting logs for run: {}", id);

    // 404 for unknown runs rather than an empty list
    state.runs.get(id).await?;

    let logs = log_service::get_run_logs(&state.pool, id).await?;

    Ok(Json(logs))
}
