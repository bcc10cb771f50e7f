//! Runner API Handlers
//!
//! HTTP endpoints for runner management and lifecycle.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use conveyor_core::domain::runner::Runner;
use conveyor_core::dto::runner::{RegisterRunner, RunnerSummary};

use crate::api::error::ApiResult;
use crate::service::runner_service;
use crate::state::AppState;

/// POST /runner/register
/// Register a runner with the orchestrator
pub async fn register_runner(
    State(state): State<AppState>,
    Json(req): Json<RegisterRunner>,
) -> ApiResult<Json<Runner>> {
    tracing::info!("Registering runner: {}", req.runner_id);

    let runner = runner_service::register_runner(&state.pool, req).await?;

    Ok(Json(runner))
}

/// POST /runner/{id}/heartbeat
/// Keep a runner marked as online
pub async fn runner_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    runner_service::update_heartbeat(&state.pool, &id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /runner/list
pub async fn list_runners(State(state): State<AppState>) -> ApiResult<Json<Vec<RunnerSummary>>> {
    tracing::debug!("Listing runners");

    let runners = runner_service::list_runners(&state.pool).await?;

    Ok(Json(runners.into_iter().map(RunnerSummary::from).collect()))
}
