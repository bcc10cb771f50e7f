//! Job API Handlers
//!
//! HTTP endpoints used by runners to pick up, execute and report jobs.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use conveyor_core::domain::job::Job;
use conveyor_core::domain::log::LogEntry;
use conveyor_core::dto::job::{ClaimJob, CompleteJob, ScheduledJobsQuery};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::log_service;
use crate::state::AppState;

// =============================================================================
// Job Lifecycle Endpoints
// =============================================================================

/// GET /job/list/scheduled
/// Queued jobs the polling runner is able to execute
pub async fn list_scheduled_jobs(
    State(state): State<AppState>,
    Query(params): Query<ScheduledJobsQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    tracing::debug!("Listing scheduled jobs for runner: {}", params.runner_id);

    let jobs = state.jobs.list_scheduled(&params.runner_id).await?;

    Ok(Json(jobs))
}

/// GET /job/{id}
/// Runners poll this to notice cancellation
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Job>> {
    tracing::debug!("Getting job: {}", id);

    Ok(Json(state.jobs.get(id).await?))
}

/// POST /job/execute/{id}
/// Claim a queued job for execution by a runner
pub async fn execute_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ClaimJob>,
) -> ApiResult<Json<Job>> {
    tracing::info!("Runner {} executing job: {}", req.runner_id, id);

    Ok(Json(state.jobs.claim(id, &req.runner_id).await?))
}

/// POST /job/{id}/complete
/// Report the result of a job
pub async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteJob>,
) -> ApiResult<StatusCode> {
    tracing::info!(
        "Completing job: {} with status {}",
        id,
        req.result.status()
    );

    state.jobs.complete(id, &req.runner_id, req.result).await?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Log Endpoints
// =============================================================================

/// GET /job/{id}/logs
pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    tracing::debug!("Getting logs for job: {}", id);

    let logs = log_service::get_job_logs(&state.pool, id).await?;

    Ok(Json(logs))
}

/// POST /job/{id}/logs
pub async fn add_job_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(logs): Json<Vec<LogEntry>>,
) -> ApiResult<StatusCode> {
    tracing::debug!("Adding {} log entries for job: {}", logs.len(), id);

    log_service::add_log_entries(&state.pool, id, logs).await?;

    Ok(StatusCode::CREATED)
}
