//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod pipeline;
pub mod run;
pub mod runner;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Pipeline endpoints
        .route("/pipeline/create", post(pipeline::create_pipeline))
        .route("/pipeline/list", get(pipeline::list_pipelines))
        .route(
            "/pipeline/{id}",
            get(pipeline::get_pipeline).delete(pipeline::delete_pipeline),
        )
        .route("/pipeline/{id}/run", post(pipeline::run_pipeline))
        // Run endpoints
        .route("/run/list", get(run::list_runs))
        .route("/run/{id}", get(run::get_run))
        .route("/run/{id}/approve", post(run::approve_run))
        .route("/run/{id}/reject", post(run::reject_run))
        .route("/run/{id}/cancel", post(run::cancel_run))
        .route("/run/{id}/retry", post(run::retry_run))
        .route("/run/{id}/logs", get(run::get_run_logs))
        // Job endpoints
        .route("/job/list/scheduled", get(job::list_scheduled_jobs))
        .route("/job/execute/{id}", post(job::execute_job))
        .route("/job/{id}", get(job::get_job))
        .route("/job/{id}/complete", post(job::complete_job))
        .route(
            "/job/{id}/logs",
            get(job::get_job_logs).post(job::add_job_logs),
        )
        // Runner endpoints
        .route("/runner/register", post(runner::register_runner))
        .route("/runner/list", get(runner::list_runners))
        .route("/runner/{id}/heartbeat", post(runner::runner_heartbeat))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
