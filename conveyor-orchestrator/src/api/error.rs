//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::{job_service, log_service, pipeline_service, run_service, runner_service};

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    DatabaseError(sqlx::Error),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(err)
    }
}

impl From<pipeline_service::PipelineError> for ApiError {
    fn from(err: pipeline_service::PipelineError) -> Self {
        match err {
            pipeline_service::PipelineError::NotFound(id) => {
                ApiError::NotFound(format!("Pipeline {} not found", id))
            }
            pipeline_service::PipelineError::ValidationError(msg) => ApiError::BadRequest(msg),
            pipeline_service::PipelineError::Conflict(msg) => ApiError::Conflict(msg),
            pipeline_service::PipelineError::DatabaseError(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<run_service::RunError> for ApiError {
    fn from(err: run_service::RunError) -> Self {
        match err {
            run_service::RunError::NotFound(id) => ApiError::NotFound(format!("Run {} not found", id)),
            run_service::RunError::PipelineNotFound(id) => {
                ApiError::NotFound(format!("Pipeline {} not found", id))
            }
            run_service::RunError::InvalidTransition(err) => ApiError::Conflict(err.to_string()),
            run_service::RunError::DatabaseError(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<job_service::JobError> for ApiError {
    fn from(err: job_service::JobError) -> Self {
        match err {
            job_service::JobError::NotFound(id) => ApiError::NotFound(format!("Job {} not found", id)),
            job_service::JobError::InvalidState(msg) => ApiError::Conflict(msg),
            job_service::JobError::ValidationError(msg) => ApiError::BadRequest(msg),
            job_service::JobError::DatabaseError(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<log_service::LogError> for ApiError {
    fn from(err: log_service::LogError) -> Self {
        match err {
            log_service::LogError::JobNotFound(id) => {
                ApiError::NotFound(format!("Job {} not found", id))
            }
            log_service::LogError::ValidationError(msg) => ApiError::BadRequest(msg),
            log_service::LogError::DatabaseError(err) => ApiError::DatabaseError(err),
        }
    }
}

impl From<runner_service::RunnerError> for ApiError {
    fn from(err: runner_service::RunnerError) -> Self {
        match err {
            runner_service::RunnerError::NotFound(id) => {
                ApiError::NotFound(format!("Runner {} not found", id))
            }
            runner_service::RunnerError::ValidationError(msg) => ApiError::BadRequest(msg),
            runner_service::RunnerError::DatabaseError(err) => ApiError::DatabaseError(err),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::run::RunState;
    use conveyor_core::error::StateError;
    use uuid::Uuid;

    #[test]
    fn test_invalid_transition_is_conflict() {
        let err: ApiError = run_service::RunError::InvalidTransition(
            StateError::NotAwaitingApproval(RunState::Succeeded),
        )
        .into();

        assert!(matches!(&err, ApiError::Conflict(msg) if msg.contains("not awaiting approval")));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_status_codes() {
        let id = Uuid::new_v4();
        let not_found: ApiError = run_service::RunError::NotFound(id).into();
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let invalid: ApiError =
            pipeline_service::PipelineError::ValidationError("bad".to_string()).into();
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);

        let taken: ApiError = job_service::JobError::InvalidState("claimed".to_string()).into();
        assert_eq!(taken.into_response().status(), StatusCode::CONFLICT);
    }
}
