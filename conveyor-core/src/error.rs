//! Error types for pipeline definition and execution

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::run::RunState;

/// Invalid pipeline definition
///
/// Detected at definition time, before any run starts. Never retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("pipeline name cannot be empty")]
    EmptyName,

    #[error("pipeline must have at least one stage")]
    EmptyPipeline,

    #[error("stage name cannot be empty")]
    EmptyStageName,

    #[error("stage '{0}' is defined more than once")]
    DuplicateStage(String),

    #[error("stage '{0}' has no actions")]
    EmptyStage(String),

    #[error("action '{action}' is defined more than once in stage '{stage}'")]
    DuplicateAction { stage: String, action: String },

    #[error(
        "action '{action}' in stage '{stage}' reads artifact '{artifact}', which no earlier stage produces"
    )]
    DanglingInput {
        stage: String,
        action: String,
        artifact: String,
    },

    #[error("artifact '{artifact}' is produced more than once (again by '{action}' in stage '{stage}')")]
    DuplicateOutput {
        stage: String,
        action: String,
        artifact: String,
    },

    #[error("manual approval '{action}' in stage '{stage}' {reason}")]
    InvalidApproval {
        stage: String,
        action: String,
        reason: String,
    },

    #[error("action '{action}' in stage '{stage}' is invalid: {reason}")]
    InvalidAction {
        stage: String,
        action: String,
        reason: String,
    },
}

/// Artifact registry misuse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("artifact '{0}' was never declared")]
    Unknown(String),

    #[error("artifact '{0}' is not bound yet")]
    Unbound(String),

    #[error("artifact '{0}' is already bound")]
    AlreadyBound(String),
}

/// Why a stage failed
///
/// The display string is the cause recorded in `RunState::Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageError {
    #[error("source unavailable: {repository}@{branch}: {reason}")]
    SourceUnavailable {
        repository: String,
        branch: String,
        reason: String,
    },

    #[error("execution failed: {message}")]
    Execution { message: String },

    #[error("unbound artifact '{artifact}'")]
    UnboundArtifact { artifact: String },

    #[error("approval timeout")]
    ApprovalTimeout,

    #[error("cancelled")]
    Cancelled,

    #[error("rejected")]
    Rejected,

    #[error("{reason}")]
    Interrupted { reason: String },
}

impl StageError {
    pub fn execution(message: impl Into<String>) -> Self {
        StageError::Execution {
            message: message.into(),
        }
    }
}

impl From<ArtifactError> for StageError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::Unbound(artifact) | ArtifactError::Unknown(artifact) => {
                StageError::UnboundArtifact { artifact }
            }
            ArtifactError::AlreadyBound(_) => StageError::execution(err.to_string()),
        }
    }
}

/// Illegal run state transition
///
/// Returned without mutating the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("run is not awaiting approval (current state: {0})")]
    NotAwaitingApproval(RunState),

    #[error("run has already been started (current state: {0})")]
    AlreadyStarted(RunState),

    #[error("run is not executing a stage (current state: {0})")]
    NotRunning(RunState),

    #[error("run has no failed stage to retry (current state: {0})")]
    NotFailed(RunState),

    #[error("run has already finished (state: {0})")]
    AlreadyFinished(RunState),
}

impl StateError {
    /// State the run was in when the transition was refused
    pub fn state(&self) -> &RunState {
        match self {
            StateError::NotAwaitingApproval(state)
            | StateError::AlreadyStarted(state)
            | StateError::NotRunning(state)
            | StateError::NotFailed(state)
            | StateError::AlreadyFinished(state) => state,
        }
    }
}
