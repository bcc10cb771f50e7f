//! Job domain types
//!
//! A job is a unit of external work (a source checkout or a command list)
//! dispatched by the orchestrator and executed by a runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::{ArtifactContent, ResolvedInput};
use crate::domain::pipeline::CommandSpec;
use crate::error::StageError;

/// Exit code reported for jobs that exceeded their time budget
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Job execution record
///
/// Structure shared between orchestrator (persists) and runner (updates).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub run_id: Uuid,
    pub stage: String,
    pub action: String,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub runner_id: Option<String>,
    pub result: Option<JobResult>,
}

/// What a runner has to do for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSpec {
    Source(CheckoutRequest),
    Command(BuildRequest),
}

impl JobSpec {
    pub fn run_id(&self) -> Uuid {
        match self {
            JobSpec::Source(req) => req.run_id,
            JobSpec::Command(req) => req.run_id,
        }
    }

    pub fn stage(&self) -> &str {
        match self {
            JobSpec::Source(req) => &req.stage,
            JobSpec::Command(req) => &req.stage,
        }
    }

    pub fn action(&self) -> &str {
        match self {
            JobSpec::Source(req) => &req.action,
            JobSpec::Command(req) => &req.action,
        }
    }
}

/// Source checkout of one branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage: String,
    pub action: String,
    pub repository: String,
    pub branch: String,
    pub output: String,
}

/// Command list to run in an ephemeral build environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage: String,
    pub action: String,
    pub spec: CommandSpec,
    pub inputs: Vec<ResolvedInput>,
    pub output: Option<String>,
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Result of a job execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub exit_code: i32,
    pub artifact: Option<ArtifactContent>,
    pub error: Option<StageError>,
}

impl JobResult {
    pub fn succeeded(artifact: Option<ArtifactContent>) -> Self {
        Self {
            success: true,
            exit_code: 0,
            artifact,
            error: None,
        }
    }

    pub fn failed(error: StageError, exit_code: i32) -> Self {
        Self {
            success: false,
            exit_code,
            artifact: None,
            error: Some(error),
        }
    }

    /// Final job status implied by this result
    pub fn status(&self) -> JobStatus {
        if self.success {
            JobStatus::Succeeded
        } else if self.error == Some(StageError::Cancelled) {
            JobStatus::Cancelled
        } else if self.exit_code == TIMEOUT_EXIT_CODE {
            JobStatus::TimedOut
        } else {
            JobStatus::Failed
        }
    }

    /// Converts the result into what the stage adapter reports
    pub fn into_stage_result(self) -> Result<Option<ArtifactContent>, StageError> {
        if self.success {
            return Ok(self.artifact);
        }

        Err(self.error.unwrap_or_else(|| {
            StageError::execution(format!("job failed with exit code {}", self.exit_code))
        }))
    }
}
