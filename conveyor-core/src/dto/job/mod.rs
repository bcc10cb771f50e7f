//! Job DTOs for inter-service communication

use serde::{Deserialize, Serialize};

use crate::domain::job::JobResult;

/// Query sent by runners polling for work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJobsQuery {
    pub runner_id: String,
}

/// Request to claim a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimJob {
    pub runner_id: String,
}

/// Job result reported by the runner that executed it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteJob {
    pub runner_id: String,
    pub result: JobResult,
}
