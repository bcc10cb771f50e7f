//! Runner DTOs
//!
//! Data transfer objects for runner-related operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::runner::{Runner, RunnerStatus};

/// Request to register a runner with the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRunner {
    /// Unique identifier for the runner
    pub runner_id: String,

    /// What the runner can do ("source", "command", "privileged")
    pub capabilities: Vec<String>,
}

/// Summary information about a runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSummary {
    pub id: String,
    pub capabilities: Vec<String>,
    pub registered_at: DateTime<Utc>,

    /// Last time this runner sent a heartbeat
    pub last_heartbeat_at: DateTime<Utc>,
    pub status: RunnerStatus,
}

impl From<Runner> for RunnerSummary {
    fn from(runner: Runner) -> Self {
        RunnerSummary {
            id: runner.id,
            capabilities: runner.capabilities,
            registered_at: runner.registered_at,
            last_heartbeat_at: runner.last_heartbeat_at,
            status: runner.status,
        }
    }
}
