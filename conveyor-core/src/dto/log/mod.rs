//! Log DTOs for inter-service communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::log::LogEntry;

/// Log batch sent from runner to orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatch {
    pub job_id: Uuid,
    pub entries: Vec<LogEntry>,
}

/// Log line of a run, tagged with the action that emitted it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub job_id: Uuid,
    pub stage: String,
    pub action: String,

    #[serde(flatten)]
    pub entry: LogEntry,
}
