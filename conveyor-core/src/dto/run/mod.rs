//! Run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunState};

/// Query parameters for listing runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRuns {
    pub pipeline_id: Option<Uuid>,
}

/// Run as shown in listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub state: RunState,

    /// Name of the stage the state refers to
    pub stage_name: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        RunSummary {
            id: run.id,
            pipeline_id: run.pipeline_id,
            pipeline_name: run.pipeline_name.clone(),
            state: run.state.clone(),
            stage_name: run.current_stage_name().map(str::to_string),
            requested_at: run.requested_at,
            completed_at: run.completed_at,
        }
    }
}
