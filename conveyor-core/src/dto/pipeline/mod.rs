//! Pipeline DTOs for inter-service communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::Pipeline;

/// Request to create a new pipeline from a Lua definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub definition: String,
}

/// Pipeline as shown in listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub stages: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Pipeline> for PipelineSummary {
    fn from(pipeline: &Pipeline) -> Self {
        PipelineSummary {
            id: pipeline.id,
            name: pipeline.name.clone(),
            description: pipeline.description.clone(),
            stages: pipeline.stages.iter().map(|s| s.name.clone()).collect(),
            created_at: pipeline.created_at,
        }
    }
}
