//! Pipeline run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ArtifactRegistry;
use crate::domain::pipeline::Pipeline;

/// One execution instance of a pipeline
///
/// Owned by the run driver while the run is live; the orchestrator persists
/// snapshots of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub state: RunState,
    pub stages: Vec<StageRecord>,
    pub artifacts: ArtifactRegistry,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Creates a run in `NotStarted` with every output of the pipeline declared
    pub fn new(pipeline: &Pipeline) -> Self {
        let mut artifacts = ArtifactRegistry::new();
        for output in pipeline.outputs() {
            artifacts.declare(output);
        }

        Self {
            id: Uuid::new_v4(),
            pipeline_id: pipeline.id,
            pipeline_name: pipeline.name.clone(),
            state: RunState::NotStarted,
            stages: pipeline
                .stages
                .iter()
                .map(|s| StageRecord::new(s.name.clone()))
                .collect(),
            artifacts,
            requested_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Name of the stage the run is currently on, if any
    pub fn current_stage_name(&self) -> Option<&str> {
        self.state
            .stage()
            .and_then(|i| self.stages.get(i))
            .map(|s| s.name.as_str())
    }

    /// Failing stage name and cause, for failed runs
    pub fn failure(&self) -> Option<(&str, &str)> {
        match &self.state {
            RunState::Failed { stage, cause } => {
                let name = self.stages.get(*stage).map_or("?", |s| s.name.as_str());
                Some((name, cause.as_str()))
            }
            _ => None,
        }
    }
}

/// Run-level state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Running { stage: usize },
    AwaitingApproval { stage: usize },
    Succeeded,
    Failed { stage: usize, cause: String },
}

impl RunState {
    /// Succeeded and Failed are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed { .. })
    }

    /// Stage index the state refers to
    pub fn stage(&self) -> Option<usize> {
        match self {
            RunState::Running { stage }
            | RunState::AwaitingApproval { stage }
            | RunState::Failed { stage, .. } => Some(*stage),
            RunState::NotStarted | RunState::Succeeded => None,
        }
    }

    /// Short state name without the stage details
    pub fn name(&self) -> &'static str {
        match self {
            RunState::NotStarted => "NotStarted",
            RunState::Running { .. } => "Running",
            RunState::AwaitingApproval { .. } => "AwaitingApproval",
            RunState::Succeeded => "Succeeded",
            RunState::Failed { .. } => "Failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "NotStarted"),
            RunState::Running { stage } => write!(f, "Running({})", stage),
            RunState::AwaitingApproval { stage } => write!(f, "AwaitingApproval({})", stage),
            RunState::Succeeded => write!(f, "Succeeded"),
            RunState::Failed { stage, cause } => write!(f, "Failed({}, {:?})", stage, cause),
        }
    }
}

/// Per-stage execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    AwaitingApproval,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "Pending"),
            StageStatus::Running => write!(f, "Running"),
            StageStatus::Succeeded => write!(f, "Succeeded"),
            StageStatus::Failed => write!(f, "Failed"),
            StageStatus::AwaitingApproval => write!(f, "AwaitingApproval"),
        }
    }
}

/// Execution record of one stage within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,

    /// Number of times the stage was dispatched (retries included)
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StageRecord {
    pub fn new(name: String) -> Self {
        Self {
            name,
            status: StageStatus::Pending,
            attempts: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}
