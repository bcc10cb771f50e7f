//! Run-related API endpoints

use conveyor_core::domain::run::PipelineRun;
use conveyor_core::dto::log::RunLogEntry;
use conveyor_core::dto::run::{ListRuns, RunSummary};
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    /// List runs, optionally restricted to one pipeline
    pub async fn list_runs(&self, pipeline_id: Option<Uuid>) -> Result<Vec<RunSummary>> {
        let response = self
            .client
            .get(self.url("/run/list"))
            .query(&ListRuns { pipeline_id })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get the current snapshot of a run
    pub async fn get_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let response = self
            .client
            .get(self.url(&format!("/run/{}", run_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Run Transitions
    // =============================================================================
    //
    // Each transition answers 409 when the run is in the wrong state; see
    // `ClientError::is_conflict`.

    /// Approve the manual approval gate a run is waiting on
    pub async fn approve_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        self.transition(run_id, "approve").await
    }

    /// Reject the manual approval gate a run is waiting on
    pub async fn reject_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        self.transition(run_id, "reject").await
    }

    /// Cancel a running or waiting run
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        self.transition(run_id, "cancel").await
    }

    /// Re-run the failed stage of a run
    pub async fn retry_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        self.transition(run_id, "retry").await
    }

    async fn transition(&self, run_id: Uuid, action: &str) -> Result<PipelineRun> {
        let response = self
            .client
            .post(self.url(&format!("/run/{}/{}", run_id, action)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get the logs of every job of a run, oldest first
    pub async fn get_run_logs(&self, run_id: Uuid) -> Result<Vec<RunLogEntry>> {
        let response = self
            .client
            .get(self.url(&format!("/run/{}/logs", run_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }
}
