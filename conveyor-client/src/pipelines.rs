//! Pipeline-related API endpoints

use conveyor_core::domain::pipeline::Pipeline;
use conveyor_core::domain::run::PipelineRun;
use conveyor_core::dto::pipeline::{CreatePipeline, PipelineSummary};
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    // =============================================================================
    // Pipeline Management
    // =============================================================================

    /// Create a new pipeline from a Lua definition
    ///
    /// Definition errors come back as a 400 with the reason.
    pub async fn create_pipeline(&self, req: CreatePipeline) -> Result<Pipeline> {
        let response = self
            .client
            .post(self.url("/pipeline/create"))
            .json(&req)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// List all pipelines
    pub async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>> {
        let response = self.client.get(self.url("/pipeline/list")).send().await?;

        self.handle_response(response).await
    }

    /// Get a pipeline by ID
    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline> {
        let response = self
            .client
            .get(self.url(&format!("/pipeline/{}", pipeline_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Delete a pipeline
    pub async fn delete_pipeline(&self, pipeline_id: Uuid) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/pipeline/{}", pipeline_id)))
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Trigger a new run of a pipeline
    ///
    /// # Returns
    /// The first snapshot of the run
    pub async fn run_pipeline(&self, pipeline_id: Uuid) -> Result<PipelineRun> {
        let response = self
            .client
            .post(self.url(&format!("/pipeline/{}/run", pipeline_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }
}
