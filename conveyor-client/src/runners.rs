//! Runner-related API endpoints

use conveyor_core::domain::runner::Runner;
use conveyor_core::dto::runner::{RegisterRunner, RunnerSummary};

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    // =============================================================================
    // Runner Registration & Lifecycle
    // =============================================================================

    /// Register a runner with the orchestrator
    ///
    /// Registering an existing ID refreshes its capabilities and heartbeat.
    pub async fn register_runner(
        &self,
        runner_id: &str,
        capabilities: Vec<String>,
    ) -> Result<Runner> {
        let response = self
            .client
            .post(self.url("/runner/register"))
            .json(&RegisterRunner {
                runner_id: runner_id.to_string(),
                capabilities,
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Send a heartbeat to the orchestrator
    pub async fn send_heartbeat(&self, runner_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/runner/{}/heartbeat", runner_id)))
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// List all registered runners
    pub async fn list_runners(&self) -> Result<Vec<RunnerSummary>> {
        let response = self.client.get(self.url("/runner/list")).send().await?;

        self.handle_response(response).await
    }
}
