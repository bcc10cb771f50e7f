//! Job-related API endpoints, used by runners

use conveyor_core::domain::job::{Job, JobResult};
use conveyor_core::domain::log::LogEntry;
use conveyor_core::dto::job::{ClaimJob, CompleteJob, ScheduledJobsQuery};
use uuid::Uuid;

use crate::OrchestratorClient;
use crate::error::Result;

impl OrchestratorClient {
    // =============================================================================
    // Job Lifecycle
    // =============================================================================

    /// List queued jobs, oldest first
    pub async fn list_scheduled_jobs(&self, runner_id: &str) -> Result<Vec<Job>> {
        let response = self
            .client
            .get(self.url("/job/list/scheduled"))
            .query(&ScheduledJobsQuery {
                runner_id: runner_id.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get a job by ID
    ///
    /// Runners poll this between commands to notice cancellation.
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        let response = self
            .client
            .get(self.url(&format!("/job/{}", job_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Claim a queued job
    ///
    /// Fails with a conflict when another runner claimed it first.
    pub async fn claim_job(&self, job_id: Uuid, runner_id: &str) -> Result<Job> {
        let response = self
            .client
            .post(self.url(&format!("/job/execute/{}", job_id)))
            .json(&ClaimJob {
                runner_id: runner_id.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Report the result of a job
    pub async fn complete_job(&self, job_id: Uuid, runner_id: &str, result: JobResult) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/job/{}/complete", job_id)))
            .json(&CompleteJob {
                runner_id: runner_id.to_string(),
                result,
            })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    // =============================================================================
    // Job Logs
    // =============================================================================

    /// Get logs for a job
    pub async fn get_job_logs(&self, job_id: Uuid) -> Result<Vec<LogEntry>> {
        let response = self
            .client
            .get(self.url(&format!("/job/{}/logs", job_id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Send log entries for a job
    pub async fn send_logs(&self, job_id: Uuid, entries: Vec<LogEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.url(&format!("/job/{}/logs", job_id)))
            .json(&entries)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
