//! Execution service
//!
//! Dispatches a claimed job to the executor for its kind.

use async_trait::async_trait;
use conveyor_client::OrchestratorClient;
use conveyor_core::domain::job::{Job, JobResult, JobSpec, JobStatus};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::context::Context;
use crate::service::capabilities;
use crate::service::{CommandExecutor, SourceExecutor};
use crate::store::ArtifactStore;

/// Exit code reported for jobs stopped because they were cancelled
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// Service trait for executing jobs
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes a claimed job
    ///
    /// Failures are part of the result; the job is always reported.
    async fn execute(&self, job: &Job, ctx: Arc<Context>) -> JobResult;
}

/// Tells whether the orchestrator gave up on a job
#[async_trait]
pub trait JobMonitor: Send + Sync {
    async fn is_cancelled(&self, job_id: Uuid) -> bool;
}

#[async_trait]
impl JobMonitor for OrchestratorClient {
    async fn is_cancelled(&self, job_id: Uuid) -> bool {
        match self.get_job(job_id).await {
            Ok(job) => job.status == JobStatus::Cancelled,
            Err(e) => {
                // Keep going; the result is ignored if the job was cancelled
                warn!("Failed to check status of job {}: {}", job_id, e);
                false
            }
        }
    }
}

/// Standard implementation of ExecutionService
pub struct StandardExecutionService {
    source: SourceExecutor,
    command: CommandExecutor,
}

impl StandardExecutionService {
    pub fn new(config: &Config, monitor: Arc<dyn JobMonitor>) -> Self {
        let store = ArtifactStore::new(&config.artifact_root);

        Self {
            source: SourceExecutor::new(
                store.clone(),
                config.git_image.clone(),
                config.source_base_url.clone(),
                Arc::clone(&monitor),
            ),
            command: CommandExecutor::new(store, config.cache_root.clone(), monitor),
        }
    }
}

#[async_trait]
impl ExecutionService for StandardExecutionService {
    async fn execute(&self, job: &Job, ctx: Arc<Context>) -> JobResult {
        match &job.spec {
            JobSpec::Source(request) => self.source.run(job.id, request, &ctx).await,
            JobSpec::Command(request) => self.command.run(job.id, request, &ctx).await,
        }
    }
}

/// Capabilities a runner needs to take a job
pub fn required_capabilities(spec: &JobSpec) -> Vec<String> {
    match spec {
        JobSpec::Source(_) => vec![capabilities::SOURCE.to_string()],
        JobSpec::Command(request) if request.spec.privileged => vec![
            capabilities::COMMAND.to_string(),
            capabilities::PRIVILEGED.to_string(),
        ],
        JobSpec::Command(_) => vec![capabilities::COMMAND.to_string()],
    }
}
