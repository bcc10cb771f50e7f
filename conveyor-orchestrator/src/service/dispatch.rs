//! Remote collaborators
//!
//! Source checkouts and command lists are not executed by the orchestrator.
//! These collaborators turn them into jobs and wait for a runner to report
//! back.

use async_trait::async_trait;
use conveyor_core::artifact::ArtifactContent;
use conveyor_core::domain::job::{BuildRequest, CheckoutRequest, JobSpec};
use conveyor_core::engine::{BuildService, SourceControl};
use conveyor_core::error::StageError;

use crate::service::job::JobQueue;

/// [`SourceControl`] served by runners through source jobs
pub struct RemoteSourceControl {
    queue: JobQueue,
}

impl RemoteSourceControl {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl SourceControl for RemoteSourceControl {
    async fn checkout(&self, request: CheckoutRequest) -> Result<ArtifactContent, StageError> {
        let repository = request.repository.clone();
        let branch = request.branch.clone();

        let result = self.queue.submit(JobSpec::Source(request)).await?;

        result
            .into_stage_result()?
            .ok_or_else(|| StageError::SourceUnavailable {
                repository,
                branch,
                reason: "checkout produced no snapshot".to_string(),
            })
    }
}

/// [`BuildService`] served by runners through command jobs
pub struct RemoteBuildService {
    queue: JobQueue,
}

impl RemoteBuildService {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl BuildService for RemoteBuildService {
    async fn run_ephemeral(
        &self,
        request: BuildRequest,
    ) -> Result<Option<ArtifactContent>, StageError> {
        let result = self.queue.submit(JobSpec::Command(request)).await?;
        result.into_stage_result()
    }
}
