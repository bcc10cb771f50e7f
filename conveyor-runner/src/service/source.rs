//! Source checkouts
//!
//! Clones one branch of a repository with a throwaway git container straight
//! into the artifact store. The bundle is a plain snapshot without `.git`.

use conveyor_core::domain::job::{CheckoutRequest, JobResult};
use conveyor_core::error::StageError;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::Context;
use crate::podman::{self, Mount};
use crate::service::JobMonitor;
use crate::service::execution::CANCELLED_EXIT_CODE;
use crate::store::ArtifactStore;

/// Where the bundle is mounted inside the git container
const SNAPSHOT_DIR: &str = "/snapshot";

pub struct SourceExecutor {
    store: ArtifactStore,
    git_image: String,
    base_url: String,
    monitor: Arc<dyn JobMonitor>,
}

impl SourceExecutor {
    pub fn new(
        store: ArtifactStore,
        git_image: String,
        base_url: String,
        monitor: Arc<dyn JobMonitor>,
    ) -> Self {
        Self {
            store,
            git_image,
            base_url,
            monitor,
        }
    }

    pub async fn run(&self, job_id: Uuid, request: &CheckoutRequest, ctx: &Context) -> JobResult {
        let unavailable = |reason: String, exit_code: i32| {
            ctx.log_error(format!("Checkout failed: {}", reason));
            JobResult::failed(
                StageError::SourceUnavailable {
                    repository: request.repository.clone(),
                    branch: request.branch.clone(),
                    reason,
                },
                exit_code,
            )
        };

        if self.monitor.is_cancelled(job_id).await {
            ctx.log_warning("Job was cancelled before the checkout started");
            return JobResult::failed(StageError::Cancelled, CANCELLED_EXIT_CODE);
        }

        let location = ArtifactStore::location(request.run_id, &request.stage, &request.output);
        let bundle = match self.store.prepare_bundle(&location) {
            Ok(dir) => dir,
            Err(e) => return unavailable(format!("{:#}", e), 1),
        };

        let url = repository_url(&self.base_url, &request.repository);
        ctx.log_info(format!("Cloning {} (branch {})", url, request.branch));

        let mounts = [Mount::read_write(&bundle, SNAPSHOT_DIR)];
        let code = match podman::run_once(
            &self.git_image,
            &mounts,
            &clone_args(&url, &request.branch),
            ctx,
        )
        .await
        {
            Ok(code) => code,
            Err(e) => return unavailable(format!("{:#}", e), 1),
        };

        if code != 0 {
            return unavailable(format!("git clone exited with code {}", code), code);
        }

        let git_dir = bundle.join(".git");
        if git_dir.exists()
            && let Err(e) = std::fs::remove_dir_all(&git_dir)
        {
            return unavailable(format!("failed to strip .git: {}", e), 1);
        }

        match self.store.content(&location) {
            Ok(content) => {
                ctx.log_info(format!(
                    "Snapshot of {}@{} stored at {} ({} files)",
                    request.repository,
                    request.branch,
                    content.location,
                    content.files.len()
                ));
                JobResult::succeeded(Some(content))
            }
            Err(e) => unavailable(format!("{:#}", e), 1),
        }
    }
}

/// Clone URL of a repository
///
/// Full URLs are used as given; bare names are resolved against the base.
pub fn repository_url(base_url: &str, repository: &str) -> String {
    if repository.contains("://") || repository.starts_with("git@") {
        return repository.to_string();
    }

    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        repository.trim_start_matches('/')
    )
}

fn clone_args(url: &str, branch: &str) -> Vec<String> {
    [
        "clone",
        "--branch",
        branch,
        "--depth",
        "1",
        "--single-branch",
        url,
        SNAPSHOT_DIR,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
