//! Command jobs
//!
//! Builds and deploys run the same way: a fresh container per job with the
//! primary input copied into `/workspace`, every input mounted read-only
//! under `/inputs/<name>` and the stage caches mounted. Commands run one by
//! one through `sh -c`; the first non-zero exit fails the job. The output
//! globs are then collected from the workspace into the artifact store.

use anyhow::{Context as _, Result};
use conveyor_core::domain::job::{BuildRequest, JobResult};
use conveyor_core::error::StageError;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache;
use crate::context::Context;
use crate::podman::{Container, ContainerSpec, Mount, WORKSPACE_DIR};
use crate::service::JobMonitor;
use crate::service::execution::CANCELLED_EXIT_CODE;
use crate::store::{self, ArtifactStore};

/// Collected when an output is declared without artifact globs
const DEFAULT_ARTIFACT_PATTERN: &str = "*";

pub struct CommandExecutor {
    store: ArtifactStore,
    cache_root: PathBuf,
    monitor: Arc<dyn JobMonitor>,
}

impl CommandExecutor {
    pub fn new(store: ArtifactStore, cache_root: PathBuf, monitor: Arc<dyn JobMonitor>) -> Self {
        Self {
            store,
            cache_root,
            monitor,
        }
    }

    pub async fn run(&self, job_id: Uuid, request: &BuildRequest, ctx: &Context) -> JobResult {
        match self.try_run(job_id, request, ctx).await {
            Ok(result) => result,
            Err(e) => {
                let message = format!("{:#}", e);
                ctx.log_error(message.clone());
                JobResult::failed(StageError::execution(message), 1)
            }
        }
    }

    async fn try_run(&self, job_id: Uuid, request: &BuildRequest, ctx: &Context) -> Result<JobResult> {
        self.prepare_workspace(request, ctx)?;

        let spec = self.container_spec(job_id, request, ctx)?;
        ctx.log_info(format!(
            "Starting {}container from {}",
            if spec.privileged { "privileged " } else { "" },
            spec.image
        ));
        let container = Container::start(&spec).await?;

        let total = request.spec.commands.len();
        for (index, command) in request.spec.commands.iter().enumerate() {
            if self.monitor.is_cancelled(job_id).await {
                ctx.log_warning(format!(
                    "Job was cancelled, skipping the remaining {} command(s)",
                    total - index
                ));
                return Ok(JobResult::failed(StageError::Cancelled, CANCELLED_EXIT_CODE));
            }

            ctx.log_info(format!("$ {}", command));
            let code = container.exec_shell(command, ctx).await?;

            if code != 0 {
                let message = format!(
                    "command {} of {} exited with code {}: {}",
                    index + 1,
                    total,
                    code,
                    command
                );
                ctx.log_error(message.clone());
                return Ok(JobResult::failed(StageError::execution(message), code));
            }
        }

        let artifact = match &request.output {
            Some(output) => {
                let location = ArtifactStore::location(request.run_id, &request.stage, output);
                let content = self
                    .store
                    .collect(ctx.workspace(), &artifact_patterns(request), &location)
                    .with_context(|| format!("Failed to collect artifact '{}'", output))?;

                ctx.log_info(format!(
                    "Stored {} file(s) as '{}' at {}",
                    content.files.len(),
                    output,
                    content.location
                ));
                Some(content)
            }
            None => None,
        };

        Ok(JobResult::succeeded(artifact))
    }

    /// Creates the workspace and seeds it with the primary input
    fn prepare_workspace(&self, request: &BuildRequest, ctx: &Context) -> Result<()> {
        let workspace = ctx.workspace();
        std::fs::create_dir_all(workspace)
            .with_context(|| format!("Failed to create workspace {}", workspace.display()))?;

        if let Some(primary) = request.inputs.first() {
            let copied = store::copy_tree(&self.store.path(&primary.content.location), workspace)
                .with_context(|| format!("Failed to copy input '{}' into the workspace", primary.name))?;

            ctx.log_info(format!("Copied {} file(s) of '{}' into {}", copied, primary.name, WORKSPACE_DIR));
        }

        Ok(())
    }

    fn container_spec(&self, job_id: Uuid, request: &BuildRequest, ctx: &Context) -> Result<ContainerSpec> {
        let mut spec = ContainerSpec::new(job_id, request.spec.image.clone());
        spec.privileged = request.spec.privileged;
        spec.env = container_env(request);

        spec.mounts.push(Mount::read_write(ctx.workspace(), WORKSPACE_DIR));
        for input in &request.inputs {
            spec.mounts.push(Mount::read_only(
                self.store.path(&input.content.location),
                format!("/inputs/{}", store::path_component(&input.name)),
            ));
        }

        let caches = cache::mounts(
            &self.cache_root,
            &request.pipeline_name,
            &request.stage,
            &request.spec.cache_paths,
        )
        .context("Failed to prepare cache directories")?;
        spec.mounts.extend(caches);

        Ok(spec)
    }
}

/// Environment of a command container
///
/// The action's own variables come first; the `CONVEYOR_*` variables
/// describing the job take precedence over them.
pub fn container_env(request: &BuildRequest) -> Vec<(String, String)> {
    let mut env: BTreeMap<String, String> = request
        .spec
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    env.insert("CONVEYOR_RUN_ID".to_string(), request.run_id.to_string());
    env.insert("CONVEYOR_PIPELINE".to_string(), request.pipeline_name.clone());
    env.insert("CONVEYOR_STAGE".to_string(), request.stage.clone());
    env.insert("CONVEYOR_ACTION".to_string(), request.action.clone());

    if let Some(target) = &request.spec.target {
        env.insert("CONVEYOR_DEPLOY_TARGET".to_string(), target.clone());
    }

    env.into_iter().collect()
}

fn artifact_patterns(request: &BuildRequest) -> Vec<String> {
    if request.spec.artifacts.is_empty() {
        vec![DEFAULT_ARTIFACT_PATTERN.to_string()]
    } else {
        request.spec.artifacts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conveyor_core::artifact::{ArtifactContent, ResolvedInput};
    use conveyor_core::domain::pipeline::CommandSpec;
    use tempfile::TempDir;

    struct NeverCancelled;

    #[async_trait]
    impl JobMonitor for NeverCancelled {
        async fn is_cancelled(&self, _job_id: Uuid) -> bool {
            false
        }
    }

    fn request(spec: CommandSpec) -> BuildRequest {
        BuildRequest {
            run_id: Uuid::nil(),
            pipeline_name: "codeartifact-pipeline".to_string(),
            stage: "Deploy".to_string(),
            action: "publish".to_string(),
            spec,
            inputs: vec![
                ResolvedInput {
                    name: "build_output".to_string(),
                    content: ArtifactContent {
                        location: "run/Build/build_output".to_string(),
                        files: vec!["dist/app.whl".to_string()],
                    },
                },
                ResolvedInput {
                    name: "source_output".to_string(),
                    content: ArtifactContent {
                        location: "run/Source/source_output".to_string(),
                        files: vec!["setup.py".to_string()],
                    },
                },
            ],
            output: None,
        }
    }

    fn executor(root: &TempDir) -> CommandExecutor {
        CommandExecutor::new(
            ArtifactStore::new(root.path().join("artifacts")),
            root.path().join("cache"),
            Arc::new(NeverCancelled),
        )
    }

    #[test]
    fn test_container_env() {
        let mut spec = CommandSpec::new("python:3.12", ["twine upload dist/*"]);
        spec.env.insert("REPOSITORY".to_string(), "pypi-store".to_string());
        spec.env.insert("CONVEYOR_STAGE".to_string(), "spoofed".to_string());
        spec.target = Some("codeartifact:pypi-store".to_string());

        let env: BTreeMap<_, _> = container_env(&request(spec)).into_iter().collect();

        assert_eq!(env["REPOSITORY"], "pypi-store");
        assert_eq!(env["CONVEYOR_STAGE"], "Deploy");
        assert_eq!(env["CONVEYOR_PIPELINE"], "codeartifact-pipeline");
        assert_eq!(env["CONVEYOR_DEPLOY_TARGET"], "codeartifact:pypi-store");
        assert_eq!(env["CONVEYOR_RUN_ID"], Uuid::nil().to_string());
    }

    #[test]
    fn test_no_deploy_target_for_builds() {
        let spec = CommandSpec::new("python:3.12", ["make"]);
        let env = container_env(&request(spec));

        assert!(env.iter().all(|(k, _)| k != "CONVEYOR_DEPLOY_TARGET"));
    }

    #[test]
    fn test_container_spec_mounts() {
        let root = TempDir::new().unwrap();
        let executor = executor(&root);
        let ctx = Context::new(Uuid::new_v4(), &root.path().join("workspaces"));

        let mut spec = CommandSpec::new("python:3.12", ["make"]);
        spec.privileged = true;
        spec.cache_paths = vec!["/root/.cache/pip/**/*".to_string()];

        let container = executor
            .container_spec(ctx.job_id(), &request(spec), &ctx)
            .unwrap();

        assert!(container.privileged);
        let targets: Vec<_> = container.mounts.iter().map(|m| m.target.as_str()).collect();
        assert_eq!(
            targets,
            vec![
                "/workspace",
                "/inputs/build_output",
                "/inputs/source_output",
                "/root/.cache/pip"
            ]
        );
        assert!(container.mounts[1].read_only);
        assert!(!container.mounts[0].read_only);
        assert_eq!(
            container.mounts[1].source,
            root.path().join("artifacts/run/Build/build_output")
        );
    }

    #[test]
    fn test_prepare_workspace_copies_primary_input() {
        let root = TempDir::new().unwrap();
        let executor = executor(&root);
        let ctx = Context::new(Uuid::new_v4(), &root.path().join("workspaces"));

        let primary = root.path().join("artifacts/run/Build/build_output/dist");
        std::fs::create_dir_all(&primary).unwrap();
        std::fs::write(primary.join("app.whl"), "wheel").unwrap();

        let secondary = root.path().join("artifacts/run/Source/source_output");
        std::fs::create_dir_all(&secondary).unwrap();
        std::fs::write(secondary.join("setup.py"), "").unwrap();

        let spec = CommandSpec::new("python:3.12", ["make"]);
        executor.prepare_workspace(&request(spec), &ctx).unwrap();

        assert!(ctx.workspace().join("dist/app.whl").is_file());
        assert!(!ctx.workspace().join("setup.py").exists());
    }

    #[test]
    fn test_default_artifact_pattern() {
        let mut spec = CommandSpec::new("python:3.12", ["make"]);
        assert_eq!(artifact_patterns(&request(spec.clone())), vec!["*"]);

        spec.artifacts = vec!["dist/*".to_string()];
        assert_eq!(artifact_patterns(&request(spec)), vec!["dist/*"]);
    }
}
