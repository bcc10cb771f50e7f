//! Action adapters
//!
//! Each action kind is executed by an [`ActionAdapter`]. The standard adapters
//! translate an action into a call on one of the external collaborators:
//! - [`SourceControl`] for source checkouts
//! - [`BuildService`] for build and deploy command lists
//! - [`ApprovalNotifier`] for manual approval gates
//!
//! The engine only ever sees adapters, so tests can replace any of them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::artifact::{ArtifactContent, ResolvedInput};
use crate::domain::job::{BuildRequest, CheckoutRequest};
use crate::domain::pipeline::{Action, ActionKind};
use crate::error::StageError;

// ============================================================================
// Adapter contract
// ============================================================================

/// Everything an adapter needs to execute one action
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage: String,
    pub action: Action,

    /// Input artifacts, in the order the action declares them
    pub inputs: Vec<ResolvedInput>,

    /// Pipeline-wide environment
    pub env: HashMap<String, String>,
}

/// What an action produced
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The action produced content for its output artifact
    Produced(ArtifactContent),

    /// The action finished without producing anything
    Completed,

    /// The run must wait for a human decision
    NeedsApproval,
}

#[async_trait]
pub trait ActionAdapter: Send + Sync {
    /// Executes one action
    ///
    /// The future may be dropped at any await point when the run is cancelled.
    async fn run(&self, request: ActionRequest) -> Result<ActionOutcome, StageError>;
}

// ============================================================================
// External collaborators
// ============================================================================

/// Source control hosting
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Snapshots the tree of `request.branch` into the artifact store
    ///
    /// Fails with [`StageError::SourceUnavailable`] when the repository or the
    /// branch does not exist.
    async fn checkout(&self, request: CheckoutRequest) -> Result<ArtifactContent, StageError>;
}

/// Ephemeral build environment
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Runs the command list of `request.spec` in a fresh environment
    ///
    /// Returns the collected output files when the request declares an output.
    async fn run_ephemeral(
        &self,
        request: BuildRequest,
    ) -> Result<Option<ArtifactContent>, StageError>;
}

/// Human-actionable prompt sent when a run reaches an approval gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage: String,
    pub action: String,
    pub message: Option<String>,
    pub link: Option<String>,
}

#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    /// Delivers the prompt. Best effort: delivery failures are the notifier's
    /// to report and never fail the stage.
    async fn notify(&self, request: &ApprovalRequest);
}

// ============================================================================
// Standard adapters
// ============================================================================

/// Adapter for `SourceCheckout` actions
pub struct SourceCheckoutAdapter {
    source: Arc<dyn SourceControl>,
}

impl SourceCheckoutAdapter {
    pub fn new(source: Arc<dyn SourceControl>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ActionAdapter for SourceCheckoutAdapter {
    async fn run(&self, request: ActionRequest) -> Result<ActionOutcome, StageError> {
        let ActionKind::SourceCheckout(spec) = &request.action.kind else {
            return Err(wrong_kind(&request.action, "source"));
        };

        let output = request.action.output.clone().ok_or_else(|| {
            StageError::execution(format!(
                "source action '{}' has no output artifact",
                request.action.name
            ))
        })?;

        let content = self
            .source
            .checkout(CheckoutRequest {
                run_id: request.run_id,
                pipeline_name: request.pipeline_name,
                stage: request.stage,
                action: request.action.name.clone(),
                repository: spec.repository.clone(),
                branch: spec.branch.clone(),
                output,
            })
            .await?;

        Ok(ActionOutcome::Produced(content))
    }
}

/// Adapter for `BuildCommand` and `DeployCommand` actions
///
/// Both kinds share one command specification and one collaborator.
pub struct CommandAdapter {
    builds: Arc<dyn BuildService>,
}

impl CommandAdapter {
    pub fn new(builds: Arc<dyn BuildService>) -> Self {
        Self { builds }
    }
}

#[async_trait]
impl ActionAdapter for CommandAdapter {
    async fn run(&self, request: ActionRequest) -> Result<ActionOutcome, StageError> {
        let Some(spec) = request.action.kind.command_spec() else {
            return Err(wrong_kind(&request.action, "build or deploy"));
        };

        // Action env wins over pipeline env
        let mut spec = spec.clone();
        let mut env = request.env;
        env.extend(spec.env.drain());
        spec.env = env;

        let output = request.action.output.clone();
        let produced = self
            .builds
            .run_ephemeral(BuildRequest {
                run_id: request.run_id,
                pipeline_name: request.pipeline_name,
                stage: request.stage,
                action: request.action.name.clone(),
                spec,
                inputs: request.inputs,
                output: output.clone(),
            })
            .await?;

        match (output, produced) {
            (Some(_), Some(content)) => Ok(ActionOutcome::Produced(content)),
            (Some(artifact), None) => Err(StageError::execution(format!(
                "action '{}' finished without producing artifact '{}'",
                request.action.name, artifact
            ))),
            (None, _) => Ok(ActionOutcome::Completed),
        }
    }
}

/// Adapter for `ManualApproval` actions
pub struct ManualApprovalAdapter {
    notifier: Arc<dyn ApprovalNotifier>,
}

impl ManualApprovalAdapter {
    pub fn new(notifier: Arc<dyn ApprovalNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl ActionAdapter for ManualApprovalAdapter {
    async fn run(&self, request: ActionRequest) -> Result<ActionOutcome, StageError> {
        let ActionKind::ManualApproval(spec) = &request.action.kind else {
            return Err(wrong_kind(&request.action, "approval"));
        };

        self.notifier
            .notify(&ApprovalRequest {
                run_id: request.run_id,
                pipeline_name: request.pipeline_name,
                stage: request.stage,
                action: request.action.name.clone(),
                message: spec.message.clone(),
                link: spec.link.clone(),
            })
            .await;

        Ok(ActionOutcome::NeedsApproval)
    }
}

fn wrong_kind(action: &Action, expected: &str) -> StageError {
    StageError::execution(format!(
        "action '{}' is a {} action, expected {}",
        action.name,
        action.kind.label(),
        expected
    ))
}

// ============================================================================
// Adapter set
// ============================================================================

/// The adapter used for each action kind
#[derive(Clone)]
pub struct AdapterSet {
    pub source: Arc<dyn ActionAdapter>,
    pub build: Arc<dyn ActionAdapter>,
    pub approval: Arc<dyn ActionAdapter>,
    pub deploy: Arc<dyn ActionAdapter>,
}

impl AdapterSet {
    pub fn new(
        source: Arc<dyn ActionAdapter>,
        build: Arc<dyn ActionAdapter>,
        approval: Arc<dyn ActionAdapter>,
        deploy: Arc<dyn ActionAdapter>,
    ) -> Self {
        Self {
            source,
            build,
            approval,
            deploy,
        }
    }

    /// Standard adapters on top of the given collaborators
    pub fn standard(
        source: Arc<dyn SourceControl>,
        builds: Arc<dyn BuildService>,
        notifier: Arc<dyn ApprovalNotifier>,
    ) -> Self {
        let commands: Arc<dyn ActionAdapter> = Arc::new(CommandAdapter::new(builds));

        Self {
            source: Arc::new(SourceCheckoutAdapter::new(source)),
            build: commands.clone(),
            approval: Arc::new(ManualApprovalAdapter::new(notifier)),
            deploy: commands,
        }
    }

    /// Adapter responsible for an action kind
    pub fn for_action(&self, kind: &ActionKind) -> Arc<dyn ActionAdapter> {
        match kind {
            ActionKind::SourceCheckout(_) => self.source.clone(),
            ActionKind::BuildCommand(_) => self.build.clone(),
            ActionKind::ManualApproval(_) => self.approval.clone(),
            ActionKind::DeployCommand(_) => self.deploy.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::{ApprovalSpec, CommandSpec};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBuilds {
        requests: Mutex<Vec<BuildRequest>>,
        produce: bool,
    }

    #[async_trait]
    impl BuildService for FakeBuilds {
        async fn run_ephemeral(
            &self,
            request: BuildRequest,
        ) -> Result<Option<ArtifactContent>, StageError> {
            self.requests.lock().unwrap().push(request);
            Ok(self.produce.then(|| ArtifactContent {
                location: "run/Build/jar".to_string(),
                files: vec!["app.jar".to_string()],
            }))
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        prompts: Mutex<Vec<ApprovalRequest>>,
    }

    #[async_trait]
    impl ApprovalNotifier for FakeNotifier {
        async fn notify(&self, request: &ApprovalRequest) {
            self.prompts.lock().unwrap().push(request.clone());
        }
    }

    fn request(action: Action) -> ActionRequest {
        ActionRequest {
            run_id: Uuid::new_v4(),
            pipeline_name: "release".to_string(),
            stage: "Build".to_string(),
            action,
            inputs: Vec::new(),
            env: HashMap::from([
                ("REGION".to_string(), "eu-west-1".to_string()),
                ("STAGE".to_string(), "pipeline".to_string()),
            ]),
        }
    }

    #[tokio::test]
    async fn test_command_adapter_merges_env() {
        let builds = Arc::new(FakeBuilds {
            produce: true,
            ..Default::default()
        });
        let adapter = CommandAdapter::new(builds.clone());

        let spec = CommandSpec::new("alpine", ["make"]).env("STAGE", "action");
        let outcome = adapter
            .run(request(Action::build("compile", spec).output("jar")))
            .await
            .unwrap();

        assert!(matches!(outcome, ActionOutcome::Produced(_)));

        let requests = builds.requests.lock().unwrap();
        let env = &requests[0].spec.env;
        assert_eq!(env["STAGE"], "action");
        assert_eq!(env["REGION"], "eu-west-1");
        assert_eq!(requests[0].output.as_deref(), Some("jar"));
    }

    #[tokio::test]
    async fn test_command_adapter_requires_declared_output() {
        let adapter = CommandAdapter::new(Arc::new(FakeBuilds::default()));

        let spec = CommandSpec::new("alpine", ["make"]);
        let err = adapter
            .run(request(Action::build("compile", spec).output("jar")))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("'jar'"));
    }

    #[tokio::test]
    async fn test_deploy_without_output_completes() {
        let adapter = CommandAdapter::new(Arc::new(FakeBuilds::default()));

        let spec = CommandSpec::new("alpine", ["./deploy.sh"]).target("lambda:prod");
        let outcome = adapter.run(request(Action::deploy("ship", spec))).await.unwrap();

        assert_eq!(outcome, ActionOutcome::Completed);
    }

    #[tokio::test]
    async fn test_approval_adapter_notifies() {
        let notifier = Arc::new(FakeNotifier::default());
        let adapter = ManualApprovalAdapter::new(notifier.clone());

        let spec = ApprovalSpec {
            message: Some("check the staging build".to_string()),
            ..Default::default()
        };
        let outcome = adapter
            .run(request(Action::approval("approve", spec)))
            .await
            .unwrap();

        assert_eq!(outcome, ActionOutcome::NeedsApproval);
        let prompts = notifier.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].message.as_deref(), Some("check the staging build"));
    }

    #[tokio::test]
    async fn test_adapter_rejects_wrong_kind() {
        let adapter = ManualApprovalAdapter::new(Arc::new(FakeNotifier::default()));
        let err = adapter
            .run(request(Action::build("compile", CommandSpec::new("alpine", ["make"]))))
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::Execution { .. }));
    }
}
