//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Pipeline definition
///
/// Built once through [`crate::definition::PipelineBuilder`] and never mutated
/// afterwards. Stage order is execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub stages: Vec<Stage>,
    pub config: PipelineConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pipeline {
    /// Returns the stage at `index`
    pub fn stage(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    /// Returns the position of the stage called `name`
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Iterates over every artifact name produced by the pipeline, in stage order
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.stages
            .iter()
            .flat_map(|s| s.actions.iter())
            .filter_map(|a| a.output.as_deref())
    }
}

/// Pipeline configuration options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Default approval timeout for every manual approval stage
    #[serde(default)]
    pub approval_timeout_seconds: Option<u64>,

    /// Environment shared by every build and deploy action
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

/// A named step of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub actions: Vec<Action>,
}

impl Stage {
    /// Returns true if the stage is a manual approval gate
    pub fn is_approval(&self) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a.kind, ActionKind::ManualApproval(_)))
    }
}

/// A single unit of work within a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,

    /// Artifacts read by this action, produced by earlier stages
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Artifact produced by this action
    #[serde(default)]
    pub output: Option<String>,

    pub kind: ActionKind,
}

impl Action {
    /// Creates a source checkout action
    pub fn source(
        name: impl Into<String>,
        repository: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            ActionKind::SourceCheckout(SourceSpec {
                repository: repository.into(),
                branch: branch.into(),
            }),
        )
    }

    /// Creates a build action
    pub fn build(name: impl Into<String>, spec: CommandSpec) -> Self {
        Self::new(name, ActionKind::BuildCommand(spec))
    }

    /// Creates a deploy action
    pub fn deploy(name: impl Into<String>, spec: CommandSpec) -> Self {
        Self::new(name, ActionKind::DeployCommand(spec))
    }

    /// Creates a manual approval action
    pub fn approval(name: impl Into<String>, spec: ApprovalSpec) -> Self {
        Self::new(name, ActionKind::ManualApproval(spec))
    }

    fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            output: None,
            kind,
        }
    }

    /// Adds an input artifact
    pub fn input(mut self, artifact: impl Into<String>) -> Self {
        self.inputs.push(artifact.into());
        self
    }

    /// Sets the output artifact
    pub fn output(mut self, artifact: impl Into<String>) -> Self {
        self.output = Some(artifact.into());
        self
    }
}

/// Kind-specific action configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    SourceCheckout(SourceSpec),
    BuildCommand(CommandSpec),
    ManualApproval(ApprovalSpec),
    DeployCommand(CommandSpec),
}

impl ActionKind {
    /// Short, human readable kind name
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::SourceCheckout(_) => "source",
            ActionKind::BuildCommand(_) => "build",
            ActionKind::ManualApproval(_) => "approval",
            ActionKind::DeployCommand(_) => "deploy",
        }
    }

    /// Command configuration for build and deploy actions
    pub fn command_spec(&self) -> Option<&CommandSpec> {
        match self {
            ActionKind::BuildCommand(spec) | ActionKind::DeployCommand(spec) => Some(spec),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Repository and branch to check out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub repository: String,
    pub branch: String,
}

/// Command list executed in an ephemeral build environment
///
/// Shared by build and deploy actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Container image the environment is provisioned from
    pub image: String,

    /// Grants the environment the privileges needed to run nested containers
    #[serde(default)]
    pub privileged: bool,

    /// Shell commands, executed in order
    pub commands: Vec<String>,

    /// Output file globs collected into the output artifact
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Paths preserved across runs of the same stage
    #[serde(default)]
    pub cache_paths: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Deploy target identifier, exported to the commands
    #[serde(default)]
    pub target: Option<String>,
}

impl CommandSpec {
    pub fn new<I, S>(image: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            image: image.into(),
            privileged: false,
            commands: commands.into_iter().map(Into::into).collect(),
            artifacts: Vec::new(),
            cache_paths: Vec::new(),
            env: HashMap::new(),
            target: None,
        }
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn artifact(mut self, glob: impl Into<String>) -> Self {
        self.artifacts.push(glob.into());
        self
    }

    pub fn cache_path(mut self, path: impl Into<String>) -> Self {
        self.cache_paths.push(path.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Manual approval gate configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSpec {
    /// Additional information shown to the approver
    #[serde(default)]
    pub message: Option<String>,

    /// Link to whatever the approver should review
    #[serde(default)]
    pub link: Option<String>,

    /// Overrides the pipeline approval timeout
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}
