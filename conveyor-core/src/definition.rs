//! Stage definition store
//!
//! Collects the ordered stages of a pipeline and validates their artifact
//! bindings as they are declared, so a definition that reaches `build()` can
//! never reference an artifact before it is produced.

use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::pipeline::{Action, ActionKind, Pipeline, PipelineConfig, Stage};
use crate::error::ConfigError;

/// Builder for a validated [`Pipeline`]
///
/// # Example
/// ```
/// use conveyor_core::PipelineBuilder;
/// use conveyor_core::domain::pipeline::{Action, ApprovalSpec, CommandSpec};
///
/// let mut builder = PipelineBuilder::new("release");
/// builder.define_stage("Source", vec![
///     Action::source("checkout", "app", "main").output("src"),
/// ])?;
/// builder.define_stage("Build", vec![
///     Action::build("compile", CommandSpec::new("rust:1", ["cargo build"]).artifact("*"))
///         .input("src")
///         .output("bin"),
/// ])?;
/// builder.define_stage("Approve", vec![Action::approval("approve", ApprovalSpec::default())])?;
///
/// let pipeline = builder.build()?;
/// assert_eq!(pipeline.stages.len(), 3);
/// # Ok::<(), conveyor_core::ConfigError>(())
/// ```
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    description: Option<String>,
    config: PipelineConfig,
    stages: Vec<Stage>,
    produced: HashSet<String>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            config: PipelineConfig::default(),
            stages: Vec::new(),
            produced: HashSet::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Appends a stage after validating it against the stages already defined
    ///
    /// On error nothing is registered.
    pub fn define_stage(
        &mut self,
        name: impl Into<String>,
        actions: Vec<Action>,
    ) -> Result<&mut Self, ConfigError> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(ConfigError::EmptyStageName);
        }
        if self.stages.iter().any(|s| s.name == name) {
            return Err(ConfigError::DuplicateStage(name));
        }
        if actions.is_empty() {
            return Err(ConfigError::EmptyStage(name));
        }

        let mut action_names = HashSet::new();
        let mut stage_outputs = HashSet::new();

        for action in &actions {
            if !action_names.insert(action.name.as_str()) {
                return Err(ConfigError::DuplicateAction {
                    stage: name.clone(),
                    action: action.name.clone(),
                });
            }

            validate_action(&name, action, actions.len())?;

            for input in &action.inputs {
                if !self.produced.contains(input) {
                    return Err(ConfigError::DanglingInput {
                        stage: name.clone(),
                        action: action.name.clone(),
                        artifact: input.clone(),
                    });
                }
            }

            if let Some(output) = &action.output {
                if self.produced.contains(output) || !stage_outputs.insert(output.clone()) {
                    return Err(ConfigError::DuplicateOutput {
                        stage: name.clone(),
                        action: action.name.clone(),
                        artifact: output.clone(),
                    });
                }
            }
        }

        self.produced.extend(stage_outputs);
        self.stages.push(Stage { name, actions });

        Ok(self)
    }

    /// Chaining form of [`define_stage`](Self::define_stage)
    pub fn stage(
        mut self,
        name: impl Into<String>,
        actions: Vec<Action>,
    ) -> Result<Self, ConfigError> {
        self.define_stage(name, actions)?;
        Ok(self)
    }

    /// Stages in declaration order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Finishes the definition
    pub fn build(self) -> Result<Pipeline, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }

        let now = Utc::now();
        Ok(Pipeline {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            stages: self.stages,
            config: self.config,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Re-validates a pipeline that did not come out of a builder
/// (deserialized from storage or received over the network)
pub fn validate(pipeline: &Pipeline) -> Result<(), ConfigError> {
    let mut builder = PipelineBuilder::new(pipeline.name.clone());
    for stage in &pipeline.stages {
        builder.define_stage(stage.name.clone(), stage.actions.clone())?;
    }
    builder.build().map(|_| ())
}

fn validate_action(stage: &str, action: &Action, actions_in_stage: usize) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidAction {
        stage: stage.to_string(),
        action: action.name.clone(),
        reason: reason.to_string(),
    };

    if action.name.trim().is_empty() {
        return Err(invalid("action name cannot be empty"));
    }

    match &action.kind {
        ActionKind::SourceCheckout(spec) => {
            if spec.repository.trim().is_empty() {
                return Err(invalid("repository cannot be empty"));
            }
            if spec.branch.trim().is_empty() {
                return Err(invalid("branch cannot be empty"));
            }
            if action.output.is_none() {
                return Err(invalid("source actions must declare an output artifact"));
            }
        }
        ActionKind::BuildCommand(spec) | ActionKind::DeployCommand(spec) => {
            if spec.image.trim().is_empty() {
                return Err(invalid("image cannot be empty"));
            }
            if spec.commands.is_empty() {
                return Err(invalid("at least one command is required"));
            }
            if spec.commands.iter().any(|c| c.trim().is_empty()) {
                return Err(invalid("commands cannot be empty strings"));
            }
        }
        ActionKind::ManualApproval(_) => {
            let approval = |reason: &str| ConfigError::InvalidApproval {
                stage: stage.to_string(),
                action: action.name.clone(),
                reason: reason.to_string(),
            };
            if actions_in_stage > 1 {
                return Err(approval("must be the only action of its stage"));
            }
            if !action.inputs.is_empty() || action.output.is_some() {
                return Err(approval("cannot read or produce artifacts"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::{ApprovalSpec, CommandSpec};

    fn build_spec() -> CommandSpec {
        CommandSpec::new("amazonlinux:2", ["mvn compile"]).artifact("*")
    }

    #[test]
    fn test_stages_keep_declaration_order() {
        let pipeline = PipelineBuilder::new("release")
            .stage("Source", vec![Action::source("checkout", "repo", "main").output("src")])
            .unwrap()
            .stage("Build", vec![Action::build("compile", build_spec()).input("src").output("jar")])
            .unwrap()
            .stage("Approve", vec![Action::approval("approve", ApprovalSpec::default())])
            .unwrap()
            .stage("Deploy", vec![Action::deploy("lambda", build_spec()).input("jar")])
            .unwrap()
            .build()
            .unwrap();

        let names: Vec<_> = pipeline.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Source", "Build", "Approve", "Deploy"]);
        assert_eq!(pipeline.outputs().collect::<Vec<_>>(), vec!["src", "jar"]);
    }

    #[test]
    fn test_dangling_input_is_rejected() {
        let mut builder = PipelineBuilder::new("release");
        let err = builder
            .define_stage("Build", vec![Action::build("compile", build_spec()).input("src")])
            .unwrap_err();

        assert_eq!(
            err,
            ConfigError::DanglingInput {
                stage: "Build".to_string(),
                action: "compile".to_string(),
                artifact: "src".to_string(),
            }
        );
        assert!(builder.stages().is_empty());
    }

    #[test]
    fn test_same_stage_output_is_not_visible_as_input() {
        let mut builder = PipelineBuilder::new("release");
        let err = builder
            .define_stage(
                "Build",
                vec![
                    Action::build("a", build_spec()).output("x"),
                    Action::build("b", build_spec()).input("x"),
                ],
            )
            .unwrap_err();

        assert!(matches!(err, ConfigError::DanglingInput { .. }));
    }

    #[test]
    fn test_duplicate_stage_name() {
        let mut builder = PipelineBuilder::new("release");
        builder
            .define_stage("Source", vec![Action::source("checkout", "repo", "main").output("src")])
            .unwrap();

        let err = builder
            .define_stage("Source", vec![Action::source("again", "repo", "dev").output("dev")])
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateStage("Source".to_string()));
        assert_eq!(builder.stages().len(), 1);
    }

    #[test]
    fn test_duplicate_output() {
        let mut builder = PipelineBuilder::new("release");
        builder
            .define_stage("Source", vec![Action::source("checkout", "repo", "main").output("src")])
            .unwrap();

        let err = builder
            .define_stage("Build", vec![Action::build("compile", build_spec()).output("src")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateOutput { .. }));
    }

    #[test]
    fn test_empty_pipeline_and_empty_stage() {
        assert_eq!(
            PipelineBuilder::new("release").build().unwrap_err(),
            ConfigError::EmptyPipeline
        );

        let mut builder = PipelineBuilder::new("release");
        assert_eq!(
            builder.define_stage("Nothing", vec![]).unwrap_err(),
            ConfigError::EmptyStage("Nothing".to_string())
        );
    }

    #[test]
    fn test_approval_must_stand_alone() {
        let mut builder = PipelineBuilder::new("release");
        let err = builder
            .define_stage(
                "Gate",
                vec![
                    Action::approval("approve", ApprovalSpec::default()),
                    Action::build("compile", build_spec()),
                ],
            )
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidApproval { .. }));
    }

    #[test]
    fn test_command_action_requires_commands() {
        let mut builder = PipelineBuilder::new("release");
        let spec = CommandSpec::new("alpine", Vec::<String>::new());
        let err = builder
            .define_stage("Build", vec![Action::build("compile", spec)])
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidAction { .. }));
    }

    #[test]
    fn test_source_requires_output() {
        let mut builder = PipelineBuilder::new("release");
        let err = builder
            .define_stage("Source", vec![Action::source("checkout", "repo", "main")])
            .unwrap_err();

        assert!(err.to_string().contains("output"));
    }

    #[test]
    fn test_validate_round_trips_builder_output() {
        let pipeline = PipelineBuilder::new("release")
            .stage("Source", vec![Action::source("checkout", "repo", "main").output("src")])
            .unwrap()
            .build()
            .unwrap();
        assert!(validate(&pipeline).is_ok());

        let mut broken = pipeline.clone();
        broken.stages[0].actions[0].inputs.push("ghost".to_string());
        assert!(matches!(
            validate(&broken),
            Err(ConfigError::DanglingInput { .. })
        ));
    }
}
