//! Run executor
//!
//! A single cooperative state machine per run. The executor owns the run
//! record (and with it the artifact registry) and walks the pipeline stages
//! strictly in order:
//!
//! ```text
//! NotStarted -> Running(i) -> Running(i + 1) ... -> Succeeded
//!                   |
//!                   +-> AwaitingApproval(i) -> Running(i + 1) | Failed(i, "rejected")
//!                   +-> Failed(i, cause) -> (retry) Running(i)
//! ```
//!
//! Executing a stage is split in two halves so the caller can race it against
//! other events: [`Executor::dispatch`] starts the stage's actions and hands
//! back a [`StageDispatch`] that owns them, [`Executor::complete`] folds the
//! joined result back into the run. Dropping a dispatch aborts its actions.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::artifact::ResolvedInput;
use crate::domain::pipeline::{ActionKind, Pipeline};
use crate::domain::run::{PipelineRun, RunState, StageStatus};
use crate::engine::adapter::{ActionOutcome, ActionRequest, AdapterSet};
use crate::error::{StageError, StateError};

type ActionTasks = JoinSet<(usize, Result<ActionOutcome, StageError>)>;

/// Drives one run of a pipeline
pub struct Executor {
    pipeline: Arc<Pipeline>,
    run: PipelineRun,
    adapters: AdapterSet,
}

impl Executor {
    /// Creates an executor for a fresh run of `pipeline`
    pub fn new(pipeline: Arc<Pipeline>, adapters: AdapterSet) -> Self {
        let run = PipelineRun::new(&pipeline);
        Self {
            pipeline,
            run,
            adapters,
        }
    }

    /// Rebuilds an executor around an existing run record
    ///
    /// Used to retry runs whose original driver is gone.
    pub fn resume(pipeline: Arc<Pipeline>, run: PipelineRun, adapters: AdapterSet) -> Self {
        Self {
            pipeline,
            run,
            adapters,
        }
    }

    pub fn run(&self) -> &PipelineRun {
        &self.run
    }

    pub fn state(&self) -> &RunState {
        &self.run.state
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn into_run(self) -> PipelineRun {
        self.run
    }

    // ========================================================================
    // Stage execution
    // ========================================================================

    /// NotStarted -> Running(0)
    pub fn start(&mut self) -> Result<RunState, StateError> {
        if self.run.state != RunState::NotStarted {
            return Err(StateError::AlreadyStarted(self.run.state.clone()));
        }

        info!(
            "Starting run {} of pipeline '{}'",
            self.run.id, self.pipeline.name
        );
        self.transition(RunState::Running { stage: 0 });
        Ok(self.run.state.clone())
    }

    /// Starts every action of the current stage
    ///
    /// Inputs are resolved before anything is invoked. When an input is not
    /// bound the returned dispatch is already complete with that error and no
    /// adapter runs.
    pub fn dispatch(&mut self) -> Result<StageDispatch, StateError> {
        let RunState::Running { stage: index } = self.run.state else {
            return Err(StateError::NotRunning(self.run.state.clone()));
        };

        let pipeline = self.pipeline.clone();
        let Some(stage) = pipeline.stage(index) else {
            return Err(StateError::NotRunning(self.run.state.clone()));
        };

        let record = &mut self.run.stages[index];
        record.status = StageStatus::Running;
        record.attempts += 1;
        record.started_at = Some(Utc::now());
        record.completed_at = None;
        record.error = None;

        debug!(
            "Dispatching stage '{}' ({} action(s), attempt {})",
            stage.name,
            stage.actions.len(),
            record.attempts
        );

        let mut requests = Vec::with_capacity(stage.actions.len());
        for action in &stage.actions {
            let inputs = match self.resolve_inputs(&action.inputs) {
                Ok(inputs) => inputs,
                Err(err) => {
                    return Ok(StageDispatch {
                        stage: index,
                        pending: Pending::Ready(Err(err)),
                    });
                }
            };

            requests.push(ActionRequest {
                run_id: self.run.id,
                pipeline_name: pipeline.name.clone(),
                stage: stage.name.clone(),
                action: action.clone(),
                inputs,
                env: pipeline.config.env_vars.clone(),
            });
        }

        let count = requests.len();
        let mut tasks = JoinSet::new();
        for (position, request) in requests.into_iter().enumerate() {
            let adapter = self.adapters.for_action(&request.action.kind);
            tasks.spawn(async move { (position, adapter.run(request).await) });
        }

        Ok(StageDispatch {
            stage: index,
            pending: Pending::Running { tasks, count },
        })
    }

    fn resolve_inputs(&self, names: &[String]) -> Result<Vec<ResolvedInput>, StageError> {
        names
            .iter()
            .map(|name| {
                let content = self.run.artifacts.resolve_name(name)?;
                Ok(ResolvedInput {
                    name: name.clone(),
                    content: content.clone(),
                })
            })
            .collect()
    }

    /// Folds a joined stage result back into the run
    ///
    /// Outputs are validated first and only bound when every declared output
    /// of the stage was produced, so a failed stage leaves the registry
    /// untouched and can be retried.
    pub fn complete(&mut self, result: StageResult) -> Result<RunState, StateError> {
        if self.run.state != (RunState::Running { stage: result.stage }) {
            warn!(
                "Ignoring result of stage {} for run {} in state {}",
                result.stage, self.run.id, self.run.state
            );
            return Err(StateError::NotRunning(self.run.state.clone()));
        }

        let index = result.stage;
        match result.outcome.and_then(|outcomes| self.bind_outputs(index, outcomes)) {
            Ok(true) => {
                self.run.stages[index].status = StageStatus::AwaitingApproval;
                info!(
                    "Run {} is awaiting approval at stage '{}'",
                    self.run.id, self.run.stages[index].name
                );
                self.transition(RunState::AwaitingApproval { stage: index });
            }
            Ok(false) => self.succeed_stage(index),
            Err(err) => self.fail_stage(index, &err),
        }

        Ok(self.run.state.clone())
    }

    /// Validates and binds the outputs of a stage. Returns true when the stage
    /// asks for approval.
    fn bind_outputs(
        &mut self,
        index: usize,
        outcomes: Vec<ActionOutcome>,
    ) -> Result<bool, StageError> {
        let pipeline = self.pipeline.clone();
        let Some(stage) = pipeline.stage(index) else {
            return Err(StageError::execution(format!("no stage at index {}", index)));
        };

        let mut needs_approval = false;
        let mut bindings = Vec::new();

        for (action, outcome) in stage.actions.iter().zip(outcomes) {
            match (outcome, &action.output) {
                (ActionOutcome::NeedsApproval, _) => needs_approval = true,
                (ActionOutcome::Produced(content), Some(output)) => {
                    let handle = self.run.artifacts.declare(output);
                    bindings.push((handle, content));
                }
                (ActionOutcome::Produced(_), None) | (ActionOutcome::Completed, None) => {}
                (ActionOutcome::Completed, Some(output)) => {
                    return Err(StageError::execution(format!(
                        "action '{}' did not produce artifact '{}'",
                        action.name, output
                    )));
                }
            }
        }

        if let Some((handle, _)) = bindings
            .iter()
            .find(|(handle, _)| self.run.artifacts.is_bound(*handle))
        {
            let name = self.run.artifacts.name(*handle).unwrap_or("?").to_string();
            return Err(StageError::execution(format!(
                "artifact '{}' is already bound",
                name
            )));
        }

        for (handle, content) in bindings {
            self.run.artifacts.bind(handle, content)?;
        }

        Ok(needs_approval)
    }

    /// Dispatches the current stage and waits for it
    pub async fn advance(&mut self) -> Result<RunState, StateError> {
        let dispatch = self.dispatch()?;
        let result = dispatch.join().await;
        self.complete(result)
    }

    /// Starts the run if needed and advances until it stops running
    ///
    /// Returns at a terminal state or at an approval gate.
    pub async fn drive(&mut self) -> Result<RunState, StateError> {
        if self.run.state == RunState::NotStarted {
            self.start()?;
        }

        while matches!(self.run.state, RunState::Running { .. }) {
            self.advance().await?;
        }

        Ok(self.run.state.clone())
    }

    // ========================================================================
    // External commands
    // ========================================================================

    /// AwaitingApproval(i) -> Running(i + 1) or Succeeded
    pub fn approve(&mut self) -> Result<RunState, StateError> {
        let RunState::AwaitingApproval { stage } = self.run.state else {
            return Err(StateError::NotAwaitingApproval(self.run.state.clone()));
        };

        info!(
            "Run {} approved at stage '{}'",
            self.run.id, self.run.stages[stage].name
        );
        self.succeed_stage(stage);
        Ok(self.run.state.clone())
    }

    /// AwaitingApproval(i) -> Failed(i, "rejected")
    pub fn reject(&mut self) -> Result<RunState, StateError> {
        let RunState::AwaitingApproval { stage } = self.run.state else {
            return Err(StateError::NotAwaitingApproval(self.run.state.clone()));
        };

        self.fail_stage(stage, &StageError::Rejected);
        Ok(self.run.state.clone())
    }

    /// AwaitingApproval(i) -> Failed(i, "approval timeout")
    pub fn expire_approval(&mut self) -> Result<RunState, StateError> {
        let RunState::AwaitingApproval { stage } = self.run.state else {
            return Err(StateError::NotAwaitingApproval(self.run.state.clone()));
        };

        self.fail_stage(stage, &StageError::ApprovalTimeout);
        Ok(self.run.state.clone())
    }

    /// Running(i) or AwaitingApproval(i) -> Failed(i, "cancelled")
    ///
    /// Only changes the run record. The caller drops the in-flight
    /// [`StageDispatch`], if any.
    pub fn cancel(&mut self) -> Result<RunState, StateError> {
        let stage = match self.run.state {
            RunState::NotStarted => 0,
            RunState::Running { stage } | RunState::AwaitingApproval { stage } => stage,
            RunState::Succeeded | RunState::Failed { .. } => {
                return Err(StateError::AlreadyFinished(self.run.state.clone()));
            }
        };

        self.fail_stage(stage, &StageError::Cancelled);
        Ok(self.run.state.clone())
    }

    /// Fails an unfinished run with an external cause
    ///
    /// Used for runs whose driver went away with the process that ran it.
    pub fn interrupt(&mut self, reason: impl Into<String>) -> Result<RunState, StateError> {
        let stage = match self.run.state {
            RunState::NotStarted => 0,
            RunState::Running { stage } | RunState::AwaitingApproval { stage } => stage,
            RunState::Succeeded | RunState::Failed { .. } => {
                return Err(StateError::AlreadyFinished(self.run.state.clone()));
            }
        };

        self.fail_stage(
            stage,
            &StageError::Interrupted {
                reason: reason.into(),
            },
        );
        Ok(self.run.state.clone())
    }

    /// Failed(i, _) -> Running(i)
    ///
    /// The stage re-runs with the inputs bound before it failed.
    pub fn retry(&mut self) -> Result<RunState, StateError> {
        let RunState::Failed { stage, .. } = self.run.state else {
            return Err(StateError::NotFailed(self.run.state.clone()));
        };

        let record = &mut self.run.stages[stage];
        record.status = StageStatus::Pending;
        record.error = None;
        record.completed_at = None;
        self.run.completed_at = None;

        info!(
            "Retrying stage '{}' of run {}",
            self.run.stages[stage].name, self.run.id
        );
        self.transition(RunState::Running { stage });
        Ok(self.run.state.clone())
    }

    /// Approval timeout configured for the stage, if any
    ///
    /// The approval action's own timeout wins over the pipeline default.
    pub fn approval_timeout(&self, stage: usize) -> Option<Duration> {
        let from_action = self.pipeline.stage(stage).and_then(|s| {
            s.actions.iter().find_map(|a| match &a.kind {
                ActionKind::ManualApproval(spec) => spec.timeout_seconds,
                _ => None,
            })
        });

        from_action
            .or(self.pipeline.config.approval_timeout_seconds)
            .map(Duration::from_secs)
    }

    // ========================================================================
    // Record keeping
    // ========================================================================

    fn succeed_stage(&mut self, index: usize) {
        let record = &mut self.run.stages[index];
        record.status = StageStatus::Succeeded;
        record.completed_at = Some(Utc::now());
        debug!("Stage '{}' succeeded", record.name);

        if index + 1 < self.pipeline.stages.len() {
            self.transition(RunState::Running { stage: index + 1 });
        } else {
            self.run.completed_at = Some(Utc::now());
            info!("Run {} succeeded", self.run.id);
            self.transition(RunState::Succeeded);
        }
    }

    fn fail_stage(&mut self, index: usize, err: &StageError) {
        let cause = err.to_string();
        let record = &mut self.run.stages[index];
        record.status = StageStatus::Failed;
        record.completed_at = Some(Utc::now());
        record.error = Some(cause.clone());
        self.run.completed_at = Some(Utc::now());

        warn!(
            "Run {} failed at stage '{}': {}",
            self.run.id, record.name, cause
        );
        self.transition(RunState::Failed {
            stage: index,
            cause,
        });
    }

    fn transition(&mut self, next: RunState) {
        debug!("Run {}: {} -> {}", self.run.id, self.run.state, next);
        self.run.state = next;
    }
}

// ============================================================================
// In-flight stages
// ============================================================================

enum Pending {
    Ready(Result<Vec<ActionOutcome>, StageError>),
    Running { tasks: ActionTasks, count: usize },
}

/// The running actions of one stage
///
/// Owns the spawned action tasks; dropping it aborts them.
pub struct StageDispatch {
    stage: usize,
    pending: Pending,
}

impl StageDispatch {
    pub fn stage(&self) -> usize {
        self.stage
    }

    /// Waits for every action of the stage
    ///
    /// The first failure aborts the remaining actions.
    pub async fn join(self) -> StageResult {
        let stage = self.stage;
        let (mut tasks, count) = match self.pending {
            Pending::Ready(outcome) => return StageResult { stage, outcome },
            Pending::Running { tasks, count } => (tasks, count),
        };

        let mut outcomes: Vec<Option<ActionOutcome>> = (0..count).map(|_| None).collect();

        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((position, Ok(outcome))) => {
                    outcomes[position] = Some(outcome);
                    continue;
                }
                Ok((_, Err(err))) => err,
                Err(err) => StageError::execution(format!("action task failed: {}", err)),
            };

            tasks.abort_all();
            return StageResult {
                stage,
                outcome: Err(failure),
            };
        }

        let outcome = outcomes
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| StageError::execution("action finished without an outcome"));

        StageResult { stage, outcome }
    }
}

/// Joined outcome of one stage
#[derive(Debug)]
pub struct StageResult {
    pub stage: usize,

    /// One outcome per action, in declaration order
    pub outcome: Result<Vec<ActionOutcome>, StageError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactContent;
    use crate::definition::PipelineBuilder;
    use crate::domain::pipeline::{Action, ApprovalSpec, CommandSpec};
    use crate::engine::adapter::ActionAdapter;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ========================================================================
    // Test adapters
    // ========================================================================

    #[derive(Clone, Copy)]
    enum Behaviour {
        Produce(&'static str),
        Complete,
        Approve,
        Fail(&'static str),
        FailFirst(&'static str, &'static str),
    }

    struct FakeAdapter {
        behaviour: Behaviour,
        calls: Mutex<Vec<ActionRequest>>,
        count: AtomicUsize,
    }

    impl FakeAdapter {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: Mutex::new(Vec::new()),
                count: AtomicUsize::new(0),
            })
        }

        fn invocations(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }

        fn last_inputs(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .last()
                .map(|r| r.inputs.iter().map(|i| i.content.location.clone()).collect())
                .unwrap_or_default()
        }
    }

    fn content(location: &str) -> ArtifactContent {
        ArtifactContent {
            location: location.to_string(),
            files: Vec::new(),
        }
    }

    #[async_trait]
    impl ActionAdapter for FakeAdapter {
        async fn run(&self, request: ActionRequest) -> Result<ActionOutcome, StageError> {
            let previous = self.count.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(request);

            match self.behaviour {
                Behaviour::Produce(location) => Ok(ActionOutcome::Produced(content(location))),
                Behaviour::Complete => Ok(ActionOutcome::Completed),
                Behaviour::Approve => Ok(ActionOutcome::NeedsApproval),
                Behaviour::Fail(message) => Err(StageError::execution(message)),
                Behaviour::FailFirst(message, location) => {
                    if previous == 0 {
                        Err(StageError::execution(message))
                    } else {
                        Ok(ActionOutcome::Produced(content(location)))
                    }
                }
            }
        }
    }

    struct Fakes {
        source: Arc<FakeAdapter>,
        build: Arc<FakeAdapter>,
        approval: Arc<FakeAdapter>,
        deploy: Arc<FakeAdapter>,
    }

    impl Fakes {
        fn new(build: Behaviour) -> Self {
            Self {
                source: FakeAdapter::new(Behaviour::Produce("A1")),
                build: FakeAdapter::new(build),
                approval: FakeAdapter::new(Behaviour::Approve),
                deploy: FakeAdapter::new(Behaviour::Produce("A3")),
            }
        }

        fn adapters(&self) -> AdapterSet {
            AdapterSet::new(
                self.source.clone(),
                self.build.clone(),
                self.approval.clone(),
                self.deploy.clone(),
            )
        }
    }

    /// [Source -> A1, Build A1 -> A2, Approve, Deploy A2 -> A3]
    fn release_pipeline() -> Arc<Pipeline> {
        let spec = CommandSpec::new("amazonlinux:2", ["mvn package"]).artifact("*");
        let pipeline = PipelineBuilder::new("release")
            .stage("Source", vec![Action::source("checkout", "repo", "main").output("a1")])
            .unwrap()
            .stage("Build", vec![Action::build("compile", spec.clone()).input("a1").output("a2")])
            .unwrap()
            .stage("Approve", vec![Action::approval("approve", ApprovalSpec::default())])
            .unwrap()
            .stage("Deploy", vec![Action::deploy("ship", spec).input("a2").output("a3")])
            .unwrap()
            .build()
            .unwrap();
        Arc::new(pipeline)
    }

    fn failed(stage: usize, cause: &str) -> RunState {
        RunState::Failed {
            stage,
            cause: cause.to_string(),
        }
    }

    // ========================================================================
    // Scenarios
    // ========================================================================

    #[tokio::test]
    async fn test_reject_halts_before_deploy() {
        let fakes = Fakes::new(Behaviour::Produce("A2"));
        let mut executor = Executor::new(release_pipeline(), fakes.adapters());

        let state = executor.drive().await.unwrap();
        assert_eq!(state, RunState::AwaitingApproval { stage: 2 });

        let state = executor.reject().unwrap();
        assert_eq!(state, failed(2, "rejected"));
        assert_eq!(fakes.deploy.invocations(), 0);
        assert_eq!(executor.run().failure(), Some(("Approve", "rejected")));
    }

    #[tokio::test]
    async fn test_approve_deploys_build_output() {
        let fakes = Fakes::new(Behaviour::Produce("A2"));
        let mut executor = Executor::new(release_pipeline(), fakes.adapters());

        executor.drive().await.unwrap();
        assert_eq!(executor.approve().unwrap(), RunState::Running { stage: 3 });

        let state = executor.drive().await.unwrap();
        assert_eq!(state, RunState::Succeeded);
        assert_eq!(fakes.deploy.invocations(), 1);
        assert_eq!(fakes.deploy.last_inputs(), vec!["A2"]);
        assert_eq!(fakes.build.last_inputs(), vec!["A1"]);
        assert_eq!(
            executor.run().artifacts.resolve_name("a3").unwrap().location,
            "A3"
        );
        assert!(executor.run().completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failing_stage_halts_run() {
        let fakes = Fakes::new(Behaviour::Fail("mvn exited with 1"));
        let mut executor = Executor::new(release_pipeline(), fakes.adapters());

        let state = executor.drive().await.unwrap();
        assert_eq!(state, failed(1, "execution failed: mvn exited with 1"));
        assert_eq!(fakes.approval.invocations(), 0);
        assert_eq!(fakes.deploy.invocations(), 0);
        assert_eq!(executor.run().stages[1].status, StageStatus::Failed);
        assert!(!executor.run().artifacts.is_bound(
            executor.run().artifacts.lookup("a2").unwrap()
        ));
    }

    #[tokio::test]
    async fn test_missing_declared_output_fails_stage() {
        let fakes = Fakes::new(Behaviour::Complete);
        let mut executor = Executor::new(release_pipeline(), fakes.adapters());

        let state = executor.drive().await.unwrap();
        assert!(matches!(state, RunState::Failed { stage: 1, .. }));
        assert_eq!(fakes.approval.invocations(), 0);
    }

    #[tokio::test]
    async fn test_retry_is_idempotent() {
        let fakes = Fakes::new(Behaviour::Fail("boom"));
        let mut executor = Executor::new(release_pipeline(), fakes.adapters());

        let first = executor.drive().await.unwrap();
        let first_inputs = fakes.build.last_inputs();

        executor.retry().unwrap();
        let second = executor.drive().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fakes.build.last_inputs(), first_inputs);
        assert_eq!(executor.run().stages[1].attempts, 2);
        assert_eq!(fakes.source.invocations(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let fakes = Fakes::new(Behaviour::FailFirst("flaky", "A2"));
        let mut executor = Executor::new(release_pipeline(), fakes.adapters());

        assert!(matches!(
            executor.drive().await.unwrap(),
            RunState::Failed { stage: 1, .. }
        ));
        assert_eq!(executor.retry().unwrap(), RunState::Running { stage: 1 });
        assert_eq!(
            executor.drive().await.unwrap(),
            RunState::AwaitingApproval { stage: 2 }
        );
        assert_eq!(executor.run().stages[1].error, None);
    }

    // ========================================================================
    // Illegal transitions
    // ========================================================================

    #[tokio::test]
    async fn test_approve_outside_gate_does_not_mutate() {
        let fakes = Fakes::new(Behaviour::Produce("A2"));
        let mut executor = Executor::new(release_pipeline(), fakes.adapters());

        let err = executor.approve().unwrap_err();
        assert_eq!(err, StateError::NotAwaitingApproval(RunState::NotStarted));
        assert_eq!(executor.state(), &RunState::NotStarted);

        executor.drive().await.unwrap();
        executor.approve().unwrap();
        executor.drive().await.unwrap();

        let before = executor.run().clone();
        assert_eq!(
            executor.reject().unwrap_err(),
            StateError::NotAwaitingApproval(RunState::Succeeded)
        );
        assert_eq!(executor.run(), &before);
    }

    #[tokio::test]
    async fn test_cancel_and_retry_rules() {
        let fakes = Fakes::new(Behaviour::Produce("A2"));
        let mut executor = Executor::new(release_pipeline(), fakes.adapters());

        assert!(matches!(
            executor.retry(),
            Err(StateError::NotFailed(RunState::NotStarted))
        ));

        executor.drive().await.unwrap();
        assert_eq!(executor.cancel().unwrap(), failed(2, "cancelled"));
        assert!(matches!(
            executor.cancel(),
            Err(StateError::AlreadyFinished(_))
        ));
        assert!(matches!(executor.start(), Err(StateError::AlreadyStarted(_))));
    }

    #[tokio::test]
    async fn test_expire_approval() {
        let fakes = Fakes::new(Behaviour::Produce("A2"));
        let mut executor = Executor::new(release_pipeline(), fakes.adapters());

        executor.drive().await.unwrap();
        assert_eq!(
            executor.expire_approval().unwrap(),
            failed(2, "approval timeout")
        );
    }

    #[tokio::test]
    async fn test_interrupt_records_reason() {
        let fakes = Fakes::new(Behaviour::Produce("A2"));
        let mut executor = Executor::new(release_pipeline(), fakes.adapters());

        executor.drive().await.unwrap();
        assert_eq!(
            executor.interrupt("orchestrator restarted").unwrap(),
            failed(2, "orchestrator restarted")
        );
        assert_eq!(
            executor.run().stages[2].error.as_deref(),
            Some("orchestrator restarted")
        );

        // Interrupted runs can be retried like any other failure
        assert_eq!(executor.retry().unwrap(), RunState::Running { stage: 2 });
    }

    #[tokio::test]
    async fn test_stale_result_is_refused() {
        let fakes = Fakes::new(Behaviour::Produce("A2"));
        let mut executor = Executor::new(release_pipeline(), fakes.adapters());

        executor.start().unwrap();
        let dispatch = executor.dispatch().unwrap();
        executor.cancel().unwrap();

        let result = dispatch.join().await;
        assert!(matches!(
            executor.complete(result),
            Err(StateError::NotRunning(_))
        ));
        assert_eq!(executor.state(), &failed(0, "cancelled"));
    }

    #[test]
    fn test_approval_timeout_precedence() {
        let fakes = Fakes::new(Behaviour::Produce("A2"));
        let mut pipeline = (*release_pipeline()).clone();
        pipeline.config.approval_timeout_seconds = Some(600);

        let executor = Executor::new(Arc::new(pipeline.clone()), fakes.adapters());
        assert_eq!(executor.approval_timeout(2), Some(Duration::from_secs(600)));

        if let ActionKind::ManualApproval(spec) = &mut pipeline.stages[2].actions[0].kind {
            spec.timeout_seconds = Some(30);
        }
        let executor = Executor::new(Arc::new(pipeline), fakes.adapters());
        assert_eq!(executor.approval_timeout(2), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_parallel_actions_bind_all_outputs() {
        let spec = CommandSpec::new("alpine", ["make"]);
        let pipeline = PipelineBuilder::new("fan-out")
            .stage("Source", vec![Action::source("checkout", "repo", "main").output("src")])
            .unwrap()
            .stage(
                "Build",
                vec![
                    Action::build("linux", spec.clone()).input("src").output("linux"),
                    Action::build("docs", spec).input("src"),
                ],
            )
            .unwrap()
            .build()
            .unwrap();

        let fakes = Fakes::new(Behaviour::Produce("bin"));
        let mut executor = Executor::new(Arc::new(pipeline), fakes.adapters());

        assert_eq!(executor.drive().await.unwrap(), RunState::Succeeded);
        assert_eq!(fakes.build.invocations(), 2);
        assert!(executor.run().artifacts.resolve_name("linux").is_ok());
    }
}
