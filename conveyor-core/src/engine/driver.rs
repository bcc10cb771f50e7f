//! Run driver
//!
//! Runs one [`Executor`] on its own tokio task. The task is the only owner of
//! the run; everything else talks to it through a [`RunHandle`]:
//! - commands (approve, reject, cancel, retry) go through an mpsc channel and
//!   are answered on a oneshot channel
//! - every state change is published on a watch channel
//!
//! The driver exits when the run succeeds, or when the run is failed (or
//! waiting on an unbounded approval gate) and every handle has been dropped.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunState};
use crate::engine::executor::Executor;
use crate::error::StateError;

const COMMAND_BUFFER: usize = 16;

/// External command sent to a live run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCommand {
    Approve,
    Reject,
    Cancel,
    Retry,
}

impl std::fmt::Display for RunCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunCommand::Approve => write!(f, "approve"),
            RunCommand::Reject => write!(f, "reject"),
            RunCommand::Cancel => write!(f, "cancel"),
            RunCommand::Retry => write!(f, "retry"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("run driver has stopped")]
    Stopped,
}

/// Driver settings shared by every run
#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    /// Approval timeout used when neither the approval action nor the
    /// pipeline configures one. `None` waits forever.
    pub default_approval_timeout: Option<Duration>,
}

struct Envelope {
    command: RunCommand,
    reply: oneshot::Sender<Result<RunState, StateError>>,
}

/// Handle to a live run
#[derive(Clone)]
pub struct RunHandle {
    run_id: Uuid,
    commands: mpsc::Sender<Envelope>,
    snapshots: watch::Receiver<PipelineRun>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Latest published state of the run
    pub fn snapshot(&self) -> PipelineRun {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<PipelineRun> {
        self.snapshots.clone()
    }

    /// Returns true once the driver task has exited
    pub fn is_stopped(&self) -> bool {
        self.commands.is_closed()
    }

    /// Waits until the run reaches a state matching `done`
    ///
    /// Returns the last published snapshot if the driver exits first.
    pub async fn wait_for(&self, done: impl Fn(&RunState) -> bool) -> PipelineRun {
        let mut snapshots = self.subscribe();
        let reached = snapshots
            .wait_for(|run| done(&run.state))
            .await
            .map(|run| run.clone());

        reached.unwrap_or_else(|_| snapshots.borrow().clone())
    }

    pub async fn approve(&self) -> Result<RunState, DriverError> {
        self.send(RunCommand::Approve).await
    }

    pub async fn reject(&self) -> Result<RunState, DriverError> {
        self.send(RunCommand::Reject).await
    }

    pub async fn cancel(&self) -> Result<RunState, DriverError> {
        self.send(RunCommand::Cancel).await
    }

    pub async fn retry(&self) -> Result<RunState, DriverError> {
        self.send(RunCommand::Retry).await
    }

    /// Sends a command and waits for the driver to apply it
    pub async fn send(&self, command: RunCommand) -> Result<RunState, DriverError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Envelope { command, reply })
            .await
            .map_err(|_| DriverError::Stopped)?;

        let state = response.await.map_err(|_| DriverError::Stopped)??;
        Ok(state)
    }
}

/// Spawns a driver task for `executor`
///
/// The join handle resolves to the final run record.
pub fn spawn(executor: Executor, options: DriverOptions) -> (RunHandle, JoinHandle<PipelineRun>) {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (snapshots_tx, snapshots_rx) = watch::channel(executor.run().clone());

    let handle = RunHandle {
        run_id: executor.run().id,
        commands: commands_tx,
        snapshots: snapshots_rx,
    };

    let task = tokio::spawn(drive(executor, options, commands_rx, snapshots_tx));
    (handle, task)
}

fn apply(executor: &mut Executor, command: RunCommand) -> Result<RunState, StateError> {
    let result = match command {
        RunCommand::Approve => executor.approve(),
        RunCommand::Reject => executor.reject(),
        RunCommand::Cancel => executor.cancel(),
        RunCommand::Retry => executor.retry(),
    };

    if let Err(err) = &result {
        debug!("Refused {} for run {}: {}", command, executor.run().id, err);
    }
    result
}

/// Applies a command and replies to its sender
///
/// An accepted command is published before the reply goes out, so callers
/// reading the handle afterwards never see the previous state.
fn answer(
    envelope: Envelope,
    executor: &mut Executor,
    snapshots: &watch::Sender<PipelineRun>,
) -> bool {
    let result = apply(executor, envelope.command);
    let applied = result.is_ok();
    if applied {
        snapshots.send_replace(executor.run().clone());
    }
    // The caller may have given up waiting
    let _ = envelope.reply.send(result);
    applied
}

async fn drive(
    mut executor: Executor,
    options: DriverOptions,
    mut commands: mpsc::Receiver<Envelope>,
    snapshots: watch::Sender<PipelineRun>,
) -> PipelineRun {
    let run_id = executor.run().id;
    let mut closed = false;

    if let Err(err) = executor.start() {
        debug!("Run {} resumed in state {}", run_id, err.state());
    }

    'driver: loop {
        snapshots.send_replace(executor.run().clone());

        match executor.state().clone() {
            RunState::NotStarted | RunState::Succeeded => break 'driver,

            RunState::Running { .. } => {
                let dispatch = match executor.dispatch() {
                    Ok(dispatch) => dispatch,
                    Err(err) => {
                        warn!("Run {} could not dispatch: {}", run_id, err);
                        break 'driver;
                    }
                };
                snapshots.send_replace(executor.run().clone());

                let join = dispatch.join();
                tokio::pin!(join);

                loop {
                    tokio::select! {
                        result = &mut join => {
                            if let Err(err) = executor.complete(result) {
                                warn!("Run {} dropped a stage result: {}", run_id, err);
                            }
                            break;
                        }
                        envelope = commands.recv(), if !closed => match envelope {
                            Some(envelope) => {
                                let cancel = envelope.command == RunCommand::Cancel;
                                if answer(envelope, &mut executor, &snapshots) && cancel {
                                    info!("Run {} cancelled while running", run_id);
                                    // Leaving the loop drops `join`, aborting the actions
                                    break;
                                }
                            }
                            None => closed = true,
                        },
                    }
                }
            }

            RunState::AwaitingApproval { stage } => {
                let timeout = executor
                    .approval_timeout(stage)
                    .or(options.default_approval_timeout);
                let deadline = timeout.map(|t| Instant::now() + t);

                let expiry = async {
                    match deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                };
                tokio::pin!(expiry);

                loop {
                    tokio::select! {
                        _ = &mut expiry => {
                            info!("Approval for run {} timed out", run_id);
                            let _ = executor.expire_approval();
                            break;
                        }
                        envelope = commands.recv(), if !closed => match envelope {
                            Some(envelope) => {
                                if answer(envelope, &mut executor, &snapshots) {
                                    break;
                                }
                            }
                            None => {
                                closed = true;
                                if deadline.is_none() {
                                    debug!("Run {} left awaiting approval without handles", run_id);
                                    break 'driver;
                                }
                            }
                        },
                    }
                }
            }

            RunState::Failed { .. } => {
                if closed {
                    break 'driver;
                }
                match commands.recv().await {
                    Some(envelope) => {
                        answer(envelope, &mut executor, &snapshots);
                    }
                    None => break 'driver,
                }
            }
        }
    }

    snapshots.send_replace(executor.run().clone());
    debug!("Driver for run {} exited in state {}", run_id, executor.state());
    executor.into_run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactContent;
    use crate::definition::PipelineBuilder;
    use crate::domain::pipeline::{Action, ApprovalSpec, CommandSpec, Pipeline};
    use crate::engine::adapter::{ActionAdapter, ActionOutcome, ActionRequest, AdapterSet};
    use crate::error::StageError;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Produces `location` immediately, or never returns when `hang` is set
    struct StubAdapter {
        location: &'static str,
        hang: bool,
        approval: bool,
        calls: AtomicUsize,
    }

    impl StubAdapter {
        fn producing(location: &'static str) -> Arc<Self> {
            Arc::new(Self {
                location,
                hang: false,
                approval: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                location: "",
                hang: true,
                approval: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn gate() -> Arc<Self> {
            Arc::new(Self {
                location: "",
                hang: false,
                approval: true,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ActionAdapter for StubAdapter {
        async fn run(&self, _request: ActionRequest) -> Result<ActionOutcome, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                return std::future::pending().await;
            }
            if self.approval {
                return Ok(ActionOutcome::NeedsApproval);
            }
            Ok(ActionOutcome::Produced(ArtifactContent {
                location: self.location.to_string(),
                files: Vec::new(),
            }))
        }
    }

    fn pipeline() -> Arc<Pipeline> {
        let spec = CommandSpec::new("alpine", ["make"]).artifact("*");
        Arc::new(
            PipelineBuilder::new("release")
                .stage("Source", vec![Action::source("checkout", "repo", "main").output("a1")])
                .unwrap()
                .stage("Build", vec![Action::build("compile", spec.clone()).input("a1").output("a2")])
                .unwrap()
                .stage("Approve", vec![Action::approval("approve", ApprovalSpec::default())])
                .unwrap()
                .stage("Deploy", vec![Action::deploy("ship", spec).input("a2").output("a3")])
                .unwrap()
                .build()
                .unwrap(),
        )
    }

    fn adapters(build: Arc<StubAdapter>, deploy: Arc<StubAdapter>) -> AdapterSet {
        AdapterSet::new(StubAdapter::producing("A1"), build, StubAdapter::gate(), deploy)
    }

    fn awaiting(state: &RunState) -> bool {
        matches!(state, RunState::AwaitingApproval { .. })
    }

    #[tokio::test]
    async fn test_approve_through_handle() {
        let deploy = StubAdapter::producing("A3");
        let executor = Executor::new(pipeline(), adapters(StubAdapter::producing("A2"), deploy.clone()));
        let (handle, task) = spawn(executor, DriverOptions::default());

        let run = handle.wait_for(awaiting).await;
        assert_eq!(run.state, RunState::AwaitingApproval { stage: 2 });

        handle.approve().await.unwrap();
        let run = handle.wait_for(RunState::is_terminal).await;
        assert_eq!(run.state, RunState::Succeeded);
        assert_eq!(deploy.calls.load(Ordering::SeqCst), 1);

        let finished = task.await.unwrap();
        assert_eq!(finished.state, RunState::Succeeded);
    }

    #[tokio::test]
    async fn test_reject_through_handle() {
        let deploy = StubAdapter::producing("A3");
        let executor = Executor::new(pipeline(), adapters(StubAdapter::producing("A2"), deploy.clone()));
        let (handle, _task) = spawn(executor, DriverOptions::default());

        handle.wait_for(awaiting).await;
        let state = handle.reject().await.unwrap();

        assert_eq!(
            state,
            RunState::Failed {
                stage: 2,
                cause: "rejected".to_string()
            }
        );
        assert_eq!(deploy.calls.load(Ordering::SeqCst), 0);

        // A second decision is refused
        let err = handle.approve().await.unwrap_err();
        assert!(matches!(err, DriverError::State(StateError::NotAwaitingApproval(_))));
    }

    #[tokio::test]
    async fn test_cancel_while_running() {
        let build = StubAdapter::hanging();
        let executor = Executor::new(pipeline(), adapters(build.clone(), StubAdapter::producing("A3")));
        let (handle, task) = spawn(executor, DriverOptions::default());

        handle
            .wait_for(|s| matches!(s, RunState::Running { stage: 1 }))
            .await;

        let state = handle.cancel().await.unwrap();
        assert_eq!(
            state,
            RunState::Failed {
                stage: 1,
                cause: "cancelled".to_string()
            }
        );

        drop(handle);
        let finished = task.await.unwrap();
        assert_eq!(finished.stages[1].error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_approval_timeout_fails_run() {
        let executor = Executor::new(
            pipeline(),
            adapters(StubAdapter::producing("A2"), StubAdapter::producing("A3")),
        );
        let options = DriverOptions {
            default_approval_timeout: Some(Duration::from_millis(50)),
        };
        let (handle, _task) = spawn(executor, options);

        let run = handle.wait_for(RunState::is_terminal).await;
        assert_eq!(
            run.state,
            RunState::Failed {
                stage: 2,
                cause: "approval timeout".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_retry_after_rejection_reopens_stage() {
        let executor = Executor::new(
            pipeline(),
            adapters(StubAdapter::producing("A2"), StubAdapter::producing("A3")),
        );
        let (handle, _task) = spawn(executor, DriverOptions::default());

        handle.wait_for(awaiting).await;
        handle.reject().await.unwrap();

        assert_eq!(
            handle.retry().await.unwrap(),
            RunState::Running { stage: 2 }
        );
        let run = handle.wait_for(awaiting).await;
        assert_eq!(run.stages[2].attempts, 2);
    }

    #[tokio::test]
    async fn test_driver_exits_when_handles_dropped() {
        let executor = Executor::new(
            pipeline(),
            adapters(StubAdapter::producing("A2"), StubAdapter::producing("A3")),
        );
        let (handle, task) = spawn(executor, DriverOptions::default());

        handle.wait_for(awaiting).await;
        drop(handle);

        let run = task.await.unwrap();
        assert_eq!(run.state, RunState::AwaitingApproval { stage: 2 });
    }
}
