//! Run Service
//!
//! Owns the live runs of the orchestrator. Every unfinished run has a driver
//! task; the manager keeps a handle to it and a persistence task archives
//! each snapshot the driver publishes.
//!
//! Failed runs are evicted from the live set once archived, which lets their
//! driver exit. Commands for runs without a driver are applied to an executor
//! rebuilt from the archive, so a retry simply starts a new driver.

use conveyor_core::domain::run::{PipelineRun, RunState};
use conveyor_core::engine::driver::{self, DriverError, DriverOptions, RunCommand, RunHandle};
use conveyor_core::engine::{AdapterSet, Executor};
use conveyor_core::error::StateError;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::repository::{pipeline_repository, run_repository};

/// Cause recorded for runs found unfinished at startup
pub const RESTART_CAUSE: &str = "orchestrator restarted";

/// Service error type
#[derive(Debug)]
pub enum RunError {
    NotFound(Uuid),
    PipelineNotFound(Uuid),
    InvalidTransition(StateError),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for RunError {
    fn from(err: sqlx::Error) -> Self {
        RunError::DatabaseError(err)
    }
}

impl From<StateError> for RunError {
    fn from(err: StateError) -> Self {
        RunError::InvalidTransition(err)
    }
}

pub type Result<T> = std::result::Result<T, RunError>;

type LiveRuns = HashMap<Uuid, RunHandle>;

/// Shared handle to the live runs
#[derive(Clone)]
pub struct RunManager {
    pool: PgPool,
    adapters: AdapterSet,
    options: DriverOptions,
    live: Arc<Mutex<LiveRuns>>,
}

impl RunManager {
    pub fn new(pool: PgPool, adapters: AdapterSet, options: DriverOptions) -> Self {
        Self {
            pool,
            adapters,
            options,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts a new run of a pipeline
    pub async fn trigger(&self, pipeline_id: Uuid) -> Result<PipelineRun> {
        let pipeline = pipeline_repository::find_by_id(&self.pool, pipeline_id)
            .await?
            .ok_or(RunError::PipelineNotFound(pipeline_id))?;

        let executor = Executor::new(Arc::new(pipeline), self.adapters.clone());
        run_repository::create(&self.pool, executor.run()).await?;

        tracing::info!(
            "Triggered run {} of pipeline '{}'",
            executor.run().id,
            executor.pipeline().name
        );

        let handle = {
            let mut live = self.live.lock().await;
            self.launch(&mut live, executor)
        };

        Ok(handle.wait_for(|state| *state != RunState::NotStarted).await)
    }

    /// Current snapshot of a run
    pub async fn get(&self, run_id: Uuid) -> Result<PipelineRun> {
        if let Some(handle) = self.live.lock().await.get(&run_id) {
            return Ok(handle.snapshot());
        }

        run_repository::find_by_id(&self.pool, run_id)
            .await?
            .ok_or(RunError::NotFound(run_id))
    }

    /// Lists runs, newest first
    ///
    /// Live runs are reported with their latest snapshot.
    pub async fn list(&self, pipeline_id: Option<Uuid>) -> Result<Vec<PipelineRun>> {
        let mut runs = run_repository::list(&self.pool, pipeline_id).await?;

        let live = self.live.lock().await;
        for run in &mut runs {
            if let Some(handle) = live.get(&run.id) {
                *run = handle.snapshot();
            }
        }

        Ok(runs)
    }

    pub async fn approve(&self, run_id: Uuid) -> Result<PipelineRun> {
        self.command(run_id, RunCommand::Approve).await
    }

    pub async fn reject(&self, run_id: Uuid) -> Result<PipelineRun> {
        self.command(run_id, RunCommand::Reject).await
    }

    pub async fn cancel(&self, run_id: Uuid) -> Result<PipelineRun> {
        self.command(run_id, RunCommand::Cancel).await
    }

    pub async fn retry(&self, run_id: Uuid) -> Result<PipelineRun> {
        self.command(run_id, RunCommand::Retry).await
    }

    /// Fails every run the archive still shows as unfinished
    ///
    /// Their drivers died with the previous process, so nothing will ever
    /// advance them. They can be retried like any failed run.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let runs = run_repository::find_unfinished(&self.pool).await?;
        let count = runs.len();

        for run in runs {
            let run_id = run.id;
            let Some(pipeline) = pipeline_repository::find_by_id(&self.pool, run.pipeline_id).await?
            else {
                tracing::warn!("Run {} has no pipeline anymore", run_id);
                continue;
            };

            let mut executor = Executor::resume(Arc::new(pipeline), run, self.adapters.clone());
            executor.interrupt(RESTART_CAUSE)?;
            run_repository::save(&self.pool, executor.run()).await?;

            tracing::warn!("Run {} was interrupted by a restart", run_id);
        }

        Ok(count)
    }

    /// Sends a command to a run
    ///
    /// The live set stays locked for the whole command, so eviction never
    /// races with a command that would keep the run going.
    async fn command(&self, run_id: Uuid, command: RunCommand) -> Result<PipelineRun> {
        let mut live = self.live.lock().await;

        if let Some(handle) = live.get(&run_id) {
            match handle.send(command).await {
                Ok(state) => {
                    tracing::info!("Run {}: {} -> {}", run_id, command, state);
                    return Ok(handle.snapshot());
                }
                Err(DriverError::State(err)) => return Err(err.into()),
                Err(DriverError::Stopped) => {
                    live.remove(&run_id);
                }
            }
        }

        self.command_archived(&mut live, run_id, command).await
    }

    /// Applies a command to a run that has no driver
    async fn command_archived(
        &self,
        live: &mut LiveRuns,
        run_id: Uuid,
        command: RunCommand,
    ) -> Result<PipelineRun> {
        let run = run_repository::find_by_id(&self.pool, run_id)
            .await?
            .ok_or(RunError::NotFound(run_id))?;
        let pipeline = pipeline_repository::find_by_id(&self.pool, run.pipeline_id)
            .await?
            .ok_or(RunError::PipelineNotFound(run.pipeline_id))?;

        let mut executor = Executor::resume(Arc::new(pipeline), run, self.adapters.clone());
        let state = match command {
            RunCommand::Approve => executor.approve(),
            RunCommand::Reject => executor.reject(),
            RunCommand::Cancel => executor.cancel(),
            RunCommand::Retry => executor.retry(),
        }?;

        tracing::info!("Run {}: {} -> {} (from archive)", run_id, command, state);

        if state.is_terminal() {
            run_repository::save(&self.pool, executor.run()).await?;
            return Ok(executor.into_run());
        }

        Ok(self.launch(live, executor).snapshot())
    }

    /// Spawns a driver for `executor` and the task archiving its snapshots
    fn launch(&self, live: &mut LiveRuns, executor: Executor) -> RunHandle {
        let run_id = executor.run().id;
        let (handle, task) = driver::spawn(executor, self.options.clone());

        live.insert(run_id, handle.clone());
        tokio::spawn(self.clone().persist(handle.subscribe(), task));

        handle
    }

    async fn persist(
        self,
        mut snapshots: watch::Receiver<PipelineRun>,
        task: JoinHandle<PipelineRun>,
    ) {
        let run_id = snapshots.borrow().id;

        loop {
            let run = snapshots.borrow_and_update().clone();
            if let Err(e) = run_repository::save(&self.pool, &run).await {
                tracing::error!("Failed to archive run {}: {}", run_id, e);
            }

            if self.evict(&run, &snapshots).await {
                tracing::debug!("Run {} archived as failed", run_id);
                break;
            }

            if snapshots.changed().await.is_err() {
                // Driver exited; its last snapshot is already archived
                let mut live = self.live.lock().await;
                if live.get(&run_id).is_some_and(RunHandle::is_stopped) {
                    live.remove(&run_id);
                }
                break;
            }
        }

        if let Err(e) = task.await {
            tracing::error!("Driver of run {} panicked: {}", run_id, e);
        }
    }

    /// Drops the live handle of a failed run whose archived snapshot is
    /// still the latest
    ///
    /// A run retried after `saved` was taken keeps its handle and gets
    /// archived again.
    async fn evict(&self, saved: &PipelineRun, snapshots: &watch::Receiver<PipelineRun>) -> bool {
        let mut live = self.live.lock().await;

        if !is_settled_failure(saved, snapshots) {
            return false;
        }

        live.remove(&saved.id);
        true
    }
}

fn is_settled_failure(saved: &PipelineRun, snapshots: &watch::Receiver<PipelineRun>) -> bool {
    matches!(saved.state, RunState::Failed { .. }) && *snapshots.borrow() == *saved
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conveyor_core::definition::PipelineBuilder;
    use conveyor_core::domain::pipeline::{Action, ApprovalSpec, CommandSpec};
    use conveyor_core::engine::{ActionAdapter, ActionOutcome, ActionRequest};
    use conveyor_core::error::StageError;
    use conveyor_core::ArtifactContent;

    struct Producing;

    #[async_trait]
    impl ActionAdapter for Producing {
        async fn run(&self, request: ActionRequest) -> std::result::Result<ActionOutcome, StageError> {
            Ok(ActionOutcome::Produced(ArtifactContent {
                location: format!("{}/{}", request.run_id, request.stage),
                files: Vec::new(),
            }))
        }
    }

    struct Gate;

    #[async_trait]
    impl ActionAdapter for Gate {
        async fn run(&self, _request: ActionRequest) -> std::result::Result<ActionOutcome, StageError> {
            Ok(ActionOutcome::NeedsApproval)
        }
    }

    /// An executor already waiting at the approval gate of a
    /// Source/Build/Approve/Deploy pipeline
    async fn gated_executor() -> Executor {
        let spec = CommandSpec::new("docker.io/library/alpine:3", ["make"]).artifact("dist/*");
        let pipeline = PipelineBuilder::new("release")
            .stage("Source", vec![Action::source("checkout", "app", "main").output("a1")])
            .unwrap()
            .stage("Build", vec![Action::build("compile", spec.clone()).input("a1").output("a2")])
            .unwrap()
            .stage("Approve", vec![Action::approval("approve", ApprovalSpec::default())])
            .unwrap()
            .stage("Deploy", vec![Action::deploy("ship", spec).input("a2")])
            .unwrap()
            .build()
            .unwrap();

        let adapters = AdapterSet::new(
            Arc::new(Producing),
            Arc::new(Producing),
            Arc::new(Gate),
            Arc::new(Producing),
        );

        let mut executor = Executor::new(Arc::new(pipeline), adapters);
        executor.drive().await.unwrap();
        executor
    }

    #[tokio::test]
    async fn test_restart_interrupt_matches_recovery_cause() {
        let mut executor = gated_executor().await;
        assert_eq!(executor.state(), &RunState::AwaitingApproval { stage: 2 });

        let state = executor.interrupt(RESTART_CAUSE).unwrap();
        assert_eq!(
            state,
            RunState::Failed {
                stage: 2,
                cause: "orchestrator restarted".to_string()
            }
        );
        assert_eq!(executor.run().failure(), Some(("Approve", "orchestrator restarted")));
    }

    #[tokio::test]
    async fn test_state_errors_convert_to_invalid_transition() {
        let mut executor = gated_executor().await;
        executor.reject().unwrap();

        let err: RunError = executor.approve().unwrap_err().into();
        assert!(matches!(
            err,
            RunError::InvalidTransition(StateError::NotAwaitingApproval(RunState::Failed { stage: 2, .. }))
        ));
    }

    #[tokio::test]
    async fn test_failure_superseded_before_eviction_is_not_settled() {
        let mut executor = gated_executor().await;
        executor.reject().unwrap();

        let (sender, mut snapshots) = watch::channel(executor.run().clone());
        let saved = snapshots.borrow_and_update().clone();
        assert!(is_settled_failure(&saved, &snapshots));

        let mut retried = saved.clone();
        retried.state = RunState::Failed {
            stage: 2,
            cause: "cancelled".to_string(),
        };
        sender.send(retried).unwrap();
        assert!(!is_settled_failure(&saved, &snapshots));

        let latest = snapshots.borrow_and_update().clone();
        assert!(is_settled_failure(&latest, &snapshots));
    }

    #[tokio::test]
    async fn test_unfailed_snapshot_is_never_settled() {
        let executor = gated_executor().await;
        let (_sender, snapshots) = watch::channel(executor.run().clone());

        assert!(!is_settled_failure(&executor.run().clone(), &snapshots));
    }
}
