//! Job Service
//!
//! The job queue between the run drivers and the runners. A driver's adapter
//! submits a job and waits; a runner claims it, executes it and reports the
//! result, which wakes the waiting adapter.

use conveyor_core::domain::job::{Job, JobResult, JobSpec, JobStatus};
use conveyor_core::error::StageError;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use uuid::Uuid;

use crate::repository::{job_repository, runner_repository};

/// Capability a runner needs for jobs that ask for a privileged environment
const PRIVILEGED_CAPABILITY: &str = "privileged";

/// Service error type
#[derive(Debug)]
pub enum JobError {
    NotFound(Uuid),
    InvalidState(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::DatabaseError(err)
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

// =============================================================================
// Job Queue
// =============================================================================

/// Shared handle to the job queue
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
    waiters: Waiters,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            waiters: Waiters::default(),
        }
    }

    /// Queues a job and waits for its result
    ///
    /// Dropping the returned future marks the job cancelled, which is what a
    /// runner polling the job sees after the run is cancelled.
    pub async fn submit(&self, spec: JobSpec) -> std::result::Result<JobResult, StageError> {
        let job = new_job(spec);
        let receiver = self.waiters.register(job.id).await;
        let mut pending = PendingJob {
            queue: self.clone(),
            job_id: job.id,
            settled: false,
        };

        job_repository::create(&self.pool, &job)
            .await
            .map_err(|e| StageError::execution(format!("failed to queue job: {}", e)))?;

        tracing::info!(
            "Queued job {} for {}/{} of run {}",
            job.id,
            job.stage,
            job.action,
            job.run_id
        );

        let result = receiver
            .await
            .map_err(|_| StageError::execution(format!("job {} was abandoned", job.id)));
        pending.settled = true;

        result
    }

    /// Queued jobs the given runner is able to execute
    pub async fn list_scheduled(&self, runner_id: &str) -> Result<Vec<Job>> {
        let capabilities = runner_repository::find_by_id(&self.pool, runner_id)
            .await?
            .map(|r| r.capabilities);

        let jobs = job_repository::find_by_status(&self.pool, JobStatus::Queued).await?;

        Ok(match capabilities {
            Some(capabilities) => jobs
                .into_iter()
                .filter(|job| runner_can_run(job, &capabilities))
                .collect(),
            None => jobs,
        })
    }

    /// Get a job by ID
    pub async fn get(&self, job_id: Uuid) -> Result<Job> {
        job_repository::find_by_id(&self.pool, job_id)
            .await?
            .ok_or(JobError::NotFound(job_id))
    }

    /// Assigns a queued job to a runner
    pub async fn claim(&self, job_id: Uuid, runner_id: &str) -> Result<Job> {
        if runner_id.trim().is_empty() {
            return Err(JobError::ValidationError(
                "Runner ID cannot be empty".to_string(),
            ));
        }

        if !job_repository::claim(&self.pool, job_id, runner_id).await? {
            let job = self.get(job_id).await?;
            return Err(JobError::InvalidState(format!(
                "Job {} is {} and cannot be claimed",
                job_id, job.status
            )));
        }

        tracing::info!("Runner {} claimed job {}", runner_id, job_id);

        self.get(job_id).await
    }

    /// Records a job result and wakes the adapter waiting for it
    ///
    /// Results for jobs that were cancelled in the meantime are accepted and
    /// dropped.
    pub async fn complete(&self, job_id: Uuid, runner_id: &str, result: JobResult) -> Result<()> {
        let job = self.get(job_id).await?;

        if job.status == JobStatus::Cancelled {
            tracing::info!("Ignoring result of cancelled job {}", job_id);
            return Ok(());
        }

        if job.status != JobStatus::Running {
            return Err(JobError::InvalidState(format!(
                "Job {} is {} and cannot be completed",
                job_id, job.status
            )));
        }

        if job.runner_id.as_deref() != Some(runner_id) {
            return Err(JobError::InvalidState(format!(
                "Job {} is not assigned to runner {}",
                job_id, runner_id
            )));
        }

        if !job_repository::complete(&self.pool, job_id, &result).await? {
            return Err(JobError::InvalidState(format!(
                "Job {} finished concurrently",
                job_id
            )));
        }

        tracing::info!("Job {} completed with status {}", job_id, result.status());

        if !self.waiters.deliver(job_id, result).await {
            tracing::warn!("No run is waiting for job {} anymore", job_id);
        }

        Ok(())
    }

    /// Fails the jobs a runner was executing when it went offline
    ///
    /// The adapters waiting on those jobs are woken with the failure.
    pub async fn fail_jobs_of_lost_runner(&self, runner_id: &str) -> Result<u64> {
        let jobs = job_repository::find_running_by_runner(&self.pool, runner_id).await?;
        let mut failed = 0;

        for job in jobs {
            let result = lost_runner_result(runner_id);

            if !job_repository::complete(&self.pool, job.id, &result).await? {
                continue;
            }

            tracing::warn!("Job {} failed: runner {} went offline", job.id, runner_id);
            self.waiters.deliver(job.id, result).await;
            failed += 1;
        }

        Ok(failed)
    }

    /// Cancels every unfinished job, for startup after a restart
    pub async fn cancel_orphans(&self) -> Result<u64> {
        let count = job_repository::cancel_unfinished(&self.pool).await?;

        if count > 0 {
            tracing::info!("Cancelled {} job(s) left over from a previous start", count);
        }

        Ok(count)
    }

    async fn abandon(&self, job_id: Uuid) {
        self.waiters.forget(job_id).await;

        match job_repository::mark_cancelled(&self.pool, job_id).await {
            Ok(true) => tracing::info!("Job {} cancelled", job_id),
            Ok(false) => {}
            Err(e) => tracing::error!("Failed to cancel job {}: {}", job_id, e),
        }
    }
}

/// Marks the job cancelled if the submitting future is dropped early
struct PendingJob {
    queue: JobQueue,
    job_id: Uuid,
    settled: bool,
}

impl Drop for PendingJob {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let queue = self.queue.clone();
        let job_id = self.job_id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { queue.abandon(job_id).await });
        }
    }
}

// =============================================================================
// Waiters
// =============================================================================

/// Completion channels of the jobs adapters are waiting on
#[derive(Clone, Default)]
struct Waiters {
    inner: Arc<Mutex<HashMap<Uuid, oneshot::Sender<JobResult>>>>,
}

impl Waiters {
    async fn register(&self, job_id: Uuid) -> oneshot::Receiver<JobResult> {
        let (sender, receiver) = oneshot::channel();
        self.inner.lock().await.insert(job_id, sender);
        receiver
    }

    /// Returns false when nobody is waiting for the job
    async fn deliver(&self, job_id: Uuid, result: JobResult) -> bool {
        match self.inner.lock().await.remove(&job_id) {
            Some(sender) => sender.send(result).is_ok(),
            None => false,
        }
    }

    async fn forget(&self, job_id: Uuid) {
        self.inner.lock().await.remove(&job_id);
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn new_job(spec: JobSpec) -> Job {
    Job {
        id: Uuid::new_v4(),
        run_id: spec.run_id(),
        stage: spec.stage().to_string(),
        action: spec.action().to_string(),
        spec,
        status: JobStatus::Queued,
        requested_at: chrono::Utc::now(),
        started_at: None,
        completed_at: None,
        runner_id: None,
        result: None,
    }
}

fn lost_runner_result(runner_id: &str) -> JobResult {
    JobResult::failed(
        StageError::execution(format!("runner {} went offline", runner_id)),
        1,
    )
}

/// Returns true if a runner with `capabilities` may execute `job`
fn runner_can_run(job: &Job, capabilities: &[String]) -> bool {
    let has = |capability: &str| capabilities.iter().any(|c| c == capability);

    match &job.spec {
        JobSpec::Source(_) => has("source"),
        JobSpec::Command(req) => has("command") && (!req.spec.privileged || has(PRIVILEGED_CAPABILITY)),
    }
}
