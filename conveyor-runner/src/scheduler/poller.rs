//! Job poller
//!
//! Polls the orchestrator for scheduled jobs and executes them.
//! Each job runs in its own task with a context holding its logs and
//! workspace.

use anyhow::{Context as AnyhowContext, Result};
use conveyor_core::domain::job::{Job, JobResult, TIMEOUT_EXIT_CODE};
use conveyor_core::error::StageError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::context::Context;
use crate::service::execution::required_capabilities;
use crate::service::{CapabilitiesService, ExecutionService};
use conveyor_client::OrchestratorClient;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

const COMPLETE_MAX_ATTEMPTS: u32 = 8;
const COMPLETE_INITIAL_DELAY: Duration = Duration::from_millis(500);
const COMPLETE_MAX_DELAY: Duration = Duration::from_secs(30);

/// Job poller that continuously polls for and executes jobs
pub struct JobPoller {
    config: Config,
    client: Arc<OrchestratorClient>,
    executor: Arc<dyn ExecutionService>,
    capabilities: Arc<dyn CapabilitiesService>,
    semaphore: Arc<Semaphore>,
}

impl JobPoller {
    /// Creates a new job poller
    pub fn new(
        config: Config,
        client: Arc<OrchestratorClient>,
        executor: Arc<dyn ExecutionService>,
        capabilities: Arc<dyn CapabilitiesService>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_jobs));
        Self {
            config,
            client,
            executor,
            capabilities,
            semaphore,
        }
    }

    /// Starts the polling loop
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting job poller (interval: {:?})",
            self.config.poll_interval
        );

        let _heartbeat_handle = self.start_heartbeat_loop();

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            interval.tick().await;

            debug!("Polling for scheduled jobs");

            match self.poll_once().await {
                Ok(started) => {
                    if started > 0 {
                        info!("Started {} job(s) this cycle", started);
                    }
                }
                Err(e) => {
                    error!("Error during poll cycle: {:#}", e);
                }
            }
        }
    }

    /// Performs a single poll cycle
    ///
    /// Jobs run in the background; the cycle only starts as many as there
    /// are free slots.
    async fn poll_once(&self) -> Result<usize> {
        if self.semaphore.available_permits() == 0 {
            debug!("All job slots busy, skipping poll");
            return Ok(0);
        }

        let jobs = self
            .client
            .list_scheduled_jobs(&self.config.runner_id)
            .await
            .context("Failed to fetch scheduled jobs")?;

        if jobs.is_empty() {
            debug!("No jobs available");
            return Ok(0);
        }

        debug!("Found {} scheduled job(s)", jobs.len());

        let mut started = 0;

        for job in jobs {
            if !self
                .capabilities
                .check_compatibility(&required_capabilities(&job.spec))
            {
                debug!("Job {} needs capabilities this runner lacks", job.id);
                continue;
            }

            // Try to acquire semaphore permit, stop if at max capacity
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!("Max parallel jobs reached, leaving job {} for later", job.id);
                break;
            };

            self.spawn_job_task(job.id, permit);
            started += 1;
        }

        Ok(started)
    }

    /// Spawns a task to execute a single job
    fn spawn_job_task(&self, job_id: Uuid, permit: OwnedSemaphorePermit) {
        let client = Arc::clone(&self.client);
        let executor = Arc::clone(&self.executor);
        let config = self.config.clone();

        tokio::spawn(async move {
            if let Err(e) = Self::execute_job(job_id, config, client, executor).await {
                error!("Failed to execute job {}: {:#}", job_id, e);
            }
            // Slot is free again
            drop(permit);
        });
    }

    /// Executes a single job with log streaming
    async fn execute_job(
        job_id: Uuid,
        config: Config,
        client: Arc<OrchestratorClient>,
        executor: Arc<dyn ExecutionService>,
    ) -> Result<()> {
        // Claim the job
        let job = match client.claim_job(job_id, &config.runner_id).await {
            Ok(job) => job,
            Err(e) if e.is_conflict() => {
                debug!("Job {} was taken by another runner", job_id);
                return Ok(());
            }
            Err(e) => return Err(e).context("Failed to claim job"),
        };

        info!(
            "Claimed job {} ({}/{} of run {})",
            job.id, job.stage, job.action, job.run_id
        );

        let context = Context::new(job_id, &config.workspace_base);

        // Spawn log sender task
        let log_sender = Self::spawn_log_sender(
            job_id,
            Arc::clone(&context),
            Arc::clone(&client),
            config.log_send_interval,
        );

        let result = run_with_timeout(
            executor.as_ref(),
            &job,
            Arc::clone(&context),
            config.job_timeout,
        )
        .await;

        // Always abort log sender
        log_sender.abort();

        context.remove_workspace();

        // Send remaining logs
        let remaining_logs = context.drain_logs();
        if !remaining_logs.is_empty() {
            debug!(
                "Sending {} remaining logs for job {}",
                remaining_logs.len(),
                job_id
            );
            if let Err(e) = client.send_logs(job_id, remaining_logs).await {
                warn!("Failed to send final logs: {:#}", e);
            }
        }

        info!("Job {} finished with status {}", job_id, result.status());

        // Report completion; the adapter waiting on the job only wakes up
        // once the orchestrator has the result
        with_backoff(COMPLETE_INITIAL_DELAY, || {
            client.complete_job(job_id, &config.runner_id, result.clone())
        })
        .await
        .context("Failed to complete job")?;

        Ok(())
    }

    /// Spawns a background task to send logs periodically
    fn spawn_log_sender(
        job_id: Uuid,
        context: Arc<Context>,
        client: Arc<OrchestratorClient>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);

            loop {
                ticker.tick().await;

                let logs = context.drain_logs();

                if logs.is_empty() {
                    continue;
                }

                debug!("Sending {} logs for job {}", logs.len(), job_id);

                if let Err(e) = client.send_logs(job_id, logs).await {
                    error!("Failed to send logs for job {}: {:#}", job_id, e);
                }
            }
        })
    }

    /// Starts a background task to send heartbeats
    fn start_heartbeat_loop(&self) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let runner_id = self.config.runner_id.clone();

        tokio::spawn(async move {
            let mut ticker = time::interval(HEARTBEAT_INTERVAL);

            loop {
                ticker.tick().await;

                debug!("Sending heartbeat");

                if let Err(e) = client.send_heartbeat(&runner_id).await {
                    warn!("Failed to send heartbeat: {:#}", e);
                }
            }
        })
    }
}

/// Executes a job, failing it with the timeout exit code when it takes
/// longer than `timeout`
///
/// Dropping the execution on timeout removes its container.
async fn run_with_timeout(
    executor: &dyn ExecutionService,
    job: &Job,
    context: Arc<Context>,
    timeout: Duration,
) -> JobResult {
    match time::timeout(timeout, executor.execute(job, Arc::clone(&context))).await {
        Ok(result) => result,
        Err(_) => {
            let message = format!("job timed out after {:?}", timeout);
            context.log_error(message.clone());
            JobResult::failed(StageError::execution(message), TIMEOUT_EXIT_CODE)
        }
    }
}

/// Retries `op` with exponential backoff
///
/// Gives up after `COMPLETE_MAX_ATTEMPTS` attempts, or at once when the
/// orchestrator rejects the request, as it does for a job that was already
/// failed after this runner was marked offline.
async fn with_backoff<T, F, Fut>(initial_delay: Duration, mut op: F) -> conveyor_client::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = conveyor_client::Result<T>>,
{
    let mut attempt = 0;
    let mut delay = initial_delay;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_client_error() || attempt >= COMPLETE_MAX_ATTEMPTS => return Err(e),
            Err(e) => {
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, COMPLETE_MAX_ATTEMPTS, e, delay
                );
                time::sleep(delay).await;
                delay = (delay * 2).min(COMPLETE_MAX_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conveyor_core::domain::job::{CheckoutRequest, JobSpec, JobStatus};
    use conveyor_client::ClientError;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Sleeping(Duration);

    #[async_trait]
    impl ExecutionService for Sleeping {
        async fn execute(&self, _job: &Job, ctx: Arc<Context>) -> JobResult {
            ctx.log_info("working");
            time::sleep(self.0).await;
            JobResult::succeeded(None)
        }
    }

    fn job() -> Job {
        let spec = JobSpec::Source(CheckoutRequest {
            run_id: Uuid::new_v4(),
            pipeline_name: "release".to_string(),
            stage: "Source".to_string(),
            action: "checkout".to_string(),
            repository: "app".to_string(),
            branch: "main".to_string(),
            output: "src".to_string(),
        });

        Job {
            id: Uuid::new_v4(),
            run_id: spec.run_id(),
            stage: spec.stage().to_string(),
            action: spec.action().to_string(),
            spec,
            status: JobStatus::Running,
            requested_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            runner_id: Some("runner-1".to_string()),
            result: None,
        }
    }

    #[tokio::test]
    async fn test_job_within_timeout_succeeds() {
        let ctx = Context::new(Uuid::new_v4(), Path::new("/tmp"));
        let result = run_with_timeout(
            &Sleeping(Duration::from_millis(10)),
            &job(),
            Arc::clone(&ctx),
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(result.status(), JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_job_exceeding_timeout_is_timed_out() {
        let ctx = Context::new(Uuid::new_v4(), Path::new("/tmp"));
        let result = run_with_timeout(
            &Sleeping(Duration::from_secs(30)),
            &job(),
            Arc::clone(&ctx),
            Duration::from_millis(50),
        )
        .await;

        assert_eq!(result.status(), JobStatus::TimedOut);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);

        let logs = ctx.drain_logs();
        assert_eq!(logs.first().map(|e| e.message.as_str()), Some("working"));
        assert!(logs.last().unwrap().message.contains("timed out after 50ms"));
    }

    #[tokio::test]
    async fn test_completion_retried_until_orchestrator_answers() {
        let attempts = &AtomicU32::new(0);

        let result = with_backoff(Duration::from_millis(1), move || async move {
            match attempts.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(ClientError::api_error(503, "Service Unavailable")),
                _ => Ok(()),
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejected_completion_is_not_retried() {
        let attempts = &AtomicU32::new(0);

        let result: conveyor_client::Result<()> = with_backoff(Duration::from_millis(1), move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::api_error(409, "Job is Failed and cannot be completed"))
        })
        .await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completion_gives_up_after_max_attempts() {
        let attempts = &AtomicU32::new(0);

        let result: conveyor_client::Result<()> = with_backoff(Duration::from_millis(1), move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::api_error(500, "boom"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), COMPLETE_MAX_ATTEMPTS);
    }
}
