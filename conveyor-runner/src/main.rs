//! Conveyor Runner
//!
//! A stateless worker that executes the external work of pipeline runs:
//! source checkouts and command lists, each in a podman container.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Services: capabilities and job execution (sources, commands)
//! - Scheduler: Job polling and lifecycle management
//! - Store and caches: host directories shared between jobs
//!
//! The runner polls the orchestrator for scheduled jobs, executes them and
//! streams their logs back periodically.

mod cache;
mod config;
mod context;
mod podman;
mod scheduler;
mod service;
mod store;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::scheduler::JobPoller;
use crate::service::{
    CapabilitiesService, ExecutionService, JobMonitor, StandardCapabilitiesService,
    StandardExecutionService,
};
use conveyor_client::OrchestratorClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conveyor Runner");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: runner_id={}, orchestrator_url={}",
        config.runner_id, config.orchestrator_url
    );

    podman::check_podman_available()?;

    for dir in [
        &config.workspace_base,
        &config.artifact_root,
        &config.cache_root,
    ] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    info!("Artifact store at {}", config.artifact_root.display());

    // Initialize orchestrator client
    let client = Arc::new(OrchestratorClient::new(config.orchestrator_url.clone()));

    // Initialize services
    let capabilities_service: Arc<dyn CapabilitiesService> =
        Arc::new(StandardCapabilitiesService::new(config.allow_privileged));
    let capabilities = capabilities_service
        .discover()
        .context("Failed to discover capabilities")?;

    info!("Capabilities: {}", capabilities.join(", "));

    // Register capabilities with orchestrator (with retry logic)
    register_with_retry(&client, &config.runner_id, capabilities).await?;
    info!("Registered with orchestrator");

    let monitor: Arc<dyn JobMonitor> = client.clone();
    let execution_service: Arc<dyn ExecutionService> =
        Arc::new(StandardExecutionService::new(&config, monitor));

    let poller = JobPoller::new(
        config.clone(),
        client,
        execution_service,
        capabilities_service,
    );

    info!(
        "Poll interval: {:?}, log send interval: {:?}, job timeout: {:?}, max parallel jobs: {}",
        config.poll_interval, config.log_send_interval, config.job_timeout, config.max_parallel_jobs
    );

    if let Err(e) = poller.run().await {
        error!("Poller error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            info!("{}, using default configuration", e);
            Config::default()
        }
    };

    config.validate().context("Invalid runner configuration")?;
    Ok(config)
}

/// Register with orchestrator with retry logic and exponential backoff
///
/// The orchestrator may not be ready yet when the runner starts.
async fn register_with_retry(
    client: &Arc<OrchestratorClient>,
    runner_id: &str,
    capabilities: Vec<String>,
) -> Result<()> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match client
            .register_runner(runner_id, capabilities.clone())
            .await
        {
            Ok(_) => {
                if attempt > 1 {
                    info!(
                        "Successfully registered with orchestrator after {} attempt(s)",
                        attempt
                    );
                }
                return Ok(());
            }
            Err(e) if e.is_client_error() => {
                // Retrying a rejected registration cannot help
                return Err(anyhow::anyhow!("Orchestrator rejected registration: {}", e));
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    return Err(anyhow::anyhow!(
                        "Failed to register with orchestrator after {} attempts: {}",
                        MAX_RETRIES,
                        e
                    ));
                }

                warn!(
                    "Failed to register with orchestrator (attempt {}/{}): {}. Retrying in {} ms",
                    attempt, MAX_RETRIES, e, delay_ms
                );

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
