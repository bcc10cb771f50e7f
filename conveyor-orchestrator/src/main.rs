//! Conveyor Orchestrator
//!
//! Stores pipeline definitions, drives their runs and hands source and
//! command jobs to runners.
//!
//! Architecture:
//! - API: axum handlers, one module per resource
//! - Services: run manager, job queue and the business rules around them
//! - Repositories: Postgres access through sqlx

use anyhow::{Context, Result};
use conveyor_core::engine::{AdapterSet, DriverOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;
pub mod state;

use crate::config::Config;
use crate::service::dispatch::{RemoteBuildService, RemoteSourceControl};
use crate::service::job::JobQueue;
use crate::service::notifier::ApprovalPrompt;
use crate::service::run::RunManager;
use crate::service::runner_service;
use crate::state::AppState;

/// How often runners are checked for missed heartbeats
const RUNNER_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Conveyor Orchestrator...");

    let config = Config::from_env();
    config.validate().context("Invalid orchestrator configuration")?;

    tracing::info!("Connecting to database...");

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    // Jobs and runs left behind by a previous process can never finish
    let jobs = JobQueue::new(pool.clone());
    jobs.cancel_orphans()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to cancel orphaned jobs: {:?}", e))?;

    let adapters = AdapterSet::standard(
        Arc::new(RemoteSourceControl::new(jobs.clone())),
        Arc::new(RemoteBuildService::new(jobs.clone())),
        Arc::new(ApprovalPrompt::new(config.approval_webhook_url.clone())),
    );
    let options = DriverOptions {
        default_approval_timeout: config.approval_timeout,
    };
    let runs = RunManager::new(pool.clone(), adapters, options);

    let interrupted = runs
        .recover_interrupted()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to recover interrupted runs: {:?}", e))?;
    if interrupted > 0 {
        tracing::warn!("Marked {} interrupted run(s) as failed", interrupted);
    }

    spawn_runner_sweeper(pool.clone(), jobs.clone(), config.runner_timeout);

    // Build router with all API endpoints
    let app = api::create_router(AppState { pool, runs, jobs });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}

/// Periodically marks runners that stopped heartbeating as offline and fails
/// the jobs they were executing
fn spawn_runner_sweeper(pool: sqlx::PgPool, jobs: JobQueue, timeout: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RUNNER_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let lost =
                match runner_service::mark_stale_runners_offline(&pool, timeout.as_secs() as i64).await {
                    Ok(lost) => lost,
                    Err(e) => {
                        tracing::warn!("Failed to sweep stale runners: {:?}", e);
                        continue;
                    }
                };

            for runner_id in lost {
                if let Err(e) = jobs.fail_jobs_of_lost_runner(&runner_id).await {
                    tracing::warn!("Failed to fail jobs of runner {}: {:?}", runner_id, e);
                }
            }
        }
    });
}
