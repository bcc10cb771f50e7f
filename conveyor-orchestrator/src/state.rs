//! Shared application state handed to every API handler

use sqlx::PgPool;

use crate::service::job::JobQueue;
use crate::service::run::RunManager;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub runs: RunManager,
    pub jobs: JobQueue,
}
