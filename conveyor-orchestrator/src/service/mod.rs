//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services orchestrate between repositories and the execution engine.

pub mod dispatch;
pub mod job;
pub mod log;
pub mod notifier;
pub mod pipeline;
pub mod run;
pub mod runner;

// Re-export for convenience
pub use job as job_service;
pub use log as log_service;
pub use pipeline as pipeline_service;
pub use run as run_service;
pub use runner as runner_service;
