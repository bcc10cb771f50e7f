//! Data Transfer Objects for inter-service communication
//!
//! Request and response bodies exchanged between the orchestrator, runners
//! and the CLI. Domain types are sent as-is wherever they already fit.

pub mod job;
pub mod log;
pub mod pipeline;
pub mod run;
pub mod runner;
