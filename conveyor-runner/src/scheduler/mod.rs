//! Scheduler layer for the runner
//!
//! Polls the orchestrator for jobs this runner can take and drives each one
//! from claim to completion.

pub mod poller;

pub use poller::JobPoller;
