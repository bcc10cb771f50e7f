//! Service layer
//!
//! Services contain the runner's business logic: capability discovery and
//! the execution of source and command jobs.
//!
//! Services are trait-based so the scheduler can be driven by fakes.

mod capabilities;
mod command;
pub(crate) mod execution;
mod source;

// Re-export traits
pub use capabilities::CapabilitiesService;
pub use execution::{ExecutionService, JobMonitor};

// Re-export implementations
pub use capabilities::StandardCapabilitiesService;
pub use command::CommandExecutor;
pub use execution::StandardExecutionService;
pub use source::SourceExecutor;
