//! Pipeline execution engine
//!
//! - [`adapter`]: one adapter per action kind, plus the collaborator traits
//!   they call into
//! - [`executor`]: the per-run state machine
//! - [`driver`]: a tokio task owning one executor, controlled through a
//!   [`driver::RunHandle`]

pub mod adapter;
pub mod driver;
pub mod executor;

pub use adapter::{
    ActionAdapter, ActionOutcome, ActionRequest, AdapterSet, ApprovalNotifier, ApprovalRequest,
    BuildService, SourceControl,
};
pub use driver::{DriverError, DriverOptions, RunCommand, RunHandle};
pub use executor::{Executor, StageDispatch, StageResult};
