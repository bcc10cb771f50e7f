//! Conveyor Lua definitions
//!
//! Pipelines are declared in Lua files evaluated inside a restricted sandbox.
//! This crate provides:
//! - The sandbox and its `pipeline` helper module
//! - The parser turning a definition into a validated [`Pipeline`]

pub mod parser;
pub mod sandbox;

pub use parser::parse_pipeline;
pub use sandbox::create_sandbox;

pub use conveyor_core::domain::pipeline::Pipeline;
