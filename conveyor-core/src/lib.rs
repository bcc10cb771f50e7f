//! Conveyor Core
//!
//! Core types and the pipeline engine for the Conveyor release pipeline system.
//!
//! This crate contains:
//! - Domain types: Pipeline, Stage, Action, PipelineRun, Job, etc.
//! - Definition store: validated, ordered stage declarations
//! - Artifact registry: run-scoped artifact handles
//! - Engine: the run executor, its driver task and the action adapters
//! - DTOs: Data transfer objects for inter-service communication

pub mod artifact;
pub mod definition;
pub mod domain;
pub mod dto;
pub mod engine;
pub mod error;

pub use artifact::{ArtifactContent, ArtifactHandle, ArtifactRegistry, ResolvedInput};
pub use definition::PipelineBuilder;
pub use error::{ArtifactError, ConfigError, StageError, StateError};
