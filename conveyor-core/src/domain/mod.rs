//! Core domain types
//!
//! This module contains the core domain structures used across Conveyor services.
//! These types represent the fundamental business entities and are shared between
//! orchestrator (for persistence and run driving) and runner (for job execution).

pub mod job;
pub mod log;
pub mod pipeline;
pub mod run;
pub mod runner;
