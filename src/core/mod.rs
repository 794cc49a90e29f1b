//! Core domain models for the scheduler
//!
//! This module defines jobs, stages, pipelines, their statuses and the
//! condition evaluator that gates stages on one another.

pub mod condition;
pub mod config;
pub mod job;
pub mod pipeline;
pub mod stage;
pub mod state;

pub use condition::*;
pub use job::*;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
