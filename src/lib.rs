//! stagegate - a stage-gated CI pipeline scheduler

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use core::config::PipelineConfig;
pub use core::{
    Condition, HaltReason, Job, JobSpec, JobStatus, LazyStage, Pipeline, PipelineStatus,
    StageOutcome,
};
pub use execution::{
    ConfigEvaluator, DropReason, EmbeddedConfig, Engine, EngineConfig, Outcome, SchedulerError,
    SchedulerEvent,
};
pub use persistence::{Changeset, InMemoryStore, PipelineStore, StoreError};

#[cfg(feature = "sqlite")]
pub use persistence::SqlitePipelineStore;
