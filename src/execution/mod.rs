//! Pipeline scheduling: processing passes, handlers and the engine

pub mod engine;
pub mod error;
pub mod handlers;
pub mod materialize;
pub mod processor;

pub use engine::{Engine, EngineConfig, EventHandler, SchedulerEvent};
pub use error::SchedulerError;
pub use handlers::{DropReason, Outcome};
pub use materialize::{ConfigEvaluator, EmbeddedConfig, MaterializeError, NoLazyStages};
pub use processor::PipelineProcessor;
