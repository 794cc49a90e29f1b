//! Stage view over a pipeline's jobs

use crate::core::{
    job::Job,
    state::{composite_status, PipelineStatus},
};

/// Jobs sharing a stage index. Derived from the pipeline on demand, never stored.
#[derive(Debug, Clone)]
pub struct Stage<'a> {
    pub index: u32,
    pub name: String,

    /// Current job records of the stage, in creation order
    pub jobs: Vec<&'a Job>,

    /// Declared, but jobs not materialized yet
    pub lazy: bool,
}

impl Stage<'_> {
    /// Composite status of the stage's jobs
    pub fn status(&self) -> Option<PipelineStatus> {
        composite_status(self.jobs.iter().map(|job| (job.status, job.allow_failure)))
    }

    /// No job left in created, pending or running
    pub fn is_settled(&self) -> bool {
        !self.lazy && self.jobs.iter().all(|job| !job.status.is_active())
    }
}
