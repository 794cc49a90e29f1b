//! Errors surfaced by the scheduler

use crate::core::{InvalidTransition, JobStatus, PipelineStatus};
use crate::persistence::StoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("pipeline {0} not found")]
    PipelineNotFound(Uuid),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("job {job_id} belongs to pipeline {actual}, not {expected}")]
    JobPipelineMismatch {
        job_id: Uuid,
        expected: Uuid,
        actual: Uuid,
    },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("job {job_id} is {status} and cannot be retried")]
    NotRetryable { job_id: Uuid, status: JobStatus },

    #[error("job {0} is not a manual action")]
    NotManualAction(Uuid),

    #[error("pipeline {pipeline_id} is {status} and takes no further changes")]
    PipelineHalted {
        pipeline_id: Uuid,
        status: PipelineStatus,
    },

    /// Concurrent passes kept invalidating this one; safe to retry
    #[error("pipeline {pipeline_id} was modified concurrently ({attempts} attempts)")]
    Conflict { pipeline_id: Uuid, attempts: u32 },

    #[error(transparent)]
    Store(StoreError),
}

impl SchedulerError {
    /// Whether re-invoking the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::Conflict { .. } | SchedulerError::Store(StoreError::Unavailable(_))
        )
    }
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PipelineNotFound(id) => SchedulerError::PipelineNotFound(id),
            StoreError::JobNotFound(id) => SchedulerError::JobNotFound(id),
            other => SchedulerError::Store(other),
        }
    }
}
