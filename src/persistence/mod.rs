//! Persistence layer for pipelines and their job records

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqlitePipelineStore;

use crate::core::{HaltReason, Job, Pipeline, PipelineStatus, Transition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors raised by a pipeline store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("pipeline {0} not found")]
    PipelineNotFound(Uuid),

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    /// The pipeline changed since it was loaded; nothing was written
    #[error("pipeline {pipeline_id} was modified concurrently")]
    Conflict { pipeline_id: Uuid },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Change of the persisted pipeline status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: PipelineStatus,
    pub to: PipelineStatus,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Everything one scheduling pass writes, committed atomically.
///
/// Each transition carries the status it expects to overwrite, and the whole
/// changeset carries the lock version it was computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Changeset {
    pub pipeline_id: Uuid,
    pub expected_lock_version: u64,

    /// New records, in their final status for this pass
    pub created_jobs: Vec<Job>,

    /// Existing records flagged as retried
    pub superseded: Vec<Uuid>,

    /// Status changes of existing records
    pub transitions: Vec<Transition>,

    /// Lazy stages whose jobs were created
    pub materialized_stages: Vec<u32>,

    pub halt: Option<HaltReason>,
    pub status: Option<StatusChange>,
}

impl Changeset {
    /// Start an empty changeset against the pipeline as loaded
    pub fn new(pipeline: &Pipeline) -> Self {
        Self {
            pipeline_id: pipeline.id,
            expected_lock_version: pipeline.lock_version,
            created_jobs: Vec::new(),
            superseded: Vec::new(),
            transitions: Vec::new(),
            materialized_stages: Vec::new(),
            halt: None,
            status: None,
        }
    }

    /// Add a new record to the pipeline and to the changeset
    pub fn create_job(&mut self, pipeline: &mut Pipeline, job: Job) -> Uuid {
        let id = job.id;
        self.created_jobs.push(job.clone());
        pipeline.jobs.push(job);
        id
    }

    /// Record a transition already applied to `job`
    pub fn record(&mut self, job: &Job, transition: Transition) {
        match self.created_jobs.iter_mut().find(|created| created.id == job.id) {
            Some(created) => *created = job.clone(),
            None => self.transitions.push(transition),
        }
    }

    /// Flag a record as superseded
    pub fn supersede(&mut self, job: &mut Job) {
        job.retried = true;
        match self.created_jobs.iter_mut().find(|created| created.id == job.id) {
            Some(created) => created.retried = true,
            None => self.superseded.push(job.id),
        }
    }

    pub fn materialize(&mut self, pipeline: &mut Pipeline, stage_index: u32) {
        pipeline.lazy_stages.retain(|stage| stage.index != stage_index);
        self.materialized_stages.push(stage_index);
    }

    pub fn halt(&mut self, pipeline: &mut Pipeline, reason: HaltReason) {
        pipeline.halt = Some(reason.clone());
        self.halt = Some(reason);
    }

    /// Recompute the pipeline status and record it if it changed
    pub fn refresh_status(&mut self, pipeline: &mut Pipeline, at: DateTime<Utc>) -> bool {
        let next = pipeline.computed_status();
        if next == pipeline.status {
            return false;
        }

        let finished_at = next.is_terminal().then_some(at);
        let from = self.status.map(|change| change.from).unwrap_or(pipeline.status);
        self.status = Some(StatusChange {
            from,
            to: next,
            finished_at,
        });
        pipeline.status = next;
        pipeline.finished_at = finished_at;
        true
    }

    pub fn is_empty(&self) -> bool {
        self.created_jobs.is_empty()
            && self.superseded.is_empty()
            && self.transitions.is_empty()
            && self.materialized_stages.is_empty()
            && self.halt.is_none()
            && self.status.is_none()
    }

    /// Apply to a pipeline snapshot, checking the lock version and every expected status
    pub fn apply_to(&self, pipeline: &mut Pipeline) -> Result<(), StoreError> {
        let conflict = || StoreError::Conflict {
            pipeline_id: self.pipeline_id,
        };

        if pipeline.id != self.pipeline_id || pipeline.lock_version != self.expected_lock_version {
            return Err(conflict());
        }

        for id in &self.superseded {
            let job = pipeline.job_mut(*id).ok_or(StoreError::JobNotFound(*id))?;
            if job.retried {
                return Err(conflict());
            }
            job.retried = true;
        }

        for transition in &self.transitions {
            let job = pipeline
                .job_mut(transition.job_id)
                .ok_or(StoreError::JobNotFound(transition.job_id))?;
            if job.status != transition.from {
                return Err(conflict());
            }
            job.apply(transition.to, transition.at);
        }

        pipeline.jobs.extend(self.created_jobs.iter().cloned());
        pipeline
            .lazy_stages
            .retain(|stage| !self.materialized_stages.contains(&stage.index));

        if let Some(reason) = &self.halt {
            pipeline.halt = Some(reason.clone());
        }
        if let Some(change) = self.status {
            pipeline.status = change.to;
            pipeline.finished_at = change.finished_at;
        }

        pipeline.lock_version += 1;
        Ok(())
    }
}

/// Summary of a pipeline for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: Uuid,
    pub name: String,
    pub status: PipelineStatus,

    /// Number of current job records
    pub job_count: usize,

    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Pipeline> for PipelineSummary {
    fn from(pipeline: &Pipeline) -> Self {
        PipelineSummary {
            id: pipeline.id,
            name: pipeline.name.clone(),
            status: pipeline.status,
            job_count: pipeline.current_jobs().count(),
            created_at: pipeline.created_at,
            finished_at: pipeline.finished_at,
        }
    }
}

/// Persisted pipeline/job state shared by every scheduling pass
#[async_trait::async_trait]
pub trait PipelineStore: Send + Sync {
    /// Store a new pipeline with its initial jobs
    async fn create_pipeline(&self, pipeline: &Pipeline) -> Result<(), StoreError>;

    /// Load a pipeline with all of its job records
    async fn load_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline, StoreError>;

    /// Commit a changeset atomically, or fail with `Conflict` without writing anything
    async fn save_transitions(&self, changeset: &Changeset) -> Result<(), StoreError>;

    /// Pipeline that owns a job record
    async fn find_job(&self, job_id: Uuid) -> Result<Uuid, StoreError>;

    /// All pipelines, newest first
    async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>, StoreError>;
}

/// In-memory store (for testing or ephemeral use)
pub struct InMemoryStore {
    pipelines: RwLock<HashMap<Uuid, Pipeline>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            pipelines: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PipelineStore for InMemoryStore {
    async fn create_pipeline(&self, pipeline: &Pipeline) -> Result<(), StoreError> {
        let mut pipelines = self.pipelines.write().await;
        if pipelines.contains_key(&pipeline.id) {
            return Err(StoreError::Conflict {
                pipeline_id: pipeline.id,
            });
        }
        pipelines.insert(pipeline.id, pipeline.clone());
        Ok(())
    }

    async fn load_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline, StoreError> {
        let pipelines = self.pipelines.read().await;
        pipelines
            .get(&pipeline_id)
            .cloned()
            .ok_or(StoreError::PipelineNotFound(pipeline_id))
    }

    async fn save_transitions(&self, changeset: &Changeset) -> Result<(), StoreError> {
        let mut pipelines = self.pipelines.write().await;
        let current = pipelines
            .get(&changeset.pipeline_id)
            .ok_or(StoreError::PipelineNotFound(changeset.pipeline_id))?;

        let mut updated = current.clone();
        changeset.apply_to(&mut updated)?;
        pipelines.insert(updated.id, updated);
        Ok(())
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Uuid, StoreError> {
        let pipelines = self.pipelines.read().await;
        pipelines
            .values()
            .find(|pipeline| pipeline.job(job_id).is_some())
            .map(|pipeline| pipeline.id)
            .ok_or(StoreError::JobNotFound(job_id))
    }

    async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>, StoreError> {
        let pipelines = self.pipelines.read().await;
        let mut summaries: Vec<PipelineSummary> =
            pipelines.values().map(PipelineSummary::from).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}
