//! Pipeline domain model

use crate::core::{
    condition::{evaluate, Condition, Decision, StageOutcome},
    job::{Job, JobSpec},
    stage::Stage,
    state::{composite_status, JobStatus, PipelineStatus},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A stage whose jobs come from configuration once the stage is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LazyStage {
    pub index: u32,
    pub name: String,
}

/// Why a pipeline stopped being processed regardless of its jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HaltReason {
    /// Cancelled as a whole
    Canceled,
    /// A lazy stage could not be materialized
    Configuration { stage: String, message: String },
}

/// A pipeline run: every job record ever created for it, plus bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,

    /// Last status committed by a processing pass
    pub status: PipelineStatus,

    /// All job records, including superseded ones, in creation order
    pub jobs: Vec<Job>,

    /// Stages not materialized yet, ascending
    pub lazy_stages: Vec<LazyStage>,

    /// Optimistic lock; bumped by every committed change
    pub lock_version: u64,

    pub halt: Option<HaltReason>,

    /// YAML the pipeline was created from, used to materialize lazy stages
    pub config_source: Option<String>,

    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Pipeline {
    /// Create a pipeline with every job `created`
    pub fn new(
        name: impl Into<String>,
        specs: &[JobSpec],
        mut lazy_stages: Vec<LazyStage>,
    ) -> Self {
        let id = Uuid::new_v4();
        let jobs = specs
            .iter()
            .enumerate()
            .map(|(position, spec)| Job::from_spec(id, spec, position as u64, JobStatus::Created))
            .collect();
        lazy_stages.sort_by_key(|stage| stage.index);

        Pipeline {
            id,
            name: name.into(),
            status: PipelineStatus::Created,
            jobs,
            lazy_stages,
            lock_version: 0,
            halt: None,
            config_source: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn with_config_source(mut self, source: impl Into<String>) -> Self {
        self.config_source = Some(source.into());
        self
    }

    /// Get a job record by ID
    pub fn job(&self, id: Uuid) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    /// Get a mutable job record by ID
    pub fn job_mut(&mut self, id: Uuid) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    /// Job records that have not been superseded
    pub fn current_jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(|job| job.is_current())
    }

    /// The current record for a job name
    pub fn latest_job(&self, name: &str) -> Option<&Job> {
        self.jobs
            .iter()
            .filter(|job| job.name == name)
            .max_by_key(|job| job.position)
    }

    /// Position for the next created record
    pub fn next_position(&self) -> u64 {
        self.jobs.iter().map(|job| job.position + 1).max().unwrap_or(0)
    }

    /// Stage indices of current jobs and lazy stages, ascending
    pub fn stage_indices(&self) -> Vec<u32> {
        let indices: BTreeSet<u32> = self
            .current_jobs()
            .map(|job| job.stage_index)
            .chain(self.lazy_stages.iter().map(|stage| stage.index))
            .collect();
        indices.into_iter().collect()
    }

    pub fn lazy_stage(&self, index: u32) -> Option<&LazyStage> {
        self.lazy_stages.iter().find(|stage| stage.index == index)
    }

    /// View of one stage
    pub fn stage(&self, index: u32) -> Stage<'_> {
        let jobs: Vec<&Job> = self
            .current_jobs()
            .filter(|job| job.stage_index == index)
            .collect();
        let lazy = self.lazy_stage(index);
        let name = lazy
            .map(|stage| stage.name.clone())
            .or_else(|| jobs.first().map(|job| job.stage.clone()))
            .unwrap_or_else(|| format!("stage-{}", index));

        Stage {
            index,
            name,
            jobs,
            lazy: lazy.is_some(),
        }
    }

    /// All stages, ascending
    pub fn stages(&self) -> Vec<Stage<'_>> {
        self.stage_indices()
            .into_iter()
            .map(|index| self.stage(index))
            .collect()
    }

    /// Gating outcome of every stage below `index`
    pub fn outcome_before(&self, index: u32) -> StageOutcome {
        if self.lazy_stages.iter().any(|stage| stage.index < index) {
            return StageOutcome::NotYetSettled;
        }

        StageOutcome::from_composite(composite_status(
            self.current_jobs()
                .filter(|job| job.stage_index < index)
                .map(|job| (job.status, job.allow_failure)),
        ))
    }

    /// Whether a stage above `index` already has enqueued or running jobs.
    ///
    /// Work enqueued in a lower stage waits until those finish.
    pub fn busy_above(&self, index: u32) -> bool {
        self.current_jobs().any(|job| {
            job.stage_index > index && matches!(job.status, JobStatus::Pending | JobStatus::Running)
        })
    }

    /// Status derived from the current jobs; halts override it
    pub fn computed_status(&self) -> PipelineStatus {
        match &self.halt {
            Some(HaltReason::Canceled) => return PipelineStatus::Canceled,
            Some(HaltReason::Configuration { .. }) => return PipelineStatus::Failed,
            None => {}
        }

        let composite =
            composite_status(self.current_jobs().map(|job| (job.status, job.allow_failure)));
        match composite {
            Some(status) if self.lazy_stages.is_empty() => status,
            Some(PipelineStatus::Created) => PipelineStatus::Created,
            Some(PipelineStatus::Running) => PipelineStatus::Running,
            Some(_) => PipelineStatus::Pending,
            None if self.lazy_stages.is_empty() => PipelineStatus::Skipped,
            None => PipelineStatus::Created,
        }
    }

    /// Whether the pipeline no longer takes scheduling changes
    pub fn is_halted(&self) -> bool {
        self.halt.is_some()
    }

    /// Whether a job is a manual action an operator can trigger
    pub fn is_manual_action(&self, job: &Job) -> bool {
        job.is_current()
            && job.condition == Condition::Manual
            && job.status == JobStatus::Skipped
            && evaluate(job.condition, self.outcome_before(job.stage_index))
                == Decision::ManualAction
    }

    /// Manual actions, in creation order
    pub fn manual_actions(&self) -> Vec<&Job> {
        self.current_jobs()
            .filter(|job| self.is_manual_action(job))
            .collect()
    }
}
