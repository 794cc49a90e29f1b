//! Job domain model

use crate::core::{
    condition::Condition,
    state::{InvalidTransition, JobStatus},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declaration of a job before it exists as a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Job name, unique among the pipeline's current jobs
    pub name: String,

    /// Stage name (informational)
    pub stage: String,

    /// Position of the stage; lower runs first
    pub stage_index: u32,

    /// When the job runs
    #[serde(default)]
    pub condition: Condition,

    /// A failure of this job does not fail the stage for gating
    #[serde(default)]
    pub allow_failure: bool,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, stage: impl Into<String>, stage_index: u32) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            stage_index,
            condition: Condition::default(),
            allow_failure: false,
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn allow_failure(mut self) -> Self {
        self.allow_failure = true;
        self
    }
}

/// A job record. Retries and manual plays create new records; this one's status only moves forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    pub stage: String,
    pub stage_index: u32,
    pub status: JobStatus,
    pub condition: Condition,
    pub allow_failure: bool,

    /// Creation order within the pipeline; the latest record for a name is the current one
    pub position: u64,

    /// Superseded by a newer record with the same name
    pub retried: bool,

    /// Operator that retried or played this job
    pub triggered_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A recorded status change of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub job_id: Uuid,
    pub from: JobStatus,
    pub to: JobStatus,
    pub at: DateTime<Utc>,
}

impl Job {
    /// Create a record from a spec
    pub fn from_spec(pipeline_id: Uuid, spec: &JobSpec, position: u64, status: JobStatus) -> Self {
        Job {
            id: Uuid::new_v4(),
            pipeline_id,
            name: spec.name.clone(),
            stage: spec.stage.clone(),
            stage_index: spec.stage_index,
            status,
            condition: spec.condition,
            allow_failure: spec.allow_failure,
            position,
            retried: false,
            triggered_by: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// The declaration this record was created from
    pub fn spec(&self) -> JobSpec {
        JobSpec {
            name: self.name.clone(),
            stage: self.stage.clone(),
            stage_index: self.stage_index,
            condition: self.condition,
            allow_failure: self.allow_failure,
        }
    }

    /// A fresh record with the same identity, meant to supersede this one
    pub fn supersede(&self, position: u64, status: JobStatus, actor: Option<&str>) -> Job {
        let mut job = Job::from_spec(self.pipeline_id, &self.spec(), position, status);
        job.triggered_by = actor.map(str::to_string);
        job
    }

    /// Whether this record counts for gating and aggregation
    pub fn is_current(&self) -> bool {
        !self.retried
    }

    /// Move to `next`, rejecting anything that is not a state machine edge
    pub fn transition(
        &mut self,
        next: JobStatus,
        at: DateTime<Utc>,
    ) -> Result<Transition, InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }

        let transition = Transition {
            job_id: self.id,
            from: self.status,
            to: next,
            at,
        };
        self.apply(next, at);
        Ok(transition)
    }

    /// Set the status and stamp timestamps without checking the state machine
    pub(crate) fn apply(&mut self, next: JobStatus, at: DateTime<Utc>) {
        if next == JobStatus::Running {
            self.started_at = Some(at);
        }
        if next.is_terminal() {
            self.finished_at = Some(at);
        }
        self.status = next;
    }
}
