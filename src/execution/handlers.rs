//! Retry, cancel and job report handlers
//!
//! Each handler mutates an in-memory pipeline snapshot and records what it did
//! in a changeset; the engine runs the processor afterwards and commits both
//! together.

use crate::core::{HaltReason, JobStatus, Pipeline};
use crate::execution::error::SchedulerError;
use crate::persistence::Changeset;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Result of a handler that did not fail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// State changed in place
    Applied,
    /// A new job record was created
    Created { job_id: Uuid },
    /// Nothing to do
    Noop { reason: String },
}

impl Outcome {
    fn noop(reason: impl Into<String>) -> Self {
        Outcome::Noop {
            reason: reason.into(),
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Outcome::Noop { .. })
    }

    pub fn created_job(&self) -> Option<Uuid> {
        match self {
            Outcome::Created { job_id } => Some(*job_id),
            _ => None,
        }
    }
}

/// How a job ended when dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The job reported failure
    Failed,
    /// An operator cancelled the job
    Canceled,
}

impl DropReason {
    pub fn status(self) -> JobStatus {
        match self {
            DropReason::Failed => JobStatus::Failed,
            DropReason::Canceled => JobStatus::Canceled,
        }
    }
}

fn halted(pipeline: &Pipeline) -> SchedulerError {
    SchedulerError::PipelineHalted {
        pipeline_id: pipeline.id,
        status: pipeline.computed_status(),
    }
}

/// Supersede a failed or cancelled job with a fresh record
pub fn retry(
    pipeline: &mut Pipeline,
    changeset: &mut Changeset,
    job_id: Uuid,
    actor: Option<&str>,
) -> Result<Outcome, SchedulerError> {
    let job = pipeline.job(job_id).ok_or(SchedulerError::JobNotFound(job_id))?;

    if !job.is_current() {
        return Ok(Outcome::noop(format!("job {} was already retried", job.name)));
    }
    match job.status {
        JobStatus::Failed | JobStatus::Canceled => {}
        JobStatus::Success | JobStatus::Skipped => {
            return Ok(Outcome::noop(format!("job {} is {}", job.name, job.status)));
        }
        status => return Err(SchedulerError::NotRetryable { job_id, status }),
    }
    if pipeline.is_halted() {
        return Err(halted(pipeline));
    }

    let stage_index = job.stage_index;
    let enqueue =
        pipeline.outcome_before(stage_index).is_settled() && !pipeline.busy_above(stage_index);
    let status = if enqueue {
        JobStatus::Pending
    } else {
        JobStatus::Created
    };
    let replacement = job.supersede(pipeline.next_position(), status, actor);

    // Skipped jobs of later stages are re-created so they are evaluated again
    let later: Vec<Uuid> = pipeline
        .current_jobs()
        .filter(|later| later.stage_index > stage_index && later.status == JobStatus::Skipped)
        .map(|later| later.id)
        .collect();

    if let Some(old) = pipeline.job_mut(job_id) {
        changeset.supersede(old);
    }
    let new_id = changeset.create_job(pipeline, replacement);

    for id in later {
        let position = pipeline.next_position();
        let Some(old) = pipeline.job_mut(id) else {
            continue;
        };
        changeset.supersede(old);
        let fresh = old.supersede(position, JobStatus::Created, None);
        debug!("Re-creating skipped job {} after retry", fresh.name);
        changeset.create_job(pipeline, fresh);
    }

    info!("Retried job {} as {} ({})", job_id, new_id, status);
    Ok(Outcome::Created { job_id: new_id })
}

/// Cancel every unfinished job and halt the pipeline
pub fn cancel(
    pipeline: &mut Pipeline,
    changeset: &mut Changeset,
) -> Result<Outcome, SchedulerError> {
    let status = pipeline.computed_status();
    if status.is_terminal() {
        return Ok(Outcome::noop(format!("pipeline is already {}", status)));
    }

    let at = Utc::now();
    let active: Vec<Uuid> = pipeline
        .current_jobs()
        .filter(|job| job.status.can_transition_to(JobStatus::Canceled))
        .map(|job| job.id)
        .collect();

    for id in active {
        if let Some(job) = pipeline.job_mut(id) {
            let transition = job.transition(JobStatus::Canceled, at)?;
            changeset.record(job, transition);
        }
    }
    changeset.halt(pipeline, HaltReason::Canceled);

    info!("Cancelled pipeline {}", pipeline.id);
    Ok(Outcome::Applied)
}

/// Move a job to a status reported from outside the scheduler
pub fn report(
    pipeline: &mut Pipeline,
    changeset: &mut Changeset,
    job_id: Uuid,
    next: JobStatus,
) -> Result<Outcome, SchedulerError> {
    let job = pipeline
        .job_mut(job_id)
        .ok_or(SchedulerError::JobNotFound(job_id))?;

    if job.status == next {
        return Ok(Outcome::noop(format!("job {} is already {}", job.name, next)));
    }

    let transition = job.transition(next, Utc::now())?;
    changeset.record(job, transition);

    info!("Job {} ({}) {} -> {}", job.name, job_id, transition.from, next);
    Ok(Outcome::Applied)
}

/// Trigger a manual action: a new record goes `manual -> pending`, or stays
/// `manual` until no later stage has enqueued or running jobs
pub fn play(
    pipeline: &mut Pipeline,
    changeset: &mut Changeset,
    job_id: Uuid,
    actor: Option<&str>,
) -> Result<Outcome, SchedulerError> {
    let job = pipeline.job(job_id).ok_or(SchedulerError::JobNotFound(job_id))?;

    if pipeline.is_halted() {
        return Err(halted(pipeline));
    }
    if !pipeline.is_manual_action(job) {
        return Err(SchedulerError::NotManualAction(job_id));
    }

    let stage_index = job.stage_index;
    let action = job.supersede(pipeline.next_position(), JobStatus::Manual, actor);
    if let Some(old) = pipeline.job_mut(job_id) {
        changeset.supersede(old);
    }
    let new_id = changeset.create_job(pipeline, action);

    // Enqueued later by the processor while a later stage is still busy
    if !pipeline.busy_above(stage_index) {
        if let Some(job) = pipeline.job_mut(new_id) {
            let transition = job.transition(JobStatus::Pending, Utc::now())?;
            changeset.record(job, transition);
        }
    }

    info!("Played manual action {} as {}", job_id, new_id);
    Ok(Outcome::Created { job_id: new_id })
}
