//! Pipeline processor - advances every stage that can be advanced

use crate::core::{evaluate, Decision, HaltReason, InvalidTransition, Job, JobStatus, Pipeline};
use crate::execution::materialize::{check_specs, ConfigEvaluator};
use crate::persistence::Changeset;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One scheduling pass over an in-memory pipeline snapshot.
///
/// The pass only moves `created` and played `manual` jobs forward and
/// recomputes the aggregate status, so running it again over its own result
/// changes nothing. Nothing is enqueued below a stage that already has
/// enqueued or running jobs.
pub struct PipelineProcessor<'a> {
    evaluator: &'a dyn ConfigEvaluator,
}

impl<'a> PipelineProcessor<'a> {
    pub fn new(evaluator: &'a dyn ConfigEvaluator) -> Self {
        Self { evaluator }
    }

    /// Run the pass, recording every change in `changeset`.
    ///
    /// Returns whether a job changed, a stage was materialized or the
    /// pipeline status changed.
    pub async fn process(
        &self,
        pipeline: &mut Pipeline,
        changeset: &mut Changeset,
    ) -> Result<bool, InvalidTransition> {
        let at = Utc::now();
        let mut changed = false;

        if pipeline.is_halted() {
            debug!("Pipeline {} is halted, skipping stage walk", pipeline.id);
        } else {
            changed |= self.advance(pipeline, changeset, at).await?;
        }

        if changeset.refresh_status(pipeline, at) {
            info!("Pipeline {} is now {}", pipeline.id, pipeline.status);
            changed = true;
        }

        Ok(changed)
    }

    async fn advance(
        &self,
        pipeline: &mut Pipeline,
        changeset: &mut Changeset,
        at: DateTime<Utc>,
    ) -> Result<bool, InvalidTransition> {
        let mut changed = false;

        for index in pipeline.stage_indices() {
            let outcome = pipeline.outcome_before(index);
            if !outcome.is_settled() {
                debug!(
                    "Stage {} of pipeline {} waits for earlier stages",
                    index, pipeline.id
                );
                break;
            }

            if pipeline.lazy_stage(index).is_some() {
                changed = true;
                if !self.materialize(pipeline, changeset, index).await {
                    break;
                }
            }

            // A played manual job is already decided and only waits to be enqueued
            let decisions: Vec<(Uuid, Decision)> = pipeline
                .current_jobs()
                .filter(|job| job.stage_index == index)
                .filter_map(|job| match job.status {
                    JobStatus::Created => Some((job.id, evaluate(job.condition, outcome))),
                    JobStatus::Manual => Some((job.id, Decision::Run)),
                    _ => None,
                })
                .collect();
            let busy_above = pipeline.busy_above(index);

            for (job_id, decision) in decisions {
                let next = match decision {
                    Decision::Run if busy_above => {
                        debug!("Job {} waits for a later stage to finish", job_id);
                        continue;
                    }
                    Decision::Run => JobStatus::Pending,
                    Decision::Skip | Decision::ManualAction => JobStatus::Skipped,
                    Decision::Wait => continue,
                };

                if let Some(job) = pipeline.job_mut(job_id) {
                    let transition = job.transition(next, at)?;
                    debug!("Job {} ({}) {:?} -> {}", job.name, job.id, decision, next);
                    changeset.record(job, transition);
                    changed = true;
                }
            }
        }

        Ok(changed)
    }

    /// Create a lazy stage's jobs; on failure halt the pipeline and return false
    async fn materialize(
        &self,
        pipeline: &mut Pipeline,
        changeset: &mut Changeset,
        index: u32,
    ) -> bool {
        let Some(stage) = pipeline.lazy_stage(index).cloned() else {
            return true;
        };

        let specs = match self.evaluator.materialize_stage(pipeline, &stage).await {
            Ok(specs) => specs,
            Err(err) => {
                warn!("Pipeline {}: {}", pipeline.id, err);
                changeset.halt(
                    pipeline,
                    HaltReason::Configuration {
                        stage: err.stage,
                        message: err.message,
                    },
                );
                return false;
            }
        };

        if let Err(err) = check_specs(pipeline, &stage, &specs) {
            warn!("Pipeline {}: {}", pipeline.id, err);
            changeset.halt(
                pipeline,
                HaltReason::Configuration {
                    stage: err.stage,
                    message: err.message,
                },
            );
            return false;
        }

        let mut position = pipeline.next_position();
        for spec in &specs {
            let job = Job::from_spec(pipeline.id, spec, position, JobStatus::Created);
            changeset.create_job(pipeline, job);
            position += 1;
        }
        changeset.materialize(pipeline, index);

        info!(
            "Materialized stage '{}' of pipeline {} with {} job(s)",
            stage.name,
            pipeline.id,
            specs.len()
        );
        true
    }
}
