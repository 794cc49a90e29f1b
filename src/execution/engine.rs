//! Scheduling engine - runs handlers and processing passes against a store

use crate::{
    core::{Job, JobStatus, Pipeline, PipelineStatus},
    execution::{
        error::SchedulerError,
        handlers::{self, DropReason, Outcome},
        materialize::ConfigEvaluator,
        processor::PipelineProcessor,
    },
    persistence::{Changeset, PipelineStore, PipelineSummary},
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events emitted after a pass is committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    JobCreated {
        pipeline_id: Uuid,
        job_id: Uuid,
        name: String,
        status: JobStatus,
    },
    JobTransitioned {
        pipeline_id: Uuid,
        job_id: Uuid,
        name: String,
        from: JobStatus,
        to: JobStatus,
    },
    StageMaterialized {
        pipeline_id: Uuid,
        stage_index: u32,
        jobs: usize,
    },
    PipelineStatusChanged {
        pipeline_id: Uuid,
        from: PipelineStatus,
        to: PipelineStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(SchedulerEvent) + Send + Sync>;

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many times a pass invalidated by a concurrent commit is re-run
    pub max_conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }
}

/// Public surface of the scheduler.
///
/// Every operation loads the pipeline, applies its handler, runs a processing
/// pass and commits the result as one changeset. A commit rejected because
/// another pass got there first is recomputed from fresh state.
pub struct Engine {
    store: Arc<dyn PipelineStore>,
    evaluator: Arc<dyn ConfigEvaluator>,
    config: EngineConfig,
    event_handlers: Vec<EventHandler>,
}

impl Engine {
    pub fn new(store: Arc<dyn PipelineStore>, evaluator: Arc<dyn ConfigEvaluator>) -> Self {
        Self {
            store,
            evaluator,
            config: EngineConfig::default(),
            event_handlers: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an event handler
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(SchedulerEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
        self
    }

    pub fn store(&self) -> &Arc<dyn PipelineStore> {
        &self.store
    }

    /// Store a new pipeline and run its first pass
    pub async fn create_pipeline(&self, pipeline: Pipeline) -> Result<Pipeline, SchedulerError> {
        let pipeline_id = pipeline.id;
        self.store.create_pipeline(&pipeline).await?;
        info!(
            "Created pipeline {} ({}) with {} job(s)",
            pipeline.name,
            pipeline_id,
            pipeline.jobs.len()
        );

        for job in &pipeline.jobs {
            self.emit(SchedulerEvent::JobCreated {
                pipeline_id,
                job_id: job.id,
                name: job.name.clone(),
                status: job.status,
            });
        }

        self.process(pipeline_id).await?;
        self.pipeline(pipeline_id).await
    }

    /// Advance every stage that can be advanced
    pub async fn process(&self, pipeline_id: Uuid) -> Result<bool, SchedulerError> {
        let ((), changed) = self.run_pass(pipeline_id, |_, _| Ok(())).await?;
        Ok(changed)
    }

    /// Supersede a failed or cancelled job, then process
    pub async fn retry(
        &self,
        pipeline_id: Uuid,
        job_id: Uuid,
        actor: Option<&str>,
    ) -> Result<Outcome, SchedulerError> {
        self.check_owner(pipeline_id, job_id).await?;
        let (outcome, _) = self
            .run_pass(pipeline_id, |pipeline, changeset| {
                handlers::retry(pipeline, changeset, job_id, actor)
            })
            .await?;
        Ok(outcome)
    }

    /// Cancel the whole pipeline
    pub async fn cancel(&self, pipeline_id: Uuid) -> Result<Outcome, SchedulerError> {
        let (outcome, _) = self.run_pass(pipeline_id, handlers::cancel).await?;
        Ok(outcome)
    }

    /// A job failed, or an operator cancelled it; then process
    pub async fn drop_job(
        &self,
        pipeline_id: Uuid,
        job_id: Uuid,
        reason: DropReason,
    ) -> Result<Outcome, SchedulerError> {
        self.report(pipeline_id, job_id, reason.status()).await
    }

    /// A runner picked the job up
    pub async fn start(&self, pipeline_id: Uuid, job_id: Uuid) -> Result<Outcome, SchedulerError> {
        self.report(pipeline_id, job_id, JobStatus::Running).await
    }

    /// The job finished successfully; then process
    pub async fn succeed(
        &self,
        pipeline_id: Uuid,
        job_id: Uuid,
    ) -> Result<Outcome, SchedulerError> {
        self.report(pipeline_id, job_id, JobStatus::Success).await
    }

    /// Trigger a manual action, then process
    pub async fn play(
        &self,
        pipeline_id: Uuid,
        job_id: Uuid,
        actor: Option<&str>,
    ) -> Result<Outcome, SchedulerError> {
        self.check_owner(pipeline_id, job_id).await?;
        let (outcome, _) = self
            .run_pass(pipeline_id, |pipeline, changeset| {
                handlers::play(pipeline, changeset, job_id, actor)
            })
            .await?;
        Ok(outcome)
    }

    /// Manual actions an operator can trigger
    pub async fn manual_actions(&self, pipeline_id: Uuid) -> Result<Vec<Job>, SchedulerError> {
        let pipeline = self.pipeline(pipeline_id).await?;
        Ok(pipeline.manual_actions().into_iter().cloned().collect())
    }

    /// Load a pipeline as last committed
    pub async fn pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline, SchedulerError> {
        Ok(self.store.load_pipeline(pipeline_id).await?)
    }

    pub async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>, SchedulerError> {
        Ok(self.store.list_pipelines().await?)
    }

    async fn report(
        &self,
        pipeline_id: Uuid,
        job_id: Uuid,
        next: JobStatus,
    ) -> Result<Outcome, SchedulerError> {
        self.check_owner(pipeline_id, job_id).await?;
        let (outcome, _) = self
            .run_pass(pipeline_id, |pipeline, changeset| {
                handlers::report(pipeline, changeset, job_id, next)
            })
            .await?;
        Ok(outcome)
    }

    async fn check_owner(&self, pipeline_id: Uuid, job_id: Uuid) -> Result<(), SchedulerError> {
        let owner = self.store.find_job(job_id).await?;
        if owner != pipeline_id {
            return Err(SchedulerError::JobPipelineMismatch {
                job_id,
                expected: pipeline_id,
                actual: owner,
            });
        }
        Ok(())
    }

    /// Load, apply `op`, process and commit; re-run from fresh state on conflict
    async fn run_pass<T, F>(&self, pipeline_id: Uuid, op: F) -> Result<(T, bool), SchedulerError>
    where
        F: Fn(&mut Pipeline, &mut Changeset) -> Result<T, SchedulerError> + Send + Sync,
        T: Send,
    {
        let processor = PipelineProcessor::new(self.evaluator.as_ref());
        let mut attempts = 0;

        loop {
            attempts += 1;
            let mut pipeline = self.store.load_pipeline(pipeline_id).await?;
            let mut changeset = Changeset::new(&pipeline);

            let value = op(&mut pipeline, &mut changeset)?;
            let changed = processor.process(&mut pipeline, &mut changeset).await?;

            if changeset.is_empty() {
                debug!("Pipeline {}: nothing to commit", pipeline_id);
                return Ok((value, false));
            }

            match self.store.save_transitions(&changeset).await {
                Ok(()) => {
                    self.emit_changes(&pipeline, &changeset);
                    return Ok((value, changed));
                }
                Err(err) if err.is_conflict() && attempts <= self.config.max_conflict_retries => {
                    warn!(
                        "Pipeline {} changed concurrently, recomputing (attempt {})",
                        pipeline_id, attempts
                    );
                }
                Err(err) if err.is_conflict() => {
                    return Err(SchedulerError::Conflict {
                        pipeline_id,
                        attempts,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Emit an event to all handlers
    fn emit(&self, event: SchedulerEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    fn emit_changes(&self, pipeline: &Pipeline, changeset: &Changeset) {
        if self.event_handlers.is_empty() {
            return;
        }
        let pipeline_id = pipeline.id;

        for transition in &changeset.transitions {
            let name = pipeline
                .job(transition.job_id)
                .map(|job| job.name.clone())
                .unwrap_or_default();
            self.emit(SchedulerEvent::JobTransitioned {
                pipeline_id,
                job_id: transition.job_id,
                name,
                from: transition.from,
                to: transition.to,
            });
        }

        for job in &changeset.created_jobs {
            self.emit(SchedulerEvent::JobCreated {
                pipeline_id,
                job_id: job.id,
                name: job.name.clone(),
                status: job.status,
            });
        }

        for &stage_index in &changeset.materialized_stages {
            let jobs = changeset
                .created_jobs
                .iter()
                .filter(|job| job.stage_index == stage_index)
                .count();
            self.emit(SchedulerEvent::StageMaterialized {
                pipeline_id,
                stage_index,
                jobs,
            });
        }

        if let Some(change) = changeset.status {
            self.emit(SchedulerEvent::PipelineStatusChanged {
                pipeline_id,
                from: change.from,
                to: change.to,
            });
        }
    }
}
