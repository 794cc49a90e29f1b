//! External configuration evaluation for lazily declared stages

use crate::core::{config::PipelineConfig, JobSpec, LazyStage, Pipeline};
use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

/// A stage's jobs could not be produced
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot materialize stage '{stage}': {message}")]
pub struct MaterializeError {
    pub stage: String,
    pub message: String,
}

impl MaterializeError {
    pub fn new(stage: &LazyStage, message: impl Into<String>) -> Self {
        Self {
            stage: stage.name.clone(),
            message: message.into(),
        }
    }
}

/// Produces the jobs of a stage when the processor first reaches it
#[async_trait]
pub trait ConfigEvaluator: Send + Sync {
    async fn materialize_stage(
        &self,
        pipeline: &Pipeline,
        stage: &LazyStage,
    ) -> Result<Vec<JobSpec>, MaterializeError>;
}

#[async_trait]
impl ConfigEvaluator for PipelineConfig {
    async fn materialize_stage(
        &self,
        _pipeline: &Pipeline,
        stage: &LazyStage,
    ) -> Result<Vec<JobSpec>, MaterializeError> {
        match self.stage_index(&stage.name) {
            Some(index) if index == stage.index => Ok(self.specs_for_stage(index)),
            Some(index) => Err(MaterializeError::new(
                stage,
                format!("stage moved from position {} to {}", stage.index, index),
            )),
            None => Err(MaterializeError::new(stage, "stage is no longer declared")),
        }
    }
}

/// Evaluates the configuration stored with each pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedConfig;

#[async_trait]
impl ConfigEvaluator for EmbeddedConfig {
    async fn materialize_stage(
        &self,
        pipeline: &Pipeline,
        stage: &LazyStage,
    ) -> Result<Vec<JobSpec>, MaterializeError> {
        let source = pipeline
            .config_source
            .as_deref()
            .ok_or_else(|| MaterializeError::new(stage, "pipeline has no stored configuration"))?;
        let config = PipelineConfig::from_yaml(source)
            .map_err(|err| MaterializeError::new(stage, format!("{:#}", err)))?;

        config.materialize_stage(pipeline, stage).await
    }
}

/// Rejects every lazy stage, for pipelines created fully materialized
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLazyStages;

#[async_trait]
impl ConfigEvaluator for NoLazyStages {
    async fn materialize_stage(
        &self,
        _pipeline: &Pipeline,
        stage: &LazyStage,
    ) -> Result<Vec<JobSpec>, MaterializeError> {
        Err(MaterializeError::new(stage, "no configuration evaluator available"))
    }
}

/// Reject specs that do not belong to the stage or clash with existing jobs
pub fn check_specs(
    pipeline: &Pipeline,
    stage: &LazyStage,
    specs: &[JobSpec],
) -> Result<(), MaterializeError> {
    let mut names: HashSet<&str> = pipeline.current_jobs().map(|job| job.name.as_str()).collect();

    for spec in specs {
        if spec.stage_index != stage.index {
            return Err(MaterializeError::new(
                stage,
                format!("job '{}' declares stage index {}", spec.name, spec.stage_index),
            ));
        }
        if !names.insert(spec.name.as_str()) {
            return Err(MaterializeError::new(
                stage,
                format!("job name '{}' is already in use", spec.name),
            ));
        }
    }

    Ok(())
}
