//! Pipeline configuration from YAML

use crate::core::{
    condition::Condition,
    job::JobSpec,
    pipeline::{LazyStage, Pipeline},
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Stage names, in execution order
    pub stages: Vec<String>,

    /// Only create the first stage's jobs up front; later stages are
    /// materialized from this configuration when they are reached
    #[serde(default)]
    pub lazy: bool,

    /// Job definitions
    pub jobs: Vec<JobConfig>,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job name, unique within the pipeline
    pub name: String,

    /// Stage this job belongs to
    pub stage: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// When to run: on_success (default), on_failure, always, manual
    #[serde(default)]
    pub when: Condition,

    /// Failure does not fail the stage
    #[serde(default)]
    pub allow_failure: bool,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            anyhow::bail!("Pipeline '{}' declares no stages", self.name);
        }

        let mut seen_stages = HashSet::new();
        for stage in &self.stages {
            if !seen_stages.insert(stage) {
                anyhow::bail!("Duplicate stage: {}", stage);
            }
        }

        let mut seen_jobs = HashSet::new();
        for job in &self.jobs {
            if !seen_jobs.insert(&job.name) {
                anyhow::bail!("Duplicate job name: {}", job.name);
            }
            if !seen_stages.contains(&job.stage) {
                anyhow::bail!(
                    "Job '{}' references non-existent stage '{}'",
                    job.name,
                    job.stage
                );
            }
        }

        Ok(())
    }

    /// Index of a stage by name
    pub fn stage_index(&self, name: &str) -> Option<u32> {
        self.stages
            .iter()
            .position(|stage| stage == name)
            .map(|index| index as u32)
    }

    /// Specs of every job, in declaration order
    pub fn job_specs(&self) -> Vec<JobSpec> {
        self.jobs
            .iter()
            .filter_map(|job| {
                let stage_index = self.stage_index(&job.stage)?;
                Some(JobSpec {
                    name: job.name.clone(),
                    stage: job.stage.clone(),
                    stage_index,
                    condition: job.when,
                    allow_failure: job.allow_failure,
                })
            })
            .collect()
    }

    /// Specs of the jobs in one stage
    pub fn specs_for_stage(&self, stage_index: u32) -> Vec<JobSpec> {
        self.job_specs()
            .into_iter()
            .filter(|spec| spec.stage_index == stage_index)
            .collect()
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        if !self.lazy {
            return Pipeline::new(&self.name, &self.job_specs(), Vec::new());
        }

        let specs = self.job_specs();
        let first = specs.iter().map(|spec| spec.stage_index).min().unwrap_or(0);
        let eager: Vec<JobSpec> = specs
            .iter()
            .filter(|spec| spec.stage_index == first)
            .cloned()
            .collect();

        let mut lazy_indices: Vec<u32> = specs
            .iter()
            .map(|spec| spec.stage_index)
            .filter(|index| *index != first)
            .collect();
        lazy_indices.sort_unstable();
        lazy_indices.dedup();

        let lazy_stages = lazy_indices
            .into_iter()
            .map(|index| LazyStage {
                index,
                name: self.stages[index as usize].clone(),
            })
            .collect();

        Pipeline::new(&self.name, &eager, lazy_stages)
    }
}
