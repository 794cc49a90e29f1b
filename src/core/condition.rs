//! Execution conditions and the condition evaluator

use crate::core::state::{PipelineStatus, UnknownValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// When a job runs, relative to the outcome of the stages before it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Run only if every earlier stage succeeded
    #[default]
    OnSuccess,
    /// Run only if an earlier stage failed
    OnFailure,
    /// Run whether earlier stages succeeded or failed
    Always,
    /// Never run automatically; exposed as a manual action
    Manual,
}

impl Condition {
    pub fn as_str(self) -> &'static str {
        match self {
            Condition::OnSuccess => "on_success",
            Condition::OnFailure => "on_failure",
            Condition::Always => "always",
            Condition::Manual => "manual",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_success" => Ok(Condition::OnSuccess),
            "on_failure" => Ok(Condition::OnFailure),
            "always" => Ok(Condition::Always),
            "manual" => Ok(Condition::Manual),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

/// Outcome of all stages preceding the one being evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Every job succeeded, was skipped, or failed with `allow_failure`
    AllSucceeded,
    /// At least one job failed
    HadFailure,
    /// Settled, with at least one cancelled job and no failure
    WasCanceled,
    /// Some job is still created, pending or running
    NotYetSettled,
}

impl StageOutcome {
    /// Map a composite status onto a gating outcome. No predecessor counts as success.
    pub fn from_composite(status: Option<PipelineStatus>) -> Self {
        match status {
            None | Some(PipelineStatus::Success) | Some(PipelineStatus::Skipped) => {
                StageOutcome::AllSucceeded
            }
            Some(PipelineStatus::Failed) => StageOutcome::HadFailure,
            Some(PipelineStatus::Canceled) => StageOutcome::WasCanceled,
            Some(PipelineStatus::Created | PipelineStatus::Pending | PipelineStatus::Running) => {
                StageOutcome::NotYetSettled
            }
        }
    }

    pub fn is_settled(self) -> bool {
        self != StageOutcome::NotYetSettled
    }
}

/// What the processor does with a `created` job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Enqueue: `created -> pending`
    Run,
    /// `created -> skipped`
    Skip,
    /// `created -> skipped`, and the job becomes an operator-triggerable action
    ManualAction,
    /// Leave the job `created`
    Wait,
}

/// Decide what happens to a job given the outcome of the stages before it
pub fn evaluate(condition: Condition, outcome: StageOutcome) -> Decision {
    use Condition::*;
    use StageOutcome::*;

    match (condition, outcome) {
        (_, NotYetSettled) => Decision::Wait,
        (_, WasCanceled) => Decision::Skip,
        (OnSuccess, AllSucceeded) => Decision::Run,
        (OnSuccess, HadFailure) => Decision::Skip,
        (OnFailure, AllSucceeded) => Decision::Skip,
        (OnFailure, HadFailure) => Decision::Run,
        (Always, AllSucceeded | HadFailure) => Decision::Run,
        (Manual, AllSucceeded) => Decision::ManualAction,
        (Manual, HadFailure) => Decision::Skip,
    }
}
