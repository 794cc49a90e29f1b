//! Job and pipeline status models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Status of a single job record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Declared, not yet evaluated by the processor
    Created,
    /// Eligible to run, waiting for a runner
    Pending,
    /// Picked up by a runner
    Running,
    /// Finished successfully
    Success,
    /// Finished with an error
    Failed,
    /// Cancelled by an operator or a pipeline cancel
    Canceled,
    /// Resolved as not-to-run by the condition evaluator
    Skipped,
    /// Manual action triggered by an operator, about to be enqueued
    Manual,
}

impl JobStatus {
    pub const ALL: [JobStatus; 8] = [
        JobStatus::Created,
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Success,
        JobStatus::Failed,
        JobStatus::Canceled,
        JobStatus::Skipped,
        JobStatus::Manual,
    ];

    /// Check if the status is terminal for this job record
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Canceled | JobStatus::Skipped
        )
    }

    /// Statuses that keep a stage from being settled
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Created | JobStatus::Pending | JobStatus::Running)
    }

    /// Whether `self -> next` is an edge of the job state machine
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Created, Pending | Skipped | Manual | Canceled)
                | (Manual, Pending | Canceled)
                | (Pending, Running | Success | Failed | Canceled)
                | (Running, Success | Failed | Canceled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
            JobStatus::Skipped => "skipped",
            JobStatus::Manual => "manual",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownValue(s.to_string()))
    }
}

/// Aggregate status of a stage, a set of stages or a whole pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Created,
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
}

impl PipelineStatus {
    pub const ALL: [PipelineStatus; 7] = [
        PipelineStatus::Created,
        PipelineStatus::Pending,
        PipelineStatus::Running,
        PipelineStatus::Success,
        PipelineStatus::Failed,
        PipelineStatus::Canceled,
        PipelineStatus::Skipped,
    ];

    /// Check if no job covered by this status can change any more
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineStatus::Success
                | PipelineStatus::Failed
                | PipelineStatus::Canceled
                | PipelineStatus::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Created => "created",
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::Success => "success",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Canceled => "canceled",
            PipelineStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PipelineStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownValue(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown value '{0}'")]
pub struct UnknownValue(pub String);

/// A transition that is not an edge of the job state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {job_id} cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub job_id: Uuid,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Per-status job counts used to derive a composite status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub created: usize,
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub canceled: usize,
    pub skipped: usize,
}

impl StatusCounts {
    /// Count a job. Allowed failures count as success and manual jobs as skipped.
    pub fn add(&mut self, status: JobStatus, allow_failure: bool) {
        self.total += 1;
        match status {
            JobStatus::Created => self.created += 1,
            JobStatus::Pending => self.pending += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Success => self.success += 1,
            JobStatus::Failed if allow_failure => self.success += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Canceled => self.canceled += 1,
            JobStatus::Skipped | JobStatus::Manual => self.skipped += 1,
        }
    }

    /// Composite status, `None` when nothing was counted
    pub fn composite(&self) -> Option<PipelineStatus> {
        let total = self.total;
        let status = if total == 0 {
            return None;
        } else if self.skipped == total {
            PipelineStatus::Skipped
        } else if self.success + self.skipped == total {
            PipelineStatus::Success
        } else if self.created == total {
            PipelineStatus::Created
        } else if self.success + self.skipped + self.canceled == total {
            PipelineStatus::Canceled
        } else if self.success + self.skipped + self.failed + self.canceled == total {
            PipelineStatus::Failed
        } else if self.running > 0 {
            PipelineStatus::Running
        } else {
            PipelineStatus::Pending
        };
        Some(status)
    }
}

impl FromIterator<(JobStatus, bool)> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = (JobStatus, bool)>>(iter: I) -> Self {
        let mut counts = StatusCounts::default();
        for (status, allow_failure) in iter {
            counts.add(status, allow_failure);
        }
        counts
    }
}

/// Composite status of `(status, allow_failure)` pairs
pub fn composite_status<I>(jobs: I) -> Option<PipelineStatus>
where
    I: IntoIterator<Item = (JobStatus, bool)>,
{
    jobs.into_iter().collect::<StatusCounts>().composite()
}
