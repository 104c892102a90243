//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall migration job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is submitted but has not started
    Queued,
    /// Job is pulling/loading
    Running,
    /// Job is blocked on background processing in the target
    Waiting,
    /// All steps finished
    Completed,
    /// A step failed fatally; resumable from the recorded position
    Failed,
    /// Job was cancelled between pages; resumable
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Waiting => "waiting",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "waiting" => Some(JobStatus::Waiting),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether running the job again would pick up where it stopped
    pub fn is_resumable(&self) -> bool {
        !matches!(self, JobStatus::Completed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    Skipped,
    Failed,
    Cancelled,
}

/// Counters for one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStats {
    pub step: String,
    pub outcome: StepOutcome,
    pub pages: u32,
    pub pulled: usize,
    pub created: usize,
    pub existing: usize,
    pub skipped: usize,
}

impl StepStats {
    pub fn new(step: &str) -> Self {
        Self {
            step: step.to_string(),
            outcome: StepOutcome::Completed,
            pages: 0,
            pulled: 0,
            created: 0,
            existing: 0,
            skipped: 0,
        }
    }

    /// Items that ended up mapped in the target
    pub fn loaded(&self) -> usize {
        self.created + self.existing
    }
}

/// An item that was excluded from a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepWarning {
    pub step: String,
    pub message: String,
    pub at: DateTime<Utc>,
}
