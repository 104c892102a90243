//! Job domain model - what gets migrated, and how far it got

use crate::core::{
    entity::EntityIdMap,
    page::Cursor,
    state::{JobStatus, StepStats, StepWarning},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Source system a job imports from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Jira,
    JiraServer,
    Linear,
    Asana,
    Clickup,
    Gitlab,
    Github,
    Slack,
}

impl Provider {
    pub const ALL: [Provider; 8] = [
        Provider::Jira,
        Provider::JiraServer,
        Provider::Linear,
        Provider::Asana,
        Provider::Clickup,
        Provider::Gitlab,
        Provider::Github,
        Provider::Slack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Jira => "jira",
            Provider::JiraServer => "jira_server",
            Provider::Linear => "linear",
            Provider::Asana => "asana",
            Provider::Clickup => "clickup",
            Provider::Gitlab => "gitlab",
            Provider::Github => "github",
            Provider::Slack => "slack",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Provider::ALL.into_iter().find(|p| p.as_str() == normalized)
    }

    /// Value written to `external_source` on every created entity
    pub fn external_source(&self) -> &'static str {
        match self {
            Provider::Jira => "JIRA",
            Provider::JiraServer => "JIRA_SERVER",
            Provider::Linear => "LINEAR",
            Provider::Asana => "ASANA",
            Provider::Clickup => "CLICKUP",
            Provider::Gitlab => "GITLAB",
            Provider::Github => "GITHUB",
            Provider::Slack => "SLACK",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-side identifiers of the thing being imported
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Project key (e.g. `ENG`)
    #[serde(default)]
    pub project_key: Option<String>,

    /// Numeric/opaque project id in the source
    #[serde(default)]
    pub project_id: Option<String>,

    /// Source instance id (cloud site id); namespaces external ids
    #[serde(default)]
    pub resource_id: Option<String>,

    /// Source base URL, overriding the credential's hostname
    #[serde(default)]
    pub hostname: Option<String>,
}

/// A migration job as submitted by the API layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: Uuid,
    pub provider: Provider,
    pub workspace_id: String,
    pub project_id: String,

    /// Key into the credential store; never the secret itself
    pub credential_ref: String,

    #[serde(default)]
    pub source: SourceSettings,

    /// Step names to skip for this job
    #[serde(default)]
    pub skip_steps: Vec<String>,

    /// Page size overrides per step name
    #[serde(default)]
    pub page_sizes: HashMap<String, u32>,
}

impl JobRequest {
    pub fn new(
        provider: Provider,
        workspace_id: impl Into<String>,
        project_id: impl Into<String>,
        credential_ref: impl Into<String>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            provider,
            workspace_id: workspace_id.into(),
            project_id: project_id.into(),
            credential_ref: credential_ref.into(),
            source: SourceSettings::default(),
            skip_steps: Vec::new(),
            page_sizes: HashMap::new(),
        }
    }

    pub fn with_source(mut self, source: SourceSettings) -> Self {
        self.source = source;
        self
    }

    pub fn skip_step(mut self, step: impl Into<String>) -> Self {
        self.skip_steps.push(step.into());
        self
    }

    pub fn with_page_size(mut self, step: impl Into<String>, size: u32) -> Self {
        self.page_sizes.insert(step.into(), size);
        self
    }

    pub fn should_skip(&self, step: &str) -> bool {
        self.skip_steps.iter().any(|s| s == step)
    }
}

/// Target project settings discovered by the pre-run check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFlags {
    pub issue_types_enabled: bool,
}

/// Resumable position of a job plus the state later steps rely on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobCheckpoint {
    /// Index of the step to run next (or the one in progress)
    pub step_index: usize,

    pub step_name: Option<String>,

    /// Cursor to resume the in-progress step from
    pub cursor: Option<Cursor>,

    /// Items pulled so far by the in-progress step
    pub total_processed: usize,

    pub completed_steps: Vec<String>,

    pub skipped_steps: Vec<String>,

    pub id_map: EntityIdMap,

    #[serde(default)]
    pub flags: ProjectFlags,

    /// Records stored by steps for their dependents (step name -> records)
    pub step_data: BTreeMap<String, Vec<Value>>,
}

/// Where and why a job failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// `None` when the job failed before any step ran
    pub step_index: Option<usize>,
    pub step_name: Option<String>,
    pub cursor: Option<Cursor>,

    /// Human-readable, redacted reason
    pub reason: String,

    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn preflight(reason: impl Into<String>) -> Self {
        Self {
            step_index: None,
            step_name: None,
            cursor: None,
            reason: reason.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn at_step(index: usize, step: &str, cursor: Option<Cursor>, reason: impl Into<String>) -> Self {
        Self {
            step_index: Some(index),
            step_name: Some(step.to_string()),
            cursor,
            reason: reason.into(),
            failed_at: Utc::now(),
        }
    }
}

/// Persisted job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub request: JobRequest,
    pub status: JobStatus,
    pub checkpoint: JobCheckpoint,
    pub failure: Option<FailureRecord>,
    pub cancel_requested: bool,
    pub total_steps: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(request: JobRequest) -> Self {
        Self {
            request,
            status: JobStatus::Queued,
            checkpoint: JobCheckpoint::default(),
            failure: None,
            cancel_requested: false,
            total_steps: 0,
            started_at: None,
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.request.job_id
    }

    /// Mark job as running
    pub fn start(&mut self, total_steps: usize) {
        self.status = JobStatus::Running;
        self.total_steps = total_steps;
        self.failure = None;
        self.cancel_requested = false;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.touch();
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    pub fn fail(&mut self, failure: FailureRecord) {
        self.status = JobStatus::Failed;
        self.failure = Some(failure);
        self.touch();
    }

    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Fraction of steps finished (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        let done = self.checkpoint.completed_steps.len() + self.checkpoint.skipped_steps.len();
        done as f64 / self.total_steps as f64
    }
}

/// Outcome of `PipelineRunner::run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub completed_steps: Vec<String>,
    pub skipped_steps: Vec<String>,
    pub failure: Option<FailureRecord>,
    pub stats: Vec<StepStats>,
    pub warnings: Vec<StepWarning>,
}

impl JobResult {
    pub fn from_record(record: &JobRecord, stats: Vec<StepStats>, warnings: Vec<StepWarning>) -> Self {
        Self {
            job_id: record.job_id(),
            status: record.status,
            completed_steps: record.checkpoint.completed_steps.clone(),
            skipped_steps: record.checkpoint.skipped_steps.clone(),
            failure: record.failure.clone(),
            stats,
            warnings,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn stats_for(&self, step: &str) -> Option<&StepStats> {
        self.stats.iter().find(|s| s.step == step)
    }
}
