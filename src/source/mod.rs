//! Source client adapter - uniform paging over third-party APIs

pub mod rate_limit;

use crate::core::{Cursor, JobRequest, PullError, RateLimitError, SourceFetchError};
use crate::credentials::Credential;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub use rate_limit::{compute_wait_time, RateLimitHeader, DEFAULT_RATE_LIMIT_WAIT};

/// Resource a step pages through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceResource {
    Users,
    Labels,
    IssueTypes { project_id: String },
    Components { project_key: String },
    Boards { project_key: String },
    Sprints { board_id: String },
    CustomFields,
    /// Options of a select-like custom field (`customfield_<n>`)
    FieldOptions { field_id: String, project_id: String },
    Issues { project_key: String },
    IssueComments { issue_id: String },
}

impl SourceResource {
    pub fn name(&self) -> &'static str {
        match self {
            SourceResource::Users => "users",
            SourceResource::Labels => "labels",
            SourceResource::IssueTypes { .. } => "issue_types",
            SourceResource::Components { .. } => "components",
            SourceResource::Boards { .. } => "boards",
            SourceResource::Sprints { .. } => "sprints",
            SourceResource::CustomFields => "custom_fields",
            SourceResource::FieldOptions { .. } => "field_options",
            SourceResource::Issues { .. } => "issues",
            SourceResource::IssueComments { .. } => "issue_comments",
        }
    }
}

/// Request for one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub resource: SourceResource,
    pub cursor: Cursor,
    pub page_size: u32,
}

/// Page as returned by the source, before any transform
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub records: Vec<Value>,
    pub has_more: bool,
    pub next_cursor: Option<Cursor>,
    /// Total reported by the source, if any
    pub total: Option<u64>,
}

impl RawPage {
    pub fn last(records: Vec<Value>) -> Self {
        Self {
            records,
            has_more: false,
            next_cursor: None,
            total: None,
        }
    }
}

/// Error from a source client call
#[derive(Debug, Clone)]
pub enum SourceError {
    /// Request failed
    Fetch(SourceFetchError),
    /// 429 / throttled, with the hints the response carried
    RateLimited(RateLimitHeader),
}

impl From<SourceFetchError> for SourceError {
    fn from(err: SourceFetchError) -> Self {
        SourceError::Fetch(err)
    }
}

/// Per-provider API client behind the step pull contract
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch one page; network I/O only
    async fn fetch_page(&self, request: &PageRequest) -> Result<RawPage, SourceError>;

    /// Wait dictated by a rate-limit response
    fn compute_wait_time(&self, header: &RateLimitHeader) -> Duration {
        compute_wait_time(header, Utc::now())
    }

    /// Convert a client error into the pull taxonomy
    fn to_pull_error(&self, err: SourceError) -> PullError {
        match err {
            SourceError::Fetch(e) => PullError::Fetch(e),
            SourceError::RateLimited(header) => PullError::RateLimited(RateLimitError {
                wait: self.compute_wait_time(&header),
            }),
        }
    }
}

/// Builds a source client for a job once its credentials are known
pub trait SourceFactory: Send + Sync {
    fn create(
        &self,
        request: &JobRequest,
        credential: &Credential,
    ) -> Result<Arc<dyn SourceClient>, SourceFetchError>;
}
