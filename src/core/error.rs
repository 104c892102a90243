//! Error taxonomy for migration steps

use crate::core::entity::EntityKind;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure category of a source-system request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// Network failure, timeout or 5xx; worth retrying
    Transient,
    /// 401/403; the credential will not start working on retry
    Auth,
    /// Any other 4xx (429 handled separately as a rate limit)
    Client(u16),
    /// Response could not be understood
    Malformed,
}

/// Error fetching a page from the source system
#[derive(Debug, Clone)]
pub struct SourceFetchError {
    pub kind: SourceErrorKind,
    pub message: String,
}

impl SourceFetchError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Transient, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Auth, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Malformed, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::transient(format!("page fetch timed out after {}s", after.as_secs()))
    }

    /// Classify an HTTP status that is not a success and not a 429
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => SourceErrorKind::Auth,
            400..=499 => SourceErrorKind::Client(status),
            _ => SourceErrorKind::Transient,
        };
        Self::new(kind, message)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind, SourceErrorKind::Transient)
    }
}

impl fmt::Display for SourceFetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SourceErrorKind::Transient => write!(f, "transient source error: {}", self.message),
            SourceErrorKind::Auth => write!(f, "source authentication failed: {}", self.message),
            SourceErrorKind::Client(status) => {
                write!(f, "source rejected request ({}): {}", status, self.message)
            }
            SourceErrorKind::Malformed => write!(f, "malformed source response: {}", self.message),
        }
    }
}

impl std::error::Error for SourceFetchError {}

/// Source asked us to slow down
#[derive(Debug, Clone, Error)]
#[error("rate limited by source, retry in {}ms", .wait.as_millis())]
pub struct RateLimitError {
    pub wait: Duration,
}

/// Failure of a single pull call
#[derive(Debug, Clone, Error)]
pub enum PullError {
    #[error(transparent)]
    Fetch(#[from] SourceFetchError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
}

/// A source item could not be mapped to the target model
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    #[error("missing required field '{field}' on {entity}")]
    MissingField { entity: &'static str, field: &'static str },

    #[error("invalid {entity}: {reason}")]
    Invalid { entity: &'static str, reason: String },

    #[error("unsupported {entity}: {reason}")]
    Unsupported { entity: &'static str, reason: String },
}

impl TransformError {
    pub fn missing(entity: &'static str, field: &'static str) -> Self {
        TransformError::MissingField { entity, field }
    }

    pub fn invalid(entity: &'static str, reason: impl Into<String>) -> Self {
        TransformError::Invalid {
            entity,
            reason: reason.into(),
        }
    }
}

/// Failure category of a target write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetErrorKind {
    Transient,
    Rejected(u16),
    Malformed,
}

/// Error from the target write API
#[derive(Debug, Clone, Error)]
#[error("target api error ({kind:?}): {message}")]
pub struct TargetError {
    pub kind: TargetErrorKind,
    pub message: String,
}

impl TargetError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: TargetErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: TargetErrorKind::Rejected(status),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: TargetErrorKind::Malformed,
            message: message.into(),
        }
    }

    /// Transient failures and throttling are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            TargetErrorKind::Transient | TargetErrorKind::Rejected(429)
        )
    }
}

/// Failure while loading a batch into the target
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("failed to write {kind} '{external_id}': {source}")]
    Write {
        kind: EntityKind,
        external_id: String,
        #[source]
        source: TargetError,
    },

    #[error("failed to look up {kind} '{external_id}': {source}")]
    Lookup {
        kind: EntityKind,
        external_id: String,
        #[source]
        source: TargetError,
    },

    #[error("target rejected batch: {0}")]
    Batch(#[from] TargetError),
}

impl LoadError {
    pub fn target_error(&self) -> &TargetError {
        match self {
            LoadError::Write { source, .. } | LoadError::Lookup { source, .. } => source,
            LoadError::Batch(source) => source,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.target_error().is_retryable()
    }
}

/// Fatal error that halts a step (and with it, the job)
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("source fetch failed after {attempts} attempt(s): {source}")]
    Fetch {
        attempts: u32,
        #[source]
        source: SourceFetchError,
    },

    #[error("rate limit retries exhausted after {attempts} attempt(s)")]
    RateLimitExhausted { attempts: u32 },

    #[error("every item of the page failed to transform ({failures} items), first error: {first}")]
    SystemicTransform { failures: usize, first: TransformError },

    #[error("load failed after {attempts} attempt(s): {source}")]
    Load {
        attempts: u32,
        #[source]
        source: LoadError,
    },

    #[error("pre-run check failed: {0}")]
    PreRun(String),

    #[error("pull reported more data without a next cursor")]
    MalformedPagination,

    #[error("background processing did not finish within {}s", .waited.as_secs())]
    WaitTimeout { waited: Duration },

    #[error("background status polling failed: {0}")]
    Signal(String),

    #[error("step '{0}' has no paginated body")]
    NotPaginated(String),
}
