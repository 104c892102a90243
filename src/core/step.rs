//! Step domain model
//!
//! A step is a descriptor plus a body composed from strategies. Steps of the
//! same shape share strategy implementations instead of a base type.

use crate::core::{
    condition::StepCondition,
    context::JobContext,
    entity::TargetEntity,
    error::{LoadError, PullError, StepError, TransformError},
    page::{Cursor, PullResult},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Phase a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// One-shot check of the target configuration
    PreRun,
    /// Supporting entities issues refer to
    Entity,
    Issue,
    /// Blocks until the target finished background processing
    WaitForAsync,
    /// Links between already-created entities
    Relation,
}

impl StepKind {
    /// Ordering rank; a pipeline never goes back to a lower phase
    pub fn phase(&self) -> u8 {
        match self {
            StepKind::PreRun => 0,
            StepKind::Entity => 1,
            StepKind::Issue | StepKind::WaitForAsync => 2,
            StepKind::Relation => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::PreRun => "pre_run",
            StepKind::Entity => "entity",
            StepKind::Issue => "issue",
            StepKind::WaitForAsync => "wait_for_async",
            StepKind::Relation => "relation",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    /// Unique snake_case name
    pub name: String,
    pub kind: StepKind,

    /// Earlier steps whose output this step reads
    pub depends_on: Vec<String>,

    pub condition: StepCondition,

    /// Default page size (overridable per job)
    pub page_size: u32,
}

impl StepDescriptor {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            depends_on: Vec::new(),
            condition: StepCondition::Always,
            page_size: 50,
        }
    }

    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    pub fn when(mut self, condition: StepCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }
}

/// Fetches one page from the source; never mutates the context
#[async_trait]
pub trait PullStrategy: Send + Sync {
    /// Cursor of the first page
    fn initial_cursor(&self) -> Cursor {
        Cursor::start()
    }

    async fn pull(
        &self,
        ctx: &JobContext,
        cursor: &Cursor,
        page_size: u32,
    ) -> Result<PullResult<Value>, PullError>;
}

/// Maps one source item to a target entity; pure, no I/O
pub trait TransformStrategy: Send + Sync {
    fn transform(&self, ctx: &JobContext, item: &Value) -> Result<TargetEntity, TransformError>;
}

/// Plain function used as a transform
pub struct TransformFn(pub fn(&JobContext, &Value) -> Result<TargetEntity, TransformError>);

impl TransformStrategy for TransformFn {
    fn transform(&self, ctx: &JobContext, item: &Value) -> Result<TargetEntity, TransformError> {
        (self.0)(ctx, item)
    }
}

/// Counters for one loaded batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadResult {
    /// Newly written to the target
    pub created: usize,
    /// Already mapped or found by external id
    pub existing: usize,
    /// Excluded (unresolved required reference)
    pub skipped: usize,
}

/// Persists a batch and records target ids in the context
#[async_trait]
pub trait LoadStrategy: Send + Sync {
    async fn load(
        &self,
        ctx: &mut JobContext,
        step: &str,
        entities: Vec<TargetEntity>,
    ) -> Result<LoadResult, LoadError>;
}

/// One-shot step body
#[async_trait]
pub trait PreRunStrategy: Send + Sync {
    async fn run(&self, ctx: &mut JobContext) -> Result<(), StepError>;
}

/// What a step does when it runs
#[derive(Clone)]
pub enum StepBody {
    PreRun(Arc<dyn PreRunStrategy>),
    Etl {
        pull: Arc<dyn PullStrategy>,
        transform: Arc<dyn TransformStrategy>,
        load: Arc<dyn LoadStrategy>,
    },
    WaitForAsync,
}

/// A runnable step
#[derive(Clone)]
pub struct Step {
    pub descriptor: StepDescriptor,
    pub body: StepBody,
}

impl Step {
    pub fn etl(
        descriptor: StepDescriptor,
        pull: impl PullStrategy + 'static,
        transform: impl TransformStrategy + 'static,
        load: impl LoadStrategy + 'static,
    ) -> Self {
        Self {
            descriptor,
            body: StepBody::Etl {
                pull: Arc::new(pull),
                transform: Arc::new(transform),
                load: Arc::new(load),
            },
        }
    }

    pub fn pre_run(descriptor: StepDescriptor, strategy: impl PreRunStrategy + 'static) -> Self {
        Self {
            descriptor,
            body: StepBody::PreRun(Arc::new(strategy)),
        }
    }

    pub fn wait_for_async(descriptor: StepDescriptor) -> Self {
        Self {
            descriptor,
            body: StepBody::WaitForAsync,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn kind(&self) -> StepKind {
        self.descriptor.kind
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match self.body {
            StepBody::PreRun(_) => "pre_run",
            StepBody::Etl { .. } => "etl",
            StepBody::WaitForAsync => "wait_for_async",
        };
        f.debug_struct("Step")
            .field("descriptor", &self.descriptor)
            .field("body", &body)
            .finish()
    }
}
