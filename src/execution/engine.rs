//! Pipeline runner - drives a job through its provider's steps

use crate::{
    core::{
        config::SiloConfig, Cursor, FailureRecord, JobContext, JobRecord, JobRequest, JobResult,
        JobStatus, Provider, Step, StepBody, StepError, StepOutcome, StepStats,
    },
    credentials::{redact, CredentialResolver},
    execution::{
        executor::StepExecutor,
        registry::StepRegistry,
        waiter::{AsyncSignal, AsyncWaiter, WaitOutcome},
    },
    persistence::JobStore,
    source::SourceFactory,
    target::TargetApi,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur while a job runs
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    JobStarted {
        job_id: Uuid,
        provider: Provider,
        total_steps: usize,
        /// Step the run resumes at, when not starting fresh
        resumed_at: Option<String>,
    },
    StepStarted {
        job_id: Uuid,
        step: String,
        index: usize,
    },
    StepSkipped {
        job_id: Uuid,
        step: String,
        reason: String,
    },
    PageCompleted {
        job_id: Uuid,
        step: String,
        page: u32,
        pulled: usize,
        created: usize,
        has_more: bool,
    },
    WaitingForAsync {
        job_id: Uuid,
        step: String,
    },
    StepCompleted {
        job_id: Uuid,
        stats: StepStats,
    },
    StepFailed {
        job_id: Uuid,
        step: String,
        error: String,
    },
    JobFinished {
        job_id: Uuid,
        status: JobStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Failures of the runner itself (not of the job)
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("job store failure: {0:#}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for RunnerError {
    fn from(err: anyhow::Error) -> Self {
        RunnerError::Store(err)
    }
}

/// Why a step stopped before finishing
enum Interrupt {
    Failed(StepError),
    Runner(RunnerError),
}

impl From<StepError> for Interrupt {
    fn from(err: StepError) -> Self {
        Interrupt::Failed(err)
    }
}

impl From<anyhow::Error> for Interrupt {
    fn from(err: anyhow::Error) -> Self {
        Interrupt::Runner(RunnerError::Store(err))
    }
}

/// How a step run ended without an error
enum StepEnd {
    Done,
    Cancelled,
}

/// Sequential step runner
///
/// Holds no per-job state; one runner can drive many jobs concurrently, each
/// with its own [`JobContext`].
pub struct PipelineRunner {
    registry: Arc<StepRegistry>,
    executor: StepExecutor,
    waiter: AsyncWaiter,
    credentials: CredentialResolver,
    sources: Arc<dyn SourceFactory>,
    target: Arc<dyn TargetApi>,
    signal: Arc<dyn AsyncSignal>,
    store: Arc<dyn JobStore>,
    event_handlers: Vec<EventHandler>,
}

impl PipelineRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<StepRegistry>,
        config: &SiloConfig,
        credentials: CredentialResolver,
        sources: Arc<dyn SourceFactory>,
        target: Arc<dyn TargetApi>,
        signal: Arc<dyn AsyncSignal>,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            registry,
            executor: StepExecutor::new(config),
            waiter: AsyncWaiter::from_config(config),
            credentials,
            sources,
            target,
            signal,
            store,
            event_handlers: Vec::new(),
        }
    }

    /// Add an event handler
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    fn emit(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Run (or resume) a job to completion, failure or cancellation
    pub async fn run(&self, request: JobRequest) -> Result<JobResult, RunnerError> {
        let job_id = request.job_id;
        let mut record = match self.store.load(job_id).await? {
            Some(existing) if existing.status == JobStatus::Completed => {
                info!("Job {} already completed", job_id);
                return Ok(JobResult::from_record(&existing, Vec::new(), Vec::new()));
            }
            Some(existing) => {
                if matches!(existing.status, JobStatus::Failed | JobStatus::Cancelled) {
                    self.store.clear_cancel(job_id).await?;
                }
                info!(
                    "Resuming job {} ({}) at step index {}",
                    job_id, existing.status, existing.checkpoint.step_index
                );
                existing
            }
            None => JobRecord::new(request),
        };

        let pipeline = match self.registry.steps_for(record.request.provider) {
            Ok(pipeline) => pipeline,
            Err(e) => return self.fail_preflight(record, e.to_string()).await,
        };

        record.start(pipeline.len());
        self.store.save(&record).await?;
        self.emit(ExecutionEvent::JobStarted {
            job_id,
            provider: record.request.provider,
            total_steps: pipeline.len(),
            resumed_at: record.checkpoint.step_name.clone(),
        });

        let credential = match self.credentials.resolve(&record.request).await {
            Ok(credential) => credential,
            Err(e) => return self.fail_preflight(record, e.to_string()).await,
        };

        let source = match self.sources.create(&record.request, &credential) {
            Ok(source) => source,
            Err(e) => {
                let reason = credential.redact(&e.to_string());
                return self.fail_preflight(record, reason).await;
            }
        };

        let mut ctx = JobContext::new(record.request.clone(), credential, source, self.target.clone())
            .restore(&record.checkpoint);
        let mut stats = Vec::new();

        for (index, step) in pipeline.steps().iter().enumerate().skip(record.checkpoint.step_index) {
            let name = step.name();

            if self.store.is_cancel_requested(job_id).await? {
                return self.finish_cancelled(record, ctx, stats).await;
            }

            if record.checkpoint.step_name.as_deref() != Some(name) {
                record.checkpoint.step_index = index;
                record.checkpoint.step_name = Some(name.to_string());
                record.checkpoint.cursor = None;
                record.checkpoint.total_processed = 0;
            }

            if let Some(reason) = skip_reason(step, &ctx) {
                info!("Skipping step {} ({})", name, reason);
                let mut step_stats = StepStats::new(name);
                step_stats.outcome = StepOutcome::Skipped;
                stats.push(step_stats);
                if !record.checkpoint.skipped_steps.iter().any(|s| s == name) {
                    record.checkpoint.skipped_steps.push(name.to_string());
                }
                self.advance(&mut record, &ctx, index).await?;
                self.emit(ExecutionEvent::StepSkipped {
                    job_id,
                    step: name.to_string(),
                    reason,
                });
                continue;
            }

            info!("Executing step: {}", name);
            self.emit(ExecutionEvent::StepStarted {
                job_id,
                step: name.to_string(),
                index,
            });

            let mut step_stats = StepStats::new(name);
            let result = match &step.body {
                StepBody::PreRun(strategy) => strategy
                    .run(&mut ctx)
                    .await
                    .map(|_| StepEnd::Done)
                    .map_err(Interrupt::from),
                StepBody::Etl { pull, .. } => {
                    let initial = pull.initial_cursor();
                    self.run_pages(step, index, initial, &mut ctx, &mut record, &mut step_stats)
                        .await
                }
                StepBody::WaitForAsync => self.wait_for_async(name, &mut record).await,
            };

            match result {
                Ok(StepEnd::Done) => {
                    info!(
                        "Step {} completed: {} page(s), {} pulled, {} created",
                        name, step_stats.pages, step_stats.pulled, step_stats.created
                    );
                    if !record.checkpoint.completed_steps.iter().any(|s| s == name) {
                        record.checkpoint.completed_steps.push(name.to_string());
                    }
                    stats.push(step_stats.clone());
                    self.advance(&mut record, &ctx, index).await?;
                    self.emit(ExecutionEvent::StepCompleted {
                        job_id,
                        stats: step_stats,
                    });
                }
                Ok(StepEnd::Cancelled) => {
                    step_stats.outcome = StepOutcome::Cancelled;
                    stats.push(step_stats);
                    return self.finish_cancelled(record, ctx, stats).await;
                }
                Err(Interrupt::Failed(e)) => {
                    step_stats.outcome = StepOutcome::Failed;
                    stats.push(step_stats);
                    return self.finish_failed(record, ctx, index, name, e, stats).await;
                }
                Err(Interrupt::Runner(e)) => return Err(e),
            }
        }

        record.complete();
        self.store.save(&record).await?;
        info!("Job {} completed", job_id);
        self.emit(ExecutionEvent::JobFinished {
            job_id,
            status: JobStatus::Completed,
        });
        Ok(JobResult::from_record(&record, stats, ctx.warnings))
    }

    /// Drive the pagination loop of an ETL step, checkpointing every page
    async fn run_pages(
        &self,
        step: &Step,
        index: usize,
        initial: Cursor,
        ctx: &mut JobContext,
        record: &mut JobRecord,
        stats: &mut StepStats,
    ) -> Result<StepEnd, Interrupt> {
        let job_id = record.job_id();
        let name = step.name();
        let mut cursor = record.checkpoint.cursor.clone().unwrap_or(initial);
        if !cursor.is_start() {
            info!("Step {} resuming at {}", name, cursor);
        }

        loop {
            record.checkpoint.cursor = Some(cursor.clone());
            let page = self.executor.run_page(step, ctx, &cursor).await?;

            stats.pages += 1;
            stats.pulled += page.pulled;
            stats.created += page.load.created;
            stats.existing += page.load.existing;
            stats.skipped += page.load.skipped + page.transform_failures;
            record.checkpoint.total_processed += page.pulled;
            ctx.fill_checkpoint(&mut record.checkpoint);

            self.emit(ExecutionEvent::PageCompleted {
                job_id,
                step: name.to_string(),
                page: stats.pages,
                pulled: page.pulled,
                created: page.load.created,
                has_more: page.has_more,
            });

            if !page.has_more {
                return Ok(StepEnd::Done);
            }
            cursor = page.next_cursor.ok_or(StepError::MalformedPagination)?;

            record.checkpoint.step_index = index;
            record.checkpoint.cursor = Some(cursor.clone());
            record.touch();
            self.store.save(record).await?;

            if self.store.is_cancel_requested(job_id).await? {
                info!("Job {} cancelled during step {} at {}", job_id, name, cursor);
                return Ok(StepEnd::Cancelled);
            }
        }
    }

    async fn wait_for_async(&self, name: &str, record: &mut JobRecord) -> Result<StepEnd, Interrupt> {
        let job_id = record.job_id();
        record.status = JobStatus::Waiting;
        record.touch();
        self.store.save(record).await?;
        self.emit(ExecutionEvent::WaitingForAsync {
            job_id,
            step: name.to_string(),
        });

        let outcome = self
            .waiter
            .wait(self.signal.as_ref(), self.store.as_ref(), job_id)
            .await?;
        record.status = JobStatus::Running;
        Ok(match outcome {
            WaitOutcome::Done => StepEnd::Done,
            WaitOutcome::Cancelled => StepEnd::Cancelled,
        })
    }

    /// Move the checkpoint past a finished step
    async fn advance(&self, record: &mut JobRecord, ctx: &JobContext, index: usize) -> Result<(), RunnerError> {
        record.checkpoint.step_index = index + 1;
        record.checkpoint.step_name = None;
        record.checkpoint.cursor = None;
        record.checkpoint.total_processed = 0;
        ctx.fill_checkpoint(&mut record.checkpoint);
        record.touch();
        self.store.save(record).await?;
        Ok(())
    }

    async fn fail_preflight(&self, mut record: JobRecord, reason: String) -> Result<JobResult, RunnerError> {
        let reason = redact(&reason, None);
        error!("Job {} failed before any step ran: {}", record.job_id(), reason);
        record.fail(FailureRecord::preflight(reason));
        self.store.save(&record).await?;
        self.emit(ExecutionEvent::JobFinished {
            job_id: record.job_id(),
            status: JobStatus::Failed,
        });
        Ok(JobResult::from_record(&record, Vec::new(), Vec::new()))
    }

    async fn finish_failed(
        &self,
        mut record: JobRecord,
        ctx: JobContext,
        index: usize,
        step: &str,
        err: StepError,
        stats: Vec<StepStats>,
    ) -> Result<JobResult, RunnerError> {
        let reason = ctx.credential.redact(&err.to_string());
        let cursor = record.checkpoint.cursor.clone();
        error!(
            "Job {} failed at step {} ({}): {}",
            record.job_id(),
            step,
            cursor.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".into()),
            reason
        );

        record.fail(FailureRecord::at_step(index, step, cursor, reason.clone()));
        self.store.save(&record).await?;
        self.emit(ExecutionEvent::StepFailed {
            job_id: record.job_id(),
            step: step.to_string(),
            error: reason,
        });
        self.emit(ExecutionEvent::JobFinished {
            job_id: record.job_id(),
            status: JobStatus::Failed,
        });
        Ok(JobResult::from_record(&record, stats, ctx.warnings))
    }

    async fn finish_cancelled(
        &self,
        mut record: JobRecord,
        ctx: JobContext,
        stats: Vec<StepStats>,
    ) -> Result<JobResult, RunnerError> {
        warn!(
            "Job {} cancelled at step index {}",
            record.job_id(),
            record.checkpoint.step_index
        );
        record.cancel();
        self.store.save(&record).await?;
        self.emit(ExecutionEvent::JobFinished {
            job_id: record.job_id(),
            status: JobStatus::Cancelled,
        });
        Ok(JobResult::from_record(&record, stats, ctx.warnings))
    }
}

fn skip_reason(step: &Step, ctx: &JobContext) -> Option<String> {
    if ctx.request.should_skip(step.name()) {
        return Some("skipped by job settings".to_string());
    }
    let condition = step.descriptor.condition;
    if !condition.is_met(&ctx.flags) {
        return Some(format!("requires {}", condition.describe()));
    }
    None
}
