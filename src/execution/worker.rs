//! Worker pool - runs independent jobs concurrently

use crate::core::{JobRequest, JobResult};
use crate::execution::engine::{PipelineRunner, RunnerError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("job {job_id} worker task failed: {reason}")]
    Task { job_id: Uuid, reason: String },
}

/// Runs jobs on tokio tasks, at most `max_concurrent` at a time
///
/// Jobs share the runner but never a [`crate::core::JobContext`]; each task
/// builds its own.
pub struct JobWorker {
    runner: Arc<PipelineRunner>,
    permits: Arc<Semaphore>,
}

impl JobWorker {
    pub fn new(runner: Arc<PipelineRunner>, max_concurrent: usize) -> Self {
        Self {
            runner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Run every request; results come back in request order
    pub async fn run_all(&self, requests: Vec<JobRequest>) -> Vec<Result<JobResult, WorkerError>> {
        let job_ids: Vec<Uuid> = requests.iter().map(|r| r.job_id).collect();
        let mut tasks = JoinSet::new();

        for (index, request) in requests.into_iter().enumerate() {
            let runner = self.runner.clone();
            let permits = self.permits.clone();
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        debug!("Worker picked up job {}", request.job_id);
                        runner.run(request).await.map_err(WorkerError::from)
                    }
                    Err(e) => Err(WorkerError::Task {
                        job_id: request.job_id,
                        reason: e.to_string(),
                    }),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<JobResult, WorkerError>>> =
            job_ids.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => error!("Worker task panicked: {}", e),
            }
        }

        results
            .into_iter()
            .zip(job_ids)
            .map(|(result, job_id)| {
                result.unwrap_or_else(|| {
                    Err(WorkerError::Task {
                        job_id,
                        reason: "task aborted".to_string(),
                    })
                })
            })
            .collect()
    }
}
