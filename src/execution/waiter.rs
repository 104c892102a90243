//! Waiting for background processing in the target

use crate::core::{config::SiloConfig, StepError};
use crate::persistence::JobStore;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Background processing status as reported by the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncStatus {
    pub done: bool,
}

#[derive(Debug, Clone, Error)]
pub enum SignalError {
    /// Poll again on the next tick
    #[error("transient status poll failure: {0}")]
    Transient(String),

    #[error("status poll failed: {0}")]
    Fatal(String),
}

/// Source of the "background work finished" signal
#[async_trait]
pub trait AsyncSignal: Send + Sync {
    async fn poll_status(&self, job_id: Uuid) -> Result<AsyncStatus, SignalError>;
}

/// How a wait ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Done,
    Cancelled,
}

/// Polls an [`AsyncSignal`] until done, cancelled or out of time
#[derive(Debug, Clone)]
pub struct AsyncWaiter {
    poll_interval: Duration,
    max_wait: Duration,
}

impl AsyncWaiter {
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            poll_interval,
            max_wait,
        }
    }

    pub fn from_config(config: &SiloConfig) -> Self {
        Self::new(config.poll_interval(), config.max_wait())
    }

    pub async fn wait(
        &self,
        signal: &dyn AsyncSignal,
        store: &dyn JobStore,
        job_id: Uuid,
    ) -> Result<WaitOutcome, StepError> {
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            polls += 1;
            match signal.poll_status(job_id).await {
                Ok(status) if status.done => {
                    info!("Background processing for job {} finished after {} poll(s)", job_id, polls);
                    return Ok(WaitOutcome::Done);
                }
                Ok(_) => debug!("Job {} still processing (poll {})", job_id, polls),
                Err(SignalError::Transient(e)) => warn!("Status poll for job {} failed: {}", job_id, e),
                Err(e @ SignalError::Fatal(_)) => return Err(StepError::Signal(e.to_string())),
            }

            match store.is_cancel_requested(job_id).await {
                Ok(true) => return Ok(WaitOutcome::Cancelled),
                Ok(false) => {}
                Err(e) => warn!("Could not read cancellation flag for job {}: {}", job_id, e),
            }

            let waited = started.elapsed();
            if waited >= self.max_wait {
                return Err(StepError::WaitTimeout { waited });
            }
            sleep(self.poll_interval.min(self.max_wait - waited)).await;
        }
    }
}
