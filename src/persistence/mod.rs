//! Persistence layer for migration jobs and their checkpoints

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteJobStore;

use crate::core::{JobRecord, JobStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Listing row for a stored job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub provider: String,
    pub project_id: String,
    pub status: JobStatus,
    pub step_name: Option<String>,
    pub progress: f64,
    pub updated_at: DateTime<Utc>,
}

impl JobSummary {
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id(),
            provider: record.request.provider.to_string(),
            project_id: record.request.project_id.clone(),
            status: record.status,
            step_name: record.checkpoint.step_name.clone(),
            progress: record.progress(),
            updated_at: record.updated_at,
        }
    }
}

/// Storage for job records
///
/// A cancellation request survives `save`: only [`JobStore::clear_cancel`]
/// lowers the flag, so a runner checkpointing a page cannot drop a request
/// made concurrently.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or update a job record
    async fn save(&self, record: &JobRecord) -> Result<()>;

    async fn load(&self, job_id: Uuid) -> Result<Option<JobRecord>>;

    /// Most recently updated jobs first
    async fn list(&self, limit: usize) -> Result<Vec<JobSummary>>;

    /// Flag a job for cancellation; false when the job is unknown
    async fn request_cancel(&self, job_id: Uuid) -> Result<bool>;

    async fn is_cancel_requested(&self, job_id: Uuid) -> Result<bool>;

    async fn clear_cancel(&self, job_id: Uuid) -> Result<()>;
}

/// In-memory job store (for testing or ephemeral use)
pub struct InMemoryJobStore {
    records: RwLock<HashMap<Uuid, JobRecord>>,
    cancelled: RwLock<HashSet<Uuid>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            cancelled: RwLock::new(HashSet::new()),
        }
    }

    /// A scratch store holding a copy of one record, so a resumed dry run
    /// never writes back to the store the record came from
    pub fn seeded(record: JobRecord) -> Self {
        let mut records = HashMap::new();
        records.insert(record.job_id(), record);
        Self {
            records: RwLock::new(records),
            cancelled: RwLock::new(HashSet::new()),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn save(&self, record: &JobRecord) -> Result<()> {
        if record.cancel_requested {
            self.cancelled.write().await.insert(record.job_id());
        }
        self.records
            .write()
            .await
            .insert(record.job_id(), record.clone());
        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let cancelled = self.cancelled.read().await.contains(&job_id);
        Ok(self.records.read().await.get(&job_id).cloned().map(|mut record| {
            record.cancel_requested = cancelled;
            record
        }))
    }

    async fn list(&self, limit: usize) -> Result<Vec<JobSummary>> {
        let records = self.records.read().await;
        let mut summaries: Vec<JobSummary> = records.values().map(JobSummary::from_record).collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn request_cancel(&self, job_id: Uuid) -> Result<bool> {
        if !self.records.read().await.contains_key(&job_id) {
            return Ok(false);
        }
        self.cancelled.write().await.insert(job_id);
        Ok(true)
    }

    async fn is_cancel_requested(&self, job_id: Uuid) -> Result<bool> {
        Ok(self.cancelled.read().await.contains(&job_id))
    }

    async fn clear_cancel(&self, job_id: Uuid) -> Result<()> {
        self.cancelled.write().await.remove(&job_id);
        Ok(())
    }
}
