//! SQLite-based job store

use crate::core::{JobRecord, JobStatus};
use crate::persistence::{JobStore, JobSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// SQLite job store
///
/// Indexed columns mirror the fields used for listing and cancellation; the
/// full record (request, checkpoint, failure) is kept as JSON.
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (or create) a store at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Single-connection in-memory store
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Open the store at `path`, creating parent directories
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Self::new(path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                workspace_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                status TEXT NOT NULL,
                step_index INTEGER NOT NULL DEFAULT 0,
                step_name TEXT,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                progress REAL NOT NULL DEFAULT 0.0,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                record TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_updated_at ON jobs(updated_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }
}

#[async_trait::async_trait]
impl JobStore for SqliteJobStore {
    async fn save(&self, record: &JobRecord) -> Result<()> {
        let json = serde_json::to_string(record).context("Failed to serialize job record")?;
        sqlx::query(
            r#"
            INSERT INTO jobs
            (id, provider, workspace_id, project_id, status, step_index, step_name,
             cancel_requested, progress, updated_at, completed_at, record)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                step_index = excluded.step_index,
                step_name = excluded.step_name,
                cancel_requested = MAX(jobs.cancel_requested, excluded.cancel_requested),
                progress = excluded.progress,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at,
                record = excluded.record
            "#,
        )
        .bind(record.job_id().to_string())
        .bind(record.request.provider.as_str())
        .bind(&record.request.workspace_id)
        .bind(&record.request.project_id)
        .bind(record.status.as_str())
        .bind(record.checkpoint.step_index as i64)
        .bind(record.checkpoint.step_name.as_deref())
        .bind(record.cancel_requested as i64)
        .bind(record.progress())
        .bind(Self::to_naive(record.updated_at))
        .bind(record.completed_at.map(Self::to_naive))
        .bind(json)
        .execute(&self.pool)
        .await
        .context("Failed to save job")?;

        Ok(())
    }

    async fn load(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let row = sqlx::query("SELECT record, cancel_requested FROM jobs WHERE id = ?1")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load job")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut record: JobRecord = serde_json::from_str(&row.get::<String, _>("record"))
            .context("Stored job record is corrupt")?;
        record.cancel_requested = row.get::<i64, _>("cancel_requested") != 0;
        Ok(Some(record))
    }

    async fn list(&self, limit: usize) -> Result<Vec<JobSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, provider, project_id, status, step_name, progress, updated_at
            FROM jobs
            ORDER BY updated_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list jobs")?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(JobSummary {
                    job_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
                    provider: row.get("provider"),
                    project_id: row.get("project_id"),
                    status: JobStatus::parse(&status)
                        .with_context(|| format!("Unknown job status '{}'", status))?,
                    step_name: row.get("step_name"),
                    progress: row.get("progress"),
                    updated_at: Self::from_naive(row.get("updated_at")),
                })
            })
            .collect()
    }

    async fn request_cancel(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE jobs SET cancel_requested = 1 WHERE id = ?1")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to request cancellation")?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_cancel_requested(&self, job_id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT cancel_requested FROM jobs WHERE id = ?1")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read cancellation flag")?;
        Ok(row.map(|r| r.get::<i64, _>("cancel_requested") != 0).unwrap_or(false))
    }

    async fn clear_cancel(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE jobs SET cancel_requested = 0 WHERE id = ?1")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to clear cancellation flag")?;
        Ok(())
    }
}
