//! Engine configuration and job files, loaded from YAML

use crate::core::job::{JobRequest, Provider, SourceSettings};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiloConfig {
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Backoff for transient fetch and load failures
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub wait_for_async: WaitConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub target: TargetConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Upper bound for a single page pull
    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,

    /// Jobs a worker runs at the same time
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Rate-limited retries allowed per page
    #[serde(default = "default_rate_limit_retries")]
    pub max_retries: u32,

    /// Cap on a single rate-limit wait
    #[serde(default = "default_rate_limit_max_wait")]
    pub max_wait_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path (default: data dir)
    #[serde(default)]
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Product API base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_page_timeout() -> u64 {
    120
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_rate_limit_retries() -> u32 {
    5
}

fn default_rate_limit_max_wait() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_wait() -> u64 {
    3600
}

fn default_api_key_env() -> String {
    "SILO_TARGET_API_KEY".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            page_timeout_secs: default_page_timeout(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_retries: default_rate_limit_retries(),
            max_wait_secs: default_rate_limit_max_wait(),
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: default_api_key_env(),
        }
    }
}

impl SiloConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SiloConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.runner.page_timeout_secs == 0 {
            anyhow::bail!("runner.page_timeout_secs must be greater than 0");
        }
        if self.runner.max_concurrent_jobs == 0 {
            anyhow::bail!("runner.max_concurrent_jobs must be greater than 0");
        }
        if self.retry.backoff_multiplier < 1.0 {
            anyhow::bail!(
                "retry.backoff_multiplier must be at least 1.0, got {}",
                self.retry.backoff_multiplier
            );
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            anyhow::bail!("retry.initial_delay_ms cannot exceed retry.max_delay_ms");
        }
        if self.wait_for_async.poll_interval_secs == 0 {
            anyhow::bail!("wait_for_async.poll_interval_secs must be greater than 0");
        }
        if self.wait_for_async.max_wait_secs < self.wait_for_async.poll_interval_secs {
            anyhow::bail!("wait_for_async.max_wait_secs must be at least one poll interval");
        }
        Ok(())
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.runner.page_timeout_secs)
    }

    pub fn rate_limit_max_wait(&self) -> Duration {
        Duration::from_secs(self.rate_limit.max_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.wait_for_async.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.wait_for_async.max_wait_secs)
    }

    /// Database path, defaulting to the platform data directory
    pub fn database_path(&self) -> PathBuf {
        self.storage.database.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("silo")
                .join("jobs.db")
        })
    }
}

/// A job as written by hand in YAML; `job_id` is generated when missing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    #[serde(default)]
    pub job_id: Option<Uuid>,
    pub provider: Provider,
    pub workspace_id: String,
    pub project_id: String,
    pub credential_ref: String,
    #[serde(default)]
    pub source: SourceSettings,
    #[serde(default)]
    pub skip_steps: Vec<String>,
    #[serde(default)]
    pub page_sizes: HashMap<String, u32>,
}

impl JobFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let job: JobFile = serde_yaml::from_str(yaml)?;
        if job.workspace_id.trim().is_empty() || job.project_id.trim().is_empty() {
            anyhow::bail!("workspace_id and project_id are required");
        }
        if job.page_sizes.values().any(|size| *size == 0) {
            anyhow::bail!("page sizes must be greater than 0");
        }
        Ok(job)
    }

    pub fn into_request(self) -> JobRequest {
        JobRequest {
            job_id: self.job_id.unwrap_or_else(Uuid::new_v4),
            provider: self.provider,
            workspace_id: self.workspace_id,
            project_id: self.project_id,
            credential_ref: self.credential_ref,
            source: self.source,
            skip_steps: self.skip_steps,
            page_sizes: self.page_sizes,
        }
    }
}
