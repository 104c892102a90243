//! CLI command definitions

use clap::Args;

/// Run import jobs
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to a job YAML file (repeat to run several jobs concurrently)
    #[arg(short, long, required = true)]
    pub job: Vec<String>,

    /// Credentials YAML file
    #[arg(long)]
    pub credentials: Option<String>,

    /// Write into an in-memory target instead of the product API (implies --no-history)
    #[arg(long)]
    pub dry_run: bool,

    /// Keep job state in memory only (jobs cannot be resumed)
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    /// Whether job state goes to the persistent store
    pub fn keeps_history(&self) -> bool {
        !self.no_history && !self.dry_run
    }
}

/// Resume a stored job
#[derive(Debug, Args, Clone)]
pub struct ResumeCommand {
    /// Job ID
    pub job_id: String,

    /// Credentials YAML file
    #[arg(long)]
    pub credentials: Option<String>,

    /// Replay against an in-memory target and a scratch copy of the job state
    #[arg(long)]
    pub dry_run: bool,
}

/// Show job status
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    /// Job ID
    pub job_id: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List recent jobs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Number of jobs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Cancel a job at its next page boundary
#[derive(Debug, Args, Clone)]
pub struct CancelCommand {
    /// Job ID
    pub job_id: String,
}

/// Show a provider's step pipeline
#[derive(Debug, Args, Clone)]
pub struct StepsCommand {
    /// Provider name (e.g. jira, jira_server)
    pub provider: String,
}

/// Validate configuration (and optionally job files)
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Job YAML files to validate as well
    #[arg(short, long)]
    pub job: Vec<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
