use anyhow::{bail, Context, Result};
use silo::cli::commands::{
    CancelCommand, ListCommand, ResumeCommand, RunCommand, StatusCommand, StepsCommand,
    ValidateCommand,
};
use silo::cli::output::*;
use silo::cli::{Cli, Command};
use silo::core::config::{JobFile, SiloConfig};
use silo::core::{JobRecord, JobResult, Provider};
use silo::credentials::{CredentialResolver, FileCredentialStore};
use silo::execution::{AsyncSignal, JobWorker, PipelineRunner, StepRegistry};
use silo::persistence::{InMemoryJobStore, JobStore};
use silo::providers::jira::JiraSourceFactory;
use silo::target::{HttpTargetClient, HttpTargetConfig, InMemoryTarget, TargetApi};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let default_filter = if cli.verbose { "silo=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = load_config(cli.config.as_deref())?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_jobs(cmd, &config).await?,
        Command::Resume(cmd) => resume_job(cmd, &config).await?,
        Command::Status(cmd) => show_status(cmd, &config).await?,
        Command::List(cmd) => list_jobs(cmd, &config).await?,
        Command::Cancel(cmd) => cancel_job(cmd, &config).await?,
        Command::Steps(cmd) => show_steps(cmd)?,
        Command::Validate(cmd) => validate(cmd, &config)?,
    }

    Ok(())
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("silo")
}

fn load_config(path: Option<&str>) -> Result<SiloConfig> {
    match path {
        Some(path) => SiloConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path)),
        None => {
            let default = config_dir().join("config.yaml");
            if default.exists() {
                SiloConfig::from_file(&default)
                    .with_context(|| format!("Failed to load config from {}", default.display()))
            } else {
                Ok(SiloConfig::default())
            }
        }
    }
}

async fn open_store(
    #[cfg_attr(not(feature = "sqlite"), allow(unused_variables))] config: &SiloConfig,
    no_history: bool,
) -> Result<Arc<dyn JobStore>> {
    if no_history {
        return Ok(Arc::new(InMemoryJobStore::new()));
    }
    #[cfg(feature = "sqlite")]
    {
        let store = silo::persistence::SqliteJobStore::open(&config.database_path()).await?;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Arc::new(InMemoryJobStore::new()))
    }
}

fn parse_job_id(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid job ID '{}'", value))
}

fn build_runner(
    config: &SiloConfig,
    credentials: Option<&str>,
    dry_run: bool,
    store: Arc<dyn JobStore>,
) -> Result<PipelineRunner> {
    let registry = StepRegistry::with_builtin_providers().context("Invalid built-in pipeline")?;

    let credentials_path = credentials
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir().join("credentials.yaml"));
    let credential_store = FileCredentialStore::from_file(&credentials_path)
        .with_context(|| format!("Failed to load credentials from {}", credentials_path.display()))?;

    let (target, signal): (Arc<dyn TargetApi>, Arc<dyn AsyncSignal>) = if dry_run {
        let target = Arc::new(InMemoryTarget::new());
        (target.clone(), target)
    } else {
        let http = HttpTargetConfig::from_config(&config.target)?;
        let target = Arc::new(HttpTargetClient::new(http)?);
        (target.clone(), target)
    };

    let spinner = create_spinner();
    let runner = PipelineRunner::new(
        Arc::new(registry),
        config,
        CredentialResolver::new(Arc::new(credential_store)),
        Arc::new(JiraSourceFactory),
        target,
        signal,
        store,
    )
    .with_event_handler(move |event| {
        if let Some(message) = format_page_progress(&event) {
            spinner.set_message(message);
        }
        if let Some(line) = format_execution_event(&event) {
            spinner.println(line);
        }
    });
    Ok(runner)
}

fn print_result(result: &JobResult) {
    println!();
    for stats in &result.stats {
        println!("  {}", format_step_stats(stats));
    }
    for warning in &result.warnings {
        println!("  {} [{}] {}", WARN, warning.step, style(&warning.message).dim());
    }
    match &result.failure {
        Some(failure) => println!(
            "{} Job {} failed at {}: {}",
            CROSS,
            style(result.job_id).bold(),
            failure.step_name.as_deref().unwrap_or("pre-flight"),
            style(&failure.reason).red()
        ),
        None => println!(
            "{} Job {} {}",
            if result.is_success() { CHECK } else { INFO },
            style(result.job_id).bold(),
            format_status(result.status)
        ),
    }
}

async fn run_jobs(cmd: &RunCommand, config: &SiloConfig) -> Result<()> {
    let mut requests = Vec::new();
    for path in &cmd.job {
        let job = JobFile::from_file(path).with_context(|| format!("Failed to load job {}", path))?;
        let request = job.into_request();
        println!(
            "{} Loaded job {} ({} -> {})",
            INFO,
            style(request.job_id).bold(),
            request.provider,
            request.project_id
        );
        requests.push(request);
    }

    if cmd.dry_run {
        info!("Dry run: job state is kept in memory and cannot be resumed");
    }
    let store = open_store(config, !cmd.keeps_history()).await?;
    let runner = build_runner(config, cmd.credentials.as_deref(), cmd.dry_run, store)?;
    let worker = JobWorker::new(Arc::new(runner), config.runner.max_concurrent_jobs);

    let mut failed = false;
    for result in worker.run_all(requests).await {
        match result {
            Ok(result) => {
                failed |= !result.is_success();
                print_result(&result);
            }
            Err(e) => {
                failed = true;
                error!("{}", e);
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn resume_job(cmd: &ResumeCommand, config: &SiloConfig) -> Result<()> {
    let job_id = parse_job_id(&cmd.job_id)?;
    let store = open_store(config, false).await?;
    let Some(record) = store.load(job_id).await? else {
        bail!("Job {} not found", job_id);
    };
    if !record.status.is_resumable() {
        println!("{} Job {} already completed", INFO, job_id);
        return Ok(());
    }

    let store: Arc<dyn JobStore> = if cmd.dry_run {
        info!("Dry run: resuming from a scratch copy of job {}", job_id);
        Arc::new(InMemoryJobStore::seeded(record.clone()))
    } else {
        store
    };
    let runner = build_runner(config, cmd.credentials.as_deref(), cmd.dry_run, store)?;
    let result = runner.run(record.request).await?;
    print_result(&result);
    if !result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_record(record: &JobRecord) {
    println!("{} Job Details", INFO);
    println!("  ID: {}", style(record.job_id()).cyan());
    println!("  Provider: {}", style(record.request.provider).bold());
    println!(
        "  Target: {}/{}",
        record.request.workspace_id, record.request.project_id
    );
    println!("  Status: {}", format_status(record.status));
    if let Some(started) = record.started_at {
        println!("  Started: {}", style(started.to_rfc3339()).dim());
        let end = record.completed_at.unwrap_or(record.updated_at);
        if let Ok(duration) = end.signed_duration_since(started).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Progress: {} ({} done, {} skipped of {})",
        style(format!("{:.0}%", record.progress() * 100.0)).cyan(),
        record.checkpoint.completed_steps.len(),
        record.checkpoint.skipped_steps.len(),
        record.total_steps
    );
    if let Some(step) = &record.checkpoint.step_name {
        let cursor = record
            .checkpoint
            .cursor
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "start".into());
        println!("  Position: {} at {}", style(step).cyan(), cursor);
    }
    println!("  Mapped entities: {}", record.checkpoint.id_map.len());
    if let Some(failure) = &record.failure {
        println!("  Failure: {}", style(&failure.reason).red());
    }
}

async fn show_status(cmd: &StatusCommand, config: &SiloConfig) -> Result<()> {
    let job_id = parse_job_id(&cmd.job_id)?;
    let store = open_store(config, false).await?;
    match store.load(job_id).await? {
        Some(record) if cmd.json => println!("{}", serde_json::to_string_pretty(&record)?),
        Some(record) => print_record(&record),
        None => println!("{} Job not found", WARN),
    }
    Ok(())
}

async fn list_jobs(cmd: &ListCommand, config: &SiloConfig) -> Result<()> {
    let store = open_store(config, false).await?;
    let jobs = store.list(cmd.limit).await?;

    if cmd.json {
        let data = serde_json::json!({ "jobs": jobs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }
    if jobs.is_empty() {
        println!("{} No jobs found", INFO);
        return Ok(());
    }

    println!("{} Recent jobs (showing latest {}):", INFO, cmd.limit);
    for summary in &jobs {
        println!("  {}", format_job_summary(summary));
    }
    Ok(())
}

async fn cancel_job(cmd: &CancelCommand, config: &SiloConfig) -> Result<()> {
    let job_id = parse_job_id(&cmd.job_id)?;
    let store = open_store(config, false).await?;
    if store.request_cancel(job_id).await? {
        println!(
            "{} Cancellation requested; job {} stops at its next page boundary",
            CHECK, job_id
        );
    } else {
        println!("{} Job not found", WARN);
    }
    Ok(())
}

fn show_steps(cmd: &StepsCommand) -> Result<()> {
    let Some(provider) = Provider::parse(&cmd.provider) else {
        bail!("Unknown provider '{}'", cmd.provider);
    };
    let registry = StepRegistry::with_builtin_providers()?;
    let pipeline = registry.steps_for(provider)?;

    println!("{} {} pipeline:", INFO, style(provider).bold());
    for (index, step) in pipeline.steps().iter().enumerate() {
        let descriptor = &step.descriptor;
        let mut line = format!(
            "  {:>2}. {:<28} {}",
            index + 1,
            style(&descriptor.name).cyan(),
            style(descriptor.kind).dim()
        );
        if !descriptor.depends_on.is_empty() {
            line.push_str(&format!("  after {}", descriptor.depends_on.join(", ")));
        }
        if descriptor.condition != silo::core::StepCondition::Always {
            line.push_str(&format!("  [{}]", descriptor.condition.describe()));
        }
        println!("{}", line);
    }
    Ok(())
}

fn validate(cmd: &ValidateCommand, config: &SiloConfig) -> Result<()> {
    println!("{} Configuration is valid", CHECK);
    println!("  Database: {}", style(config.database_path().display()).dim());
    println!(
        "  Retries: {} (rate limit: {}, max wait {}s)",
        config.retry.max_retries, config.rate_limit.max_retries, config.rate_limit.max_wait_secs
    );

    let registry = StepRegistry::with_builtin_providers()?;
    let mut invalid = false;
    for path in &cmd.job {
        match JobFile::from_file(path) {
            Ok(job) => match registry.steps_for(job.provider) {
                Ok(pipeline) => {
                    println!("{} {}: {} job, {} steps", CHECK, path, job.provider, pipeline.len());
                    if cmd.json {
                        println!("{}", serde_json::to_string_pretty(&job)?);
                    }
                }
                Err(e) => {
                    invalid = true;
                    println!("{} {}: {}", CROSS, path, style(e).red());
                }
            },
            Err(e) => {
                invalid = true;
                println!("{} {}: {}", CROSS, path, style(format!("{:#}", e)).red());
            }
        }
    }

    if invalid {
        std::process::exit(1);
    }
    Ok(())
}
