//! CLI output formatting

use crate::{
    core::{JobStatus, StepOutcome, StepStats},
    execution::ExecutionEvent,
    persistence::JobSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Spinner shown while jobs run; events are printed above it
pub fn create_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a job status for display
pub fn format_status(status: JobStatus) -> String {
    match status {
        JobStatus::Queued => style("QUEUED").dim().to_string(),
        JobStatus::Running => style("RUNNING").yellow().to_string(),
        JobStatus::Waiting => style("WAITING").blue().to_string(),
        JobStatus::Completed => style("COMPLETED").green().to_string(),
        JobStatus::Failed => style("FAILED").red().to_string(),
        JobStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a job listing row
pub fn format_job_summary(summary: &JobSummary) -> String {
    let status_icon = match summary.status {
        JobStatus::Completed => CHECK,
        JobStatus::Failed => CROSS,
        JobStatus::Running | JobStatus::Waiting => SPINNER,
        _ => INFO,
    };

    format!(
        "{} {} - {} / {} - {} at {} - {}",
        status_icon,
        style(summary.job_id).dim(),
        style(&summary.provider).bold(),
        summary.project_id,
        format_status(summary.status),
        summary.step_name.as_deref().unwrap_or("-"),
        style(format!("{:.0}%", summary.progress * 100.0)).cyan()
    )
}

/// Format one step's counters
pub fn format_step_stats(stats: &StepStats) -> String {
    let outcome = match stats.outcome {
        StepOutcome::Completed => style("done").green().to_string(),
        StepOutcome::Skipped => style("skipped").dim().to_string(),
        StepOutcome::Failed => style("failed").red().to_string(),
        StepOutcome::Cancelled => style("cancelled").yellow().to_string(),
    };
    format!(
        "{:<28} {:<10} pages {:>4}  pulled {:>6}  created {:>6}  existing {:>6}  skipped {:>4}",
        stats.step, outcome, stats.pages, stats.pulled, stats.created, stats.existing, stats.skipped
    )
}

fn short(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::JobStarted {
            job_id,
            provider,
            total_steps,
            resumed_at,
        } => match resumed_at {
            Some(step) => format!(
                "{} Resuming {} import ({}) at {}",
                ROCKET,
                style(provider).bold(),
                style(short(job_id)).dim(),
                style(step).cyan()
            ),
            None => format!(
                "{} Starting {} import ({}), {} steps",
                ROCKET,
                style(provider).bold(),
                style(short(job_id)).dim(),
                total_steps
            ),
        },
        ExecutionEvent::StepStarted { step, index, .. } => {
            format!("{} [{}] {}", SPINNER, index + 1, style(step).cyan())
        }
        ExecutionEvent::StepSkipped { step, reason, .. } => {
            format!("{} {} ({})", INFO, style(step).dim(), reason)
        }
        // Page progress goes to the spinner message only
        ExecutionEvent::PageCompleted { .. } => return None,
        ExecutionEvent::WaitingForAsync { step, .. } => {
            format!("{} {} waiting for background processing", SPINNER, style(step).cyan())
        }
        ExecutionEvent::StepCompleted { stats, .. } => format!(
            "{} {} ({} pulled, {} created, {} existing)",
            CHECK,
            style(&stats.step).green(),
            stats.pulled,
            stats.created,
            stats.existing
        ),
        ExecutionEvent::StepFailed { step, error, .. } => {
            format!("{} {}: {}", CROSS, style(step).red(), style(error).dim())
        }
        ExecutionEvent::JobFinished { job_id, status } => format!(
            "{} Job ({}) {}",
            INFO,
            style(short(job_id)).dim(),
            format_status(*status)
        ),
    };
    Some(line)
}

/// Spinner message for a page event
pub fn format_page_progress(event: &ExecutionEvent) -> Option<String> {
    match event {
        ExecutionEvent::PageCompleted {
            step,
            page,
            pulled,
            created,
            ..
        } => Some(format!("{} page {} ({} pulled, {} new)", step, page, pulled, created)),
        _ => None,
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_page_events_only_update_spinner() {
        let event = ExecutionEvent::PageCompleted {
            job_id: Uuid::new_v4(),
            step: "issues".into(),
            page: 3,
            pulled: 50,
            created: 48,
            has_more: true,
        };
        assert!(format_execution_event(&event).is_none());
        assert_eq!(
            format_page_progress(&event).as_deref(),
            Some("issues page 3 (50 pulled, 48 new)")
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
