//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    CancelCommand, ListCommand, ResumeCommand, RunCommand, StatusCommand, StepsCommand,
    ValidateCommand,
};
use std::ffi::OsString;

/// Step-based importer for issue-tracker migrations
#[derive(Debug, Parser, Clone)]
#[command(name = "silo")]
#[command(version)]
#[command(about = "Imports projects from external issue trackers into a workspace", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to engine configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run one or more import jobs
    Run(RunCommand),

    /// Resume a failed or cancelled job
    Resume(ResumeCommand),

    /// Show a job's status and checkpoint
    Status(StatusCommand),

    /// List recent jobs
    List(ListCommand),

    /// Request cancellation of a running job
    Cancel(CancelCommand),

    /// Show the step pipeline of a provider
    Steps(StepsCommand),

    /// Validate configuration and job files
    Validate(ValidateCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
