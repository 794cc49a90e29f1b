//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    ActorCommand, CreateCommand, DropCommand, JobCommand, ListCommand, PipelineCommand, ShowCommand,
    ValidateCommand,
};
use std::ffi::OsString;

/// Stage-gated CI pipeline scheduler
#[derive(Debug, Parser, Clone)]
#[command(name = "stagegate")]
#[command(version)]
#[command(about = "Stage-gated CI pipeline scheduler", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the pipeline database
    #[arg(long, global = true)]
    pub db: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Create a pipeline from a configuration file
    Create(CreateCommand),

    /// Run a processing pass over a pipeline
    Process(PipelineCommand),

    /// Show a pipeline, its stages and manual actions
    Show(ShowCommand),

    /// Report that a runner picked a job up
    Start(JobCommand),

    /// Report that a job succeeded
    Succeed(JobCommand),

    /// Report that a job failed, or cancel it
    Drop(DropCommand),

    /// Retry a failed or cancelled job
    Retry(ActorCommand),

    /// Trigger a manual action
    Play(ActorCommand),

    /// Cancel a pipeline
    Cancel(PipelineCommand),

    /// List stored pipelines
    List(ListCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),
}

impl Command {
    /// Whether stdout must carry only the JSON document
    pub fn wants_json(&self) -> bool {
        match self {
            Command::Create(cmd) => cmd.json,
            Command::Process(cmd) | Command::Cancel(cmd) => cmd.json,
            Command::Show(cmd) => cmd.target.json,
            Command::List(cmd) => cmd.json,
            Command::Validate(cmd) => cmd.json,
            Command::Start(_)
            | Command::Succeed(_)
            | Command::Drop(_)
            | Command::Retry(_)
            | Command::Play(_) => false,
        }
    }
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
