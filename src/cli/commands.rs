//! CLI command definitions

use clap::Args;
use uuid::Uuid;

/// Create a pipeline from a configuration file and run its first pass
#[derive(Debug, Args, Clone)]
pub struct CreateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Commands addressing a whole pipeline
#[derive(Debug, Args, Clone)]
pub struct PipelineCommand {
    /// Pipeline ID
    pub pipeline: Uuid,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show a pipeline
#[derive(Debug, Args, Clone)]
pub struct ShowCommand {
    #[command(flatten)]
    pub target: PipelineCommand,

    /// Include superseded job records
    #[arg(long)]
    pub all: bool,
}

/// Commands addressing one job of a pipeline
#[derive(Debug, Args, Clone)]
pub struct JobCommand {
    /// Pipeline ID
    pub pipeline: Uuid,

    /// Job ID, or the name of the job's current record
    pub job: String,
}

/// Report a job as failed or cancelled
#[derive(Debug, Args, Clone)]
pub struct DropCommand {
    #[command(flatten)]
    pub target: JobCommand,

    /// The job was cancelled by an operator rather than failing
    #[arg(long)]
    pub canceled: bool,
}

/// Retry a job or trigger a manual action
#[derive(Debug, Args, Clone)]
pub struct ActorCommand {
    #[command(flatten)]
    pub target: JobCommand,

    /// Who triggered the action
    #[arg(long)]
    pub actor: Option<String>,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List stored pipelines
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Number of recent pipelines to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
