use anyhow::{Context, Result};
use stagegate::cli::commands::{
    ActorCommand, CreateCommand, DropCommand, JobCommand, ListCommand, PipelineCommand, ShowCommand,
    ValidateCommand,
};
use stagegate::cli::output::*;
use stagegate::cli::{Cli, Command};
use stagegate::{DropReason, EmbeddedConfig, Engine, Outcome, PipelineConfig, SqlitePipelineStore};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    if let Command::Validate(cmd) = &cli.command {
        return validate_pipeline(cmd);
    }

    let engine = open_engine(&cli).await?;

    match &cli.command {
        Command::Create(cmd) => create_pipeline(&engine, cmd).await?,
        Command::Process(cmd) => process_pipeline(&engine, cmd).await?,
        Command::Show(cmd) => show_pipeline(&engine, cmd).await?,
        Command::Start(cmd) => {
            let job = resolve_job(&engine, cmd).await?;
            print_outcome(engine.start(cmd.pipeline, job).await?);
        }
        Command::Succeed(cmd) => {
            let job = resolve_job(&engine, cmd).await?;
            print_outcome(engine.succeed(cmd.pipeline, job).await?);
        }
        Command::Drop(cmd) => drop_job(&engine, cmd).await?,
        Command::Retry(cmd) => {
            let job = resolve_job(&engine, &cmd.target).await?;
            print_outcome(
                engine
                    .retry(cmd.target.pipeline, job, cmd.actor.as_deref())
                    .await?,
            );
        }
        Command::Play(cmd) => play_job(&engine, cmd).await?,
        Command::Cancel(cmd) => {
            let outcome = engine.cancel(cmd.pipeline).await?;
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(outcome);
            }
        }
        Command::List(cmd) => list_pipelines(&engine, cmd).await?,
        Command::Validate(_) => {}
    }

    Ok(())
}

async fn open_engine(cli: &Cli) -> Result<Engine> {
    let store = match &cli.db {
        Some(path) => SqlitePipelineStore::new(path).await,
        None => SqlitePipelineStore::with_default_path().await,
    }
    .context("Failed to open pipeline database")?;

    let engine = Engine::new(Arc::new(store), Arc::new(EmbeddedConfig));

    // Event lines would corrupt a JSON document on stdout
    if cli.command.wants_json() {
        return Ok(engine);
    }
    Ok(engine.with_event_handler(|event| println!("{}", format_event(&event))))
}

/// Accept either a job ID or the name of a job's current record
async fn resolve_job(engine: &Engine, cmd: &JobCommand) -> Result<Uuid> {
    if let Ok(id) = Uuid::parse_str(&cmd.job) {
        return Ok(id);
    }

    let pipeline = engine.pipeline(cmd.pipeline).await?;
    pipeline
        .latest_job(&cmd.job)
        .map(|job| job.id)
        .with_context(|| format!("No job named '{}' in pipeline {}", cmd.job, cmd.pipeline))
}

fn print_outcome(outcome: Outcome) {
    println!("{}", format_outcome(&outcome));
}

async fn create_pipeline(engine: &Engine, cmd: &CreateCommand) -> Result<()> {
    let source = std::fs::read_to_string(&cmd.file)
        .with_context(|| format!("Failed to read {}", cmd.file))?;
    let config = PipelineConfig::from_yaml(&source).context("Failed to load pipeline config")?;

    if !cmd.json {
        println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());
    }

    let pipeline = engine
        .create_pipeline(config.to_pipeline().with_config_source(source))
        .await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&pipeline)?);
    } else {
        println!();
        print!("{}", render_pipeline(&pipeline, false));
    }

    Ok(())
}

async fn process_pipeline(engine: &Engine, cmd: &PipelineCommand) -> Result<()> {
    let changed = engine.process(cmd.pipeline).await?;
    let pipeline = engine.pipeline(cmd.pipeline).await?;

    if cmd.json {
        let data = serde_json::json!({ "changed": changed, "status": pipeline.status });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else if changed {
        println!("{} Pipeline is {}", CHECK, format_status(pipeline.status));
    } else {
        println!("{} Nothing changed, pipeline is {}", INFO, format_status(pipeline.status));
    }

    Ok(())
}

async fn show_pipeline(engine: &Engine, cmd: &ShowCommand) -> Result<()> {
    let pipeline = engine.pipeline(cmd.target.pipeline).await?;

    if cmd.target.json {
        println!("{}", serde_json::to_string_pretty(&pipeline)?);
        return Ok(());
    }

    print!("{}", render_pipeline(&pipeline, cmd.all));

    let actions = pipeline.manual_actions();
    if !actions.is_empty() {
        println!("\n{} Manual actions:", HAND);
        for job in actions {
            println!("  {} {}", style(job.id).dim(), style(&job.name).bold());
        }
    }

    Ok(())
}

async fn drop_job(engine: &Engine, cmd: &DropCommand) -> Result<()> {
    let job = resolve_job(engine, &cmd.target).await?;
    let reason = if cmd.canceled {
        DropReason::Canceled
    } else {
        DropReason::Failed
    };

    print_outcome(engine.drop_job(cmd.target.pipeline, job, reason).await?);
    Ok(())
}

async fn play_job(engine: &Engine, cmd: &ActorCommand) -> Result<()> {
    let job = resolve_job(engine, &cmd.target).await?;
    let outcome = engine
        .play(cmd.target.pipeline, job, cmd.actor.as_deref())
        .await?;

    print_outcome(outcome);
    Ok(())
}

async fn list_pipelines(engine: &Engine, cmd: &ListCommand) -> Result<()> {
    let pipelines: Vec<_> = engine
        .list_pipelines()
        .await?
        .into_iter()
        .take(cmd.limit)
        .collect();

    if cmd.json {
        let data = serde_json::json!({ "pipelines": pipelines });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if pipelines.is_empty() {
        println!("{} No pipelines found", INFO);
        return Ok(());
    }

    println!("{} Pipelines (showing latest {}):", INFO, cmd.limit);
    for summary in &pipelines {
        println!("  {}", format_summary(summary));
    }

    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    if !cmd.json {
        println!("{} Validating pipeline...", INFO);
    }

    match PipelineConfig::from_file(&cmd.file) {
        Ok(config) if cmd.json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            print!("{}", render_config(&config));
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}
