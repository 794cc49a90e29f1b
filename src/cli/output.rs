//! CLI output formatting

use crate::{
    core::{config::PipelineConfig, JobStatus, Pipeline, PipelineStatus},
    execution::{Outcome, SchedulerEvent},
    persistence::PipelineSummary,
};
use console::Emoji;
use std::fmt::Write;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static HAND: Emoji<'_, '_> = Emoji("✋ ", "> ");

/// Format a job status for display
pub fn format_job_status(status: JobStatus) -> String {
    let label = status.as_str().to_uppercase();
    match status {
        JobStatus::Created | JobStatus::Skipped => style(label).dim().to_string(),
        JobStatus::Pending | JobStatus::Manual => style(label).blue().to_string(),
        JobStatus::Running => style(label).yellow().to_string(),
        JobStatus::Success => style(label).green().to_string(),
        JobStatus::Failed => style(label).red().to_string(),
        JobStatus::Canceled => style(label).yellow().to_string(),
    }
}

/// Format a pipeline status for display
pub fn format_status(status: PipelineStatus) -> String {
    let label = status.as_str().to_uppercase();
    match status {
        PipelineStatus::Created | PipelineStatus::Skipped => style(label).dim().to_string(),
        PipelineStatus::Pending => style(label).blue().to_string(),
        PipelineStatus::Running => style(label).yellow().to_string(),
        PipelineStatus::Success => style(label).green().to_string(),
        PipelineStatus::Failed => style(label).red().to_string(),
        PipelineStatus::Canceled => style(label).yellow().to_string(),
    }
}

fn status_icon(status: PipelineStatus) -> Emoji<'static, 'static> {
    match status {
        PipelineStatus::Success => CHECK,
        PipelineStatus::Failed => CROSS,
        PipelineStatus::Pending | PipelineStatus::Running => SPINNER,
        _ => INFO,
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Format pipeline summary for display
pub fn format_summary(summary: &PipelineSummary) -> String {
    format!(
        "{} {} - {} - {} ({} jobs) - {}",
        status_icon(summary.status),
        style(summary.id).dim(),
        style(&summary.name).bold(),
        format_status(summary.status),
        summary.job_count,
        style(summary.created_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// Render a pipeline stage by stage
pub fn render_pipeline(pipeline: &Pipeline, include_retried: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {} ({}) {}",
        status_icon(pipeline.status),
        style(&pipeline.name).bold(),
        style(pipeline.id).dim(),
        format_status(pipeline.status)
    );

    for stage in pipeline.stages() {
        let stage_status = match stage.status() {
            Some(status) => format_status(status),
            None if stage.lazy => style("NOT MATERIALIZED").dim().to_string(),
            None => style("EMPTY").dim().to_string(),
        };
        let _ = writeln!(out, "  {} {}", style(&stage.name).cyan(), stage_status);

        let mut jobs: Vec<_> = pipeline
            .jobs
            .iter()
            .filter(|job| job.stage_index == stage.index)
            .filter(|job| include_retried || job.is_current())
            .collect();
        jobs.sort_by_key(|job| job.position);

        for job in jobs {
            let mut flags = Vec::new();
            if job.allow_failure {
                flags.push("allow_failure".to_string());
            }
            if pipeline.is_manual_action(job) {
                flags.push("manual action".to_string());
            }
            if job.retried {
                flags.push("retried".to_string());
            }
            if let Some(actor) = &job.triggered_by {
                flags.push(format!("by {}", actor));
            }

            let _ = write!(
                out,
                "    {} {} [{}] {}",
                style(short_id(&job.id)).dim(),
                job.name,
                job.condition,
                format_job_status(job.status)
            );
            if !flags.is_empty() {
                let _ = write!(out, " {}", style(format!("({})", flags.join(", "))).dim());
            }
            out.push('\n');
        }
    }

    if let Some(reason) = &pipeline.halt {
        let _ = writeln!(out, "  {} halted: {:?}", WARN, reason);
    }

    out
}

/// Format a scheduler event for display
pub fn format_event(event: &SchedulerEvent) -> String {
    match event {
        SchedulerEvent::JobCreated { name, status, .. } => {
            format!("{} {} created as {}", INFO, style(name).cyan(), format_job_status(*status))
        }
        SchedulerEvent::JobTransitioned { name, from, to, .. } => {
            let icon = match to {
                JobStatus::Success => CHECK,
                JobStatus::Failed => CROSS,
                JobStatus::Pending | JobStatus::Running => SPINNER,
                _ => INFO,
            };
            format!(
                "{} {} {} → {}",
                icon,
                style(name).cyan(),
                format_job_status(*from),
                format_job_status(*to)
            )
        }
        SchedulerEvent::StageMaterialized {
            stage_index, jobs, ..
        } => format!(
            "{} Stage {} materialized with {} job(s)",
            INFO,
            style(stage_index).cyan(),
            jobs
        ),
        SchedulerEvent::PipelineStatusChanged {
            pipeline_id, from, to, ..
        } => format!(
            "{} Pipeline ({}) {} → {}",
            status_icon(*to),
            style(short_id(pipeline_id)).dim(),
            format_status(*from),
            format_status(*to)
        ),
    }
}

/// Format a handler outcome for display
pub fn format_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Applied => format!("{} Applied", CHECK),
        Outcome::Created { job_id } => {
            format!("{} Created job {}", CHECK, style(job_id).cyan())
        }
        Outcome::Noop { reason } => format!("{} Nothing to do: {}", WARN, style(reason).dim()),
    }
}

/// Render a validated configuration: stages, then each job under its stage
pub fn render_config(config: &PipelineConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "  Name: {}", style(&config.name).bold());
    if let Some(version) = &config.version {
        let _ = writeln!(out, "  Version: {}", style(version).cyan());
    }
    let _ = writeln!(out, "  Stages: {}", style(config.stages.join(" → ")).cyan());
    if config.lazy {
        let _ = writeln!(out, "  Later stages are materialized lazily");
    }

    let _ = writeln!(out, "  Jobs: {}", style(config.jobs.len()).cyan());
    for stage in &config.stages {
        for job in config.jobs.iter().filter(|job| &job.stage == stage) {
            let _ = write!(out, "    {} {} [{}]", style(stage).dim(), job.name, job.when);
            if let Some(description) = &job.description {
                let _ = write!(out, " - {}", style(description).dim());
            }
            let _ = writeln!(out);
        }
    }
    out
}
