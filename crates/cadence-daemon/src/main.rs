use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cadence_core::config::CadenceConfig;
use cadence_crontab::Crontab;
use cadence_scheduler::{
    report_channel, ExecutionOutcome, ExecutionReport, SchedulerEngine, SchedulerRegistry,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod cli;
mod jobs;

use cli::{Cli, Command};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "cadence=info".into()),
        )
        .init();

    match Cli::parse().command {
        Command::Run { config } => run(config.as_deref()).await,
        Command::Next { expression, count, from } => next(&expression, count, from.as_deref()),
        Command::Check { config } => check(config.as_deref()),
    }
}

/// Build a registry holding every job declared in `config`.
fn load_registry(config: &CadenceConfig) -> anyhow::Result<Arc<SchedulerRegistry>> {
    let registry = SchedulerRegistry::from_config(&config.scheduler, jobs::builtin_factories());
    for job in &config.jobs {
        registry
            .register_config(job)
            .with_context(|| format!("failed to register job '{}'", job.id))?;
    }
    Ok(Arc::new(registry))
}

async fn run(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = CadenceConfig::load(config_path)?;
    let registry = load_registry(&config)?;
    info!(jobs = registry.len(), "jobs registered from config");

    let mut changes = registry.subscribe();
    tokio::spawn(async move {
        while let Ok(change) = changes.recv().await {
            debug!(?change, "scheduler change");
        }
    });

    let (reports_tx, mut reports_rx) = report_channel(config.scheduler.report_capacity);
    let engine = SchedulerEngine::new(Arc::clone(&registry))
        .with_reports(reports_tx)
        .start()?;

    let drain = tokio::spawn(async move {
        while let Some(report) = reports_rx.recv().await {
            log_report(&report);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    engine.stop().await;
    // The drain ends once the last in-flight firing has dropped its sender.
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        warn!("jobs still running after shutdown, exiting anyway");
    }
    Ok(())
}

fn log_report(report: &ExecutionReport) {
    let elapsed_ms = report.elapsed.as_millis() as u64;
    match &report.outcome {
        ExecutionOutcome::Succeeded => info!(
            target: "cadence::reports",
            job_id = %report.job_id,
            trigger_id = %report.trigger_id,
            attempts = report.attempts,
            elapsed_ms,
            "job succeeded"
        ),
        ExecutionOutcome::Cancelled => info!(
            target: "cadence::reports",
            job_id = %report.job_id,
            trigger_id = %report.trigger_id,
            attempts = report.attempts,
            elapsed_ms,
            "job cancelled"
        ),
        ExecutionOutcome::Failed { error } => warn!(
            target: "cadence::reports",
            job_id = %report.job_id,
            trigger_id = %report.trigger_id,
            attempts = report.attempts,
            elapsed_ms,
            %error,
            "job failed"
        ),
    }
}

fn next(expression: &str, count: usize, from: Option<&str>) -> anyhow::Result<()> {
    let crontab: Crontab = expression.parse()?;
    let mut cursor = match from {
        Some(text) => DateTime::parse_from_rfc3339(text)
            .with_context(|| format!("invalid --from instant '{text}'"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    println!("{crontab} ({:?})", crontab.format());
    for _ in 0..count {
        let Some(occurrence) = crontab.next_occurrence(cursor) else {
            println!("  (no further occurrences)");
            break;
        };
        println!("  {}", occurrence.to_rfc3339());
        cursor = occurrence;
    }
    Ok(())
}

fn check(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = CadenceConfig::load(config_path)?;
    let registry = load_registry(&config)?;

    for job in registry.snapshot() {
        println!("{} [{}, {}]", job.detail.id, job.detail.kind, job.detail.status);
        for trigger in &job.triggers {
            let next = trigger
                .next_run
                .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
            println!("  {} {} -> {next}", trigger.trigger_id, trigger.schedule);
        }
    }
    println!("config ok: {} job(s)", registry.len());
    Ok(())
}
