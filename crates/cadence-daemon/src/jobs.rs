//! Job kinds the daemon knows how to build from config.
//!
//! | Kind      | Params                                          |
//! |-----------|-------------------------------------------------|
//! | `log`     | `message`, optional `level` (`info` or `warn`)  |
//! | `command` | `command` (run via `sh -c`), optional `timeout_ms` |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use cadence_scheduler::{Job, JobExecutionContext, JobFactories};
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command as AsyncCommand;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Output kept from a command's stdout/stderr in log lines and errors.
const MAX_OUTPUT_CHARS: usize = 2_000;

pub fn builtin_factories() -> JobFactories {
    let mut factories = JobFactories::new();
    factories
        .register("log", |params: &Value| Ok(Arc::new(LogJob::from_params(params)?) as Arc<dyn Job>))
        .register("command", |params: &Value| {
            Ok(Arc::new(CommandJob::from_params(params)?) as Arc<dyn Job>)
        });
    factories
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogLevel {
    #[default]
    Info,
    Warn,
}

#[derive(Debug, Deserialize)]
pub struct LogJob {
    message: String,
    #[serde(default)]
    level: LogLevel,
}

impl LogJob {
    pub fn from_params(params: &Value) -> anyhow::Result<Self> {
        serde_json::from_value(params.clone()).context("log job expects {\"message\": ...}")
    }
}

#[async_trait]
impl Job for LogJob {
    async fn execute(&self, ctx: &JobExecutionContext, _cancel: &CancellationToken) -> anyhow::Result<()> {
        match self.level {
            LogLevel::Info => info!(job_id = %ctx.job_id, run = ctx.run_number, "{}", self.message),
            LogLevel::Warn => warn!(job_id = %ctx.job_id, run = ctx.run_number, "{}", self.message),
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandJob {
    command: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

impl CommandJob {
    pub fn from_params(params: &Value) -> anyhow::Result<Self> {
        let job: Self = serde_json::from_value(params.clone())
            .context("command job expects {\"command\": ...}")?;
        if job.command.trim().is_empty() {
            bail!("command job has an empty command");
        }
        Ok(job)
    }

    async fn run(&self) -> anyhow::Result<std::process::Output> {
        // kill_on_drop: the child dies with the future on timeout or cancellation.
        let child = AsyncCommand::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn failed: {}", self.command))?;
        Ok(child.wait_with_output().await?)
    }
}

#[async_trait]
impl Job for CommandJob {
    async fn execute(&self, ctx: &JobExecutionContext, cancel: &CancellationToken) -> anyhow::Result<()> {
        debug!(job_id = %ctx.job_id, command = %self.command, "exec");

        let output = match self.timeout_ms {
            Some(ms) => tokio::select! {
                biased;
                _ = cancel.cancelled() => bail!("cancelled"),
                res = tokio::time::timeout(Duration::from_millis(ms), self.run()) => {
                    res.map_err(|_| anyhow::anyhow!("command timed out after {ms} ms"))??
                }
            },
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => bail!("cancelled"),
                res = self.run() => res?,
            },
        };

        let stdout = truncate(&String::from_utf8_lossy(&output.stdout));
        if !output.status.success() {
            let stderr = truncate(&String::from_utf8_lossy(&output.stderr));
            bail!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                if stderr.is_empty() { stdout } else { stderr }
            );
        }
        if !stdout.is_empty() {
            info!(job_id = %ctx.job_id, "{stdout}");
        }
        Ok(())
    }
}

fn truncate(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((cut, _)) => format!("{}... [truncated]", &text[..cut]),
        None => text.to_string(),
    }
}
