use std::collections::HashSet;

use chrono::{DateTime, Utc};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};
use crate::types::{ExecutionMode, StartMode};

pub const DEFAULT_REPORT_CAPACITY: usize = 256;
pub const DEFAULT_CHANGE_CAPACITY: usize = 64;
pub const DEFAULT_RETRY_TIMEOUT_MS: u64 = 1_000;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Capacity of the execution-report channel drained by the host.
    /// Reports are dropped (with a warning) when the host falls behind.
    #[serde(default = "default_report_capacity")]
    pub report_capacity: usize,
    /// Capacity of the registry change-notification broadcast channel.
    #[serde(default = "default_change_capacity")]
    pub change_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            report_capacity: DEFAULT_REPORT_CAPACITY,
            change_capacity: DEFAULT_CHANGE_CAPACITY,
        }
    }
}

/// A job declared in the config file.
///
/// `kind` selects a job factory registered by the host; `params` is handed
/// to that factory verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub id: String,
    pub kind: String,
    pub description: Option<String>,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub start_mode: StartMode,
    /// Log every firing at info level (debug otherwise).
    #[serde(default = "bool_true")]
    pub log_execution: bool,
    /// Build a fresh job instance for every firing instead of sharing one.
    #[serde(default)]
    pub scoped: bool,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

/// A trigger declared under a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Generated when absent.
    pub id: Option<String>,
    /// Schedule factory tag, e.g. "cron" or "period".
    pub kind: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    pub description: Option<String>,
    /// -1 = unbounded, 0 = never fires, >0 = cap.
    #[serde(default = "unbounded")]
    pub max_runs: i64,
    /// 0 (or negative) = no error cap.
    #[serde(default)]
    pub max_errors: i64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_on_start: bool,
}

fn bool_true() -> bool {
    true
}
fn unbounded() -> i64 {
    -1
}
fn default_retry_timeout_ms() -> u64 {
    DEFAULT_RETRY_TIMEOUT_MS
}
fn default_report_capacity() -> usize {
    DEFAULT_REPORT_CAPACITY
}
fn default_change_capacity() -> usize {
    DEFAULT_CHANGE_CAPACITY
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `CADENCE_SCHEDULER__REPORT_CAPACITY=1024`.
    ///
    /// A missing default file yields the defaults; a missing explicit
    /// `config_path` is an error.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        if let Some(explicit) = config_path {
            std::fs::metadata(explicit)?;
        }
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        let config: CadenceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .map_err(|e| CadenceError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse config from an in-memory TOML document (no env overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: CadenceConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| CadenceError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject duplicate job ids and duplicate trigger ids within a job.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.report_capacity == 0 || self.scheduler.change_capacity == 0 {
            return Err(CadenceError::Config(
                "scheduler channel capacities must be greater than zero".to_string(),
            ));
        }

        let mut job_ids = HashSet::new();
        for job in &self.jobs {
            if !job_ids.insert(job.id.as_str()) {
                return Err(CadenceError::InvalidJob {
                    job: job.id.clone(),
                    reason: "duplicate job id".to_string(),
                });
            }

            let mut trigger_ids = HashSet::new();
            for trigger in &job.triggers {
                if let Some(ref id) = trigger.id {
                    if !trigger_ids.insert(id.as_str()) {
                        return Err(CadenceError::InvalidJob {
                            job: job.id.clone(),
                            reason: format!("duplicate trigger id '{id}'"),
                        });
                    }
                }
                if let (Some(start), Some(end)) = (trigger.start_time, trigger.end_time) {
                    if end < start {
                        return Err(CadenceError::InvalidJob {
                            job: job.id.clone(),
                            reason: "trigger end_time precedes start_time".to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}
