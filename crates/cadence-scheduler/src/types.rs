use cadence_core::{ExecutionMode, JobConfig, JobId, StartMode};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible for dispatch.
    Normal,
    /// Stopped by the host; triggers keep their state but nothing fires.
    Paused,
    /// A serial job with a firing in flight.
    Blocked,
    /// Registered with a deferred start and not started yet.
    Inactive,
}

impl JobStatus {
    /// Whether the scheduling loop may select this job's triggers.
    pub fn is_effective(self) -> bool {
        self == JobStatus::Normal
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Normal => "normal",
            JobStatus::Paused => "paused",
            JobStatus::Blocked => "blocked",
            JobStatus::Inactive => "inactive",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "normal" => Ok(JobStatus::Normal),
            "paused" => Ok(JobStatus::Paused),
            "blocked" => Ok(JobStatus::Blocked),
            "inactive" => Ok(JobStatus::Inactive),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// The job record owned by a [`Scheduler`](crate::scheduler::Scheduler).
///
/// Only `status` changes after registration, and only through the
/// registry's start/pause calls or the loop's serial blocking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetail {
    pub id: JobId,
    /// Factory tag the job was built from, or `"instance"` for a supplied job.
    pub kind: String,
    pub description: Option<String>,
    pub status: JobStatus,
    pub mode: ExecutionMode,
    pub start_mode: StartMode,
    /// Log every firing at info level (debug otherwise).
    pub log_execution: bool,
    /// A fresh job instance is built for every firing.
    pub scoped: bool,
}

impl JobDetail {
    pub(crate) fn new(id: JobId, kind: String, builder: &JobOptions) -> Self {
        let status = match builder.start_mode {
            StartMode::Immediate => JobStatus::Normal,
            StartMode::Deferred => JobStatus::Inactive,
        };
        Self {
            id,
            kind,
            description: builder.description.clone(),
            status,
            mode: builder.mode,
            start_mode: builder.start_mode,
            log_execution: builder.log_execution,
            scoped: builder.scoped,
        }
    }

    pub fn is_serial(&self) -> bool {
        self.mode == ExecutionMode::Serial
    }
}

/// Plain job settings accumulated by a [`JobBuilder`](crate::scheduler::JobBuilder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    pub description: Option<String>,
    pub mode: ExecutionMode,
    pub start_mode: StartMode,
    pub log_execution: bool,
    pub scoped: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            description: None,
            mode: ExecutionMode::Parallel,
            start_mode: StartMode::Immediate,
            log_execution: true,
            scoped: false,
        }
    }
}

impl From<&JobConfig> for JobOptions {
    fn from(config: &JobConfig) -> Self {
        Self {
            description: config.description.clone(),
            mode: config.mode,
            start_mode: config.start_mode,
            log_execution: config.log_execution,
            scoped: config.scoped,
        }
    }
}
