use cadence_core::{JobId, TriggerId};
use cadence_crontab::CrontabError;
use thiserror::Error;

/// Errors surfaced synchronously by registration and management calls.
///
/// Job bodies never produce a `SchedulerError`; their failures travel on the
/// execution-report channel instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The calendar expression did not parse.
    #[error("Invalid expression: {0}")]
    Expression(#[from] CrontabError),

    /// The schedule definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No schedule factory is registered under this kind tag.
    #[error("Unknown schedule kind: {0}")]
    UnknownScheduleKind(String),

    /// No job factory is registered under this kind tag.
    #[error("Unknown job kind: {0}")]
    UnknownJobKind(String),

    /// The job factory refused its parameters.
    #[error("Invalid job ({id}): {reason}")]
    InvalidJob { id: JobId, reason: String },

    #[error("Job already registered: {id}")]
    DuplicateJob { id: JobId },

    #[error("Trigger {trigger} already registered on job {job}")]
    DuplicateTrigger { job: JobId, trigger: TriggerId },

    /// No job with the given ID exists in the registry.
    #[error("Job not found: {id}")]
    JobNotFound { id: JobId },

    #[error("Trigger {trigger} not found on job {job}")]
    TriggerNotFound { job: JobId, trigger: TriggerId },

    /// The schedule store failed to load or save.
    #[error("Store error: {0}")]
    Store(String),

    /// A second engine tried to drive a registry that already has one.
    #[error("An engine is already running for this registry")]
    EngineAlreadyRunning,
}

impl SchedulerError {
    /// Short machine-readable code, used as a structured log field.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Expression(e) if e.is_calendar_impossibility() => "IMPOSSIBLE_DATE",
            SchedulerError::Expression(_) => "EXPRESSION_SYNTAX",
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::UnknownScheduleKind(_) => "UNKNOWN_SCHEDULE_KIND",
            SchedulerError::UnknownJobKind(_) => "UNKNOWN_JOB_KIND",
            SchedulerError::InvalidJob { .. } => "INVALID_JOB",
            SchedulerError::DuplicateJob { .. } => "DUPLICATE_JOB",
            SchedulerError::DuplicateTrigger { .. } => "DUPLICATE_TRIGGER",
            SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            SchedulerError::TriggerNotFound { .. } => "TRIGGER_NOT_FOUND",
            SchedulerError::Store(_) => "STORE_ERROR",
            SchedulerError::EngineAlreadyRunning => "ENGINE_RUNNING",
        }
    }

    /// Registration conflicts reject the whole registration.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SchedulerError::DuplicateJob { .. } | SchedulerError::DuplicateTrigger { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
