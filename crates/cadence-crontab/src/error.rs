use thiserror::Error;

use crate::field::CrontabField;
use crate::format::CronFormat;

/// Errors raised while parsing or evaluating a crontab expression.
///
/// Everything except `UnsupportedOperation` is a syntax error surfaced at
/// parse time; evaluation itself never fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrontabError {
    #[error("empty crontab expression")]
    Empty,

    #[error("expected {expected} fields for the {format} format, found {found}")]
    FieldCount {
        format: CronFormat,
        expected: usize,
        found: usize,
    },

    #[error("unknown crontab macro '{0}'")]
    UnknownMacro(String),

    #[error("macro '{name}' expands to a {actual} expression, not {format}")]
    MacroFormat {
        name: String,
        format: CronFormat,
        actual: CronFormat,
    },

    #[error("invalid {field} token '{token}': {reason}")]
    InvalidToken {
        field: CrontabField,
        token: String,
        reason: String,
    },

    #[error("{field} value {value} is out of range {min}-{max}")]
    OutOfRange {
        field: CrontabField,
        value: i64,
        min: i32,
        max: i32,
    },

    #[error("unknown {field} name '{name}'")]
    UnknownName { field: CrontabField, name: String },

    #[error("ambiguous {field} name '{name}' (matches {candidates})")]
    AmbiguousName {
        field: CrontabField,
        name: String,
        candidates: String,
    },

    #[error("'{token}' is not supported on the {field} field")]
    UnsupportedToken { field: CrontabField, token: String },

    #[error("the {field} field has more than {max} alternatives")]
    TooManyAlternatives { field: CrontabField, max: usize },

    /// A day pinned to months that are never long enough, e.g. February 30.
    #[error("day {day} never occurs in month(s) {months}")]
    ImpossibleDate { day: u32, months: String },

    #[error("{operation} is not supported for the {field} field")]
    UnsupportedOperation {
        field: CrontabField,
        operation: &'static str,
    },
}

impl CrontabError {
    pub fn is_syntax_error(&self) -> bool {
        !matches!(self, CrontabError::UnsupportedOperation { .. })
    }

    pub fn is_calendar_impossibility(&self) -> bool {
        matches!(self, CrontabError::ImpossibleDate { .. })
    }
}

pub type Result<T> = std::result::Result<T, CrontabError>;
