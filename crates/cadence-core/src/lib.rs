//! `cadence-core`: ids, configuration and errors shared by every cadence crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CadenceConfig, JobConfig, SchedulerConfig, TriggerConfig};
pub use error::{CadenceError, Result};
pub use types::{ExecutionMode, JobId, StartMode, TriggerId};
