//! `cadence-scheduler`: in-memory recurring-job scheduler on Tokio.
//!
//! # Overview
//!
//! Jobs are registered with a [`SchedulerRegistry`] together with their
//! triggers. A [`SchedulerEngine`] drives the registry: every cycle it
//! advances the due triggers, spawns one task per firing and sleeps until
//! the next run or until the registry signals a change.
//!
//! # Trigger kinds
//!
//! | Kind     | Args                          | Behaviour                          |
//! |----------|-------------------------------|------------------------------------|
//! | `cron`   | `[expression]` or `[expression, format]` | Calendar expression, UTC |
//! | `period` | `[milliseconds]`              | Fixed interval (at least 100 ms)   |
//!
//! Hosts add kinds through [`ScheduleFactories::register`].
//!
//! # Failures
//!
//! Registration errors are returned to the caller. Job failures are
//! retried per trigger, counted against the trigger's error cap and
//! reported through the [`ExecutionReport`] channel; they never reach
//! the loop.

pub mod engine;
pub mod error;
pub mod hooks;
pub mod job;
pub mod lamp;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod trigger;
pub mod types;

pub use engine::{report_channel, EngineHandle, ExecutionOutcome, ExecutionReport, SchedulerEngine};
pub use error::{Result, SchedulerError};
pub use hooks::{Execution, JobExecutor, JobMonitor, RetryingExecutor};
pub use job::{job_fn, Job, JobExecutionContext, JobFactories, JobSource, PropertyBag};
pub use registry::{RegistryBuilder, SchedulerChange, SchedulerRegistry};
pub use schedule::{CronSchedule, PeriodSchedule, ScheduleFactories, TriggerSchedule};
pub use scheduler::{JobBuilder, Scheduler, SchedulerSnapshot};
pub use store::{MemoryStore, ScheduleStore};
pub use trigger::{RetryPolicy, Trigger, TriggerBuilder, TriggerSnapshot, TriggerState};
pub use types::{JobDetail, JobOptions, JobStatus};
