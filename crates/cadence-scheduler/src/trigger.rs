use std::sync::Arc;
use std::time::Duration;

use cadence_core::{JobId, TriggerConfig, TriggerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SchedulerError};
use crate::schedule::{ScheduleFactories, TriggerSchedule};

/// `max_runs` value meaning "no cap".
pub const UNBOUNDED: i64 = -1;

/// How a failed firing is retried within the same occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retries: u32,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            timeout: Duration::from_millis(cadence_core::config::DEFAULT_RETRY_TIMEOUT_MS),
        }
    }
}

/// Where a trigger is in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    Scheduled,
    Due,
    Exhausted,
}

/// Scheduling state for one trigger of one job.
///
/// Counters and run times are mutated only by the scheduling loop
/// (`advance`) and by the failure path (`record_error`).
#[derive(Debug, Clone)]
pub struct Trigger {
    id: TriggerId,
    job_id: JobId,
    kind: String,
    args: Vec<Value>,
    description: Option<String>,
    schedule: Arc<dyn TriggerSchedule>,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    runs: i64,
    max_runs: i64,
    errors: i64,
    max_errors: i64,
    retry: RetryPolicy,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    run_on_start: bool,
    paused: bool,
}

impl Trigger {
    pub fn id(&self) -> &TriggerId {
        &self.id
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn schedule(&self) -> &Arc<dyn TriggerSchedule> {
        &self.schedule
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    /// `None` once the trigger is exhausted.
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run
    }

    pub fn runs(&self) -> i64 {
        self.runs
    }

    pub fn max_runs(&self) -> i64 {
        self.max_runs
    }

    pub fn errors(&self) -> i64 {
        self.errors
    }

    pub fn max_errors(&self) -> i64 {
        self.max_errors
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn runs_on_start(&self) -> bool {
        self.run_on_start
    }

    pub fn state(&self, now: DateTime<Utc>) -> TriggerState {
        if self.max_runs == 0 {
            return TriggerState::Exhausted;
        }
        match self.next_run {
            None => TriggerState::Exhausted,
            Some(next) if next <= now => TriggerState::Due,
            Some(_) => TriggerState::Scheduled,
        }
    }

    /// True when the trigger is due at `now` and allowed to fire.
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        !self.paused && self.max_runs != 0 && self.state(now) == TriggerState::Due
    }

    /// The next instant the loop needs to wake for, ignoring triggers that
    /// cannot fire.
    pub fn upcoming(&self) -> Option<DateTime<Utc>> {
        if self.paused || self.max_runs == 0 {
            return None;
        }
        self.next_run
    }

    /// Count one dispatch at `reference` and move `next_run` forward.
    ///
    /// Occurrences missed while the loop was busy are skipped, not replayed.
    /// Returns the occurrence being dispatched.
    pub fn advance(&mut self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let occurrence = self.next_run;
        if self.max_runs == 0 {
            self.next_run = None;
            return None;
        }

        self.runs += 1;
        self.last_run = Some(reference);

        self.next_run = if self.max_runs > 0 && self.runs >= self.max_runs {
            None
        } else {
            let next = match occurrence {
                Some(previous) => self.schedule.next_skipping(previous, reference),
                None => self.schedule.next_after(reference),
            };
            self.bounded(next)
        };
        if self.error_cap_reached() {
            self.next_run = None;
        }
        occurrence
    }

    /// Count a failed firing. Returns true when this exhausted the trigger.
    pub fn record_error(&mut self) -> bool {
        self.errors += 1;
        if self.error_cap_reached() && self.next_run.is_some() {
            self.next_run = None;
            return true;
        }
        false
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn snapshot(&self) -> TriggerSnapshot {
        TriggerSnapshot {
            trigger_id: self.id.clone(),
            job_id: self.job_id.clone(),
            kind: self.kind.clone(),
            schedule: self.schedule.describe(),
            description: self.description.clone(),
            last_run: self.last_run,
            next_run: self.next_run,
            runs: self.runs,
            max_runs: self.max_runs,
            errors: self.errors,
            max_errors: self.max_errors,
            paused: self.paused,
        }
    }

    /// Carry counters and run times over from a saved snapshot.
    pub fn restore(&mut self, snapshot: &TriggerSnapshot) {
        self.last_run = snapshot.last_run;
        self.runs = snapshot.runs;
        self.errors = snapshot.errors;
        self.paused = snapshot.paused;
        self.next_run = if self.max_runs > 0 && self.runs >= self.max_runs {
            None
        } else {
            snapshot.next_run.and_then(|next| self.bounded(Some(next)))
        };
        if self.error_cap_reached() {
            self.next_run = None;
        }
    }

    /// Keep the counters of `previous` while adopting this trigger's definition.
    pub(crate) fn inherit(&mut self, previous: &Trigger) {
        self.last_run = previous.last_run;
        self.runs = previous.runs;
        self.errors = previous.errors;
        self.paused = previous.paused;
        if (self.max_runs > 0 && self.runs >= self.max_runs) || self.error_cap_reached() {
            self.next_run = None;
        }
    }

    fn error_cap_reached(&self) -> bool {
        self.max_errors > 0 && self.errors >= self.max_errors
    }

    fn bounded(&self, next: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match (next, self.end_time) {
            (Some(next), Some(end)) if next > end => None,
            (next, _) => next,
        }
    }
}

/// Serializable view of a trigger's state, used by stores and status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSnapshot {
    pub trigger_id: TriggerId,
    pub job_id: JobId,
    pub kind: String,
    pub schedule: String,
    pub description: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub runs: i64,
    pub max_runs: i64,
    pub errors: i64,
    pub max_errors: i64,
    pub paused: bool,
}

/// Accumulates a trigger definition; [`build`](Self::build) produces the trigger.
#[derive(Debug, Clone)]
pub struct TriggerBuilder {
    id: Option<TriggerId>,
    kind: String,
    args: Vec<Value>,
    description: Option<String>,
    max_runs: i64,
    max_errors: i64,
    retry: RetryPolicy,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    run_on_start: bool,
}

impl TriggerBuilder {
    /// A trigger built by the schedule factory registered under `kind`.
    pub fn new(kind: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            args,
            description: None,
            max_runs: UNBOUNDED,
            max_errors: 0,
            retry: RetryPolicy::default(),
            start_time: None,
            end_time: None,
            run_on_start: false,
        }
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Self::new("cron", vec![Value::String(expression.into())])
    }

    pub fn period(every: Duration) -> Self {
        let ms = u64::try_from(every.as_millis()).unwrap_or(u64::MAX);
        Self::new("period", vec![Value::from(ms)])
    }

    pub fn from_config(config: &TriggerConfig) -> Self {
        let mut builder = Self::new(config.kind.clone(), config.args.clone())
            .max_runs(config.max_runs)
            .max_errors(config.max_errors)
            .retries(config.retries, Duration::from_millis(config.retry_timeout_ms))
            .run_on_start(config.run_on_start);
        builder.id = config.id.clone().map(TriggerId::from);
        builder.description = config.description.clone();
        builder.start_time = config.start_time;
        builder.end_time = config.end_time;
        builder
    }

    pub fn id(self, id: impl Into<TriggerId>) -> Self {
        Self { id: Some(id.into()), ..self }
    }

    pub fn description(self, description: impl Into<String>) -> Self {
        Self { description: Some(description.into()), ..self }
    }

    /// -1 = unbounded, 0 = never fires, >0 = cap.
    pub fn max_runs(self, max_runs: i64) -> Self {
        Self { max_runs, ..self }
    }

    /// 0 or negative = no cap.
    pub fn max_errors(self, max_errors: i64) -> Self {
        Self { max_errors, ..self }
    }

    pub fn retries(self, retries: u32, timeout: Duration) -> Self {
        Self { retry: RetryPolicy { retries, timeout }, ..self }
    }

    pub fn start_at(self, start: DateTime<Utc>) -> Self {
        Self { start_time: Some(start), ..self }
    }

    pub fn end_at(self, end: DateTime<Utc>) -> Self {
        Self { end_time: Some(end), ..self }
    }

    /// Fire at registration (or at the start time) instead of waiting for
    /// the first scheduled occurrence.
    pub fn run_on_start(self, run_on_start: bool) -> Self {
        Self { run_on_start, ..self }
    }

    pub fn trigger_id(&self) -> Option<&TriggerId> {
        self.id.as_ref()
    }

    /// Resolve the schedule and seed `next_run` relative to `now`.
    pub fn build(
        self,
        factories: &ScheduleFactories,
        job_id: &JobId,
        now: DateTime<Utc>,
    ) -> Result<Trigger> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end < start {
                return Err(SchedulerError::InvalidSchedule(
                    "trigger end_time precedes start_time".to_string(),
                ));
            }
        }
        let schedule = factories.build(&self.kind, &self.args)?;

        let anchor = self.start_time.map_or(now, |start| start.max(now));
        let first = if self.run_on_start {
            Some(anchor)
        } else {
            schedule.next_after(anchor)
        };

        let mut trigger = Trigger {
            id: self.id.unwrap_or_default(),
            job_id: job_id.clone(),
            kind: self.kind,
            args: self.args,
            description: self.description,
            schedule,
            last_run: None,
            next_run: None,
            runs: 0,
            max_runs: self.max_runs,
            errors: 0,
            max_errors: self.max_errors,
            retry: self.retry,
            start_time: self.start_time,
            end_time: self.end_time,
            run_on_start: self.run_on_start,
            paused: false,
        };
        trigger.next_run = trigger.bounded(first);
        Ok(trigger)
    }
}
