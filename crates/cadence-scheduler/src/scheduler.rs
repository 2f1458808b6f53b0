use std::collections::BTreeMap;

use cadence_core::{ExecutionMode, JobConfig, JobId, StartMode, TriggerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::job::JobHandle;
use crate::schedule::ScheduleFactories;
use crate::trigger::{Trigger, TriggerBuilder, TriggerSnapshot};
use crate::types::{JobDetail, JobOptions, JobStatus};

/// Accumulates a job's settings and triggers for registration.
#[derive(Debug, Clone, Default)]
pub struct JobBuilder {
    options: JobOptions,
    triggers: Vec<TriggerBuilder>,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings and triggers of a job declared in the config file.
    pub fn from_config(config: &JobConfig) -> Self {
        Self {
            options: JobOptions::from(config),
            triggers: config.triggers.iter().map(TriggerBuilder::from_config).collect(),
        }
    }

    pub fn description(self, description: impl Into<String>) -> Self {
        let options = JobOptions { description: Some(description.into()), ..self.options };
        Self { options, ..self }
    }

    pub fn mode(self, mode: ExecutionMode) -> Self {
        Self { options: JobOptions { mode, ..self.options }, ..self }
    }

    pub fn serial(self) -> Self {
        self.mode(ExecutionMode::Serial)
    }

    pub fn start_mode(self, start_mode: StartMode) -> Self {
        Self { options: JobOptions { start_mode, ..self.options }, ..self }
    }

    pub fn log_execution(self, log_execution: bool) -> Self {
        Self { options: JobOptions { log_execution, ..self.options }, ..self }
    }

    /// Build a fresh instance for every firing. Only meaningful for jobs
    /// registered by kind.
    pub fn scoped(self, scoped: bool) -> Self {
        Self { options: JobOptions { scoped, ..self.options }, ..self }
    }

    pub fn trigger(mut self, trigger: TriggerBuilder) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub(crate) fn into_parts(self) -> (JobOptions, Vec<TriggerBuilder>) {
        (self.options, self.triggers)
    }
}

/// One job record bound to its triggers.
pub struct Scheduler {
    detail: JobDetail,
    triggers: BTreeMap<TriggerId, Trigger>,
    handle: JobHandle,
    /// Firings dispatched and not yet completed.
    in_flight: u32,
}

impl Scheduler {
    /// Build every trigger up front so a bad trigger rejects the whole job.
    pub(crate) fn build(
        detail: JobDetail,
        handle: JobHandle,
        triggers: Vec<TriggerBuilder>,
        factories: &ScheduleFactories,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut scheduler = Self { detail, triggers: BTreeMap::new(), handle, in_flight: 0 };
        for builder in triggers {
            let trigger = builder.build(factories, &scheduler.detail.id, now)?;
            scheduler.insert_trigger(trigger)?;
        }
        Ok(scheduler)
    }

    pub fn id(&self) -> &JobId {
        &self.detail.id
    }

    pub fn detail(&self) -> &JobDetail {
        &self.detail
    }

    pub fn status(&self) -> JobStatus {
        self.detail.status
    }

    pub fn triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.values()
    }

    pub fn trigger(&self, id: &TriggerId) -> Option<&Trigger> {
        self.triggers.get(id)
    }

    pub(crate) fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub(crate) fn trigger_mut(&mut self, id: &TriggerId) -> Result<&mut Trigger> {
        let job = self.detail.id.clone();
        self.triggers
            .get_mut(id)
            .ok_or_else(|| SchedulerError::TriggerNotFound { job, trigger: id.clone() })
    }

    pub(crate) fn insert_trigger(&mut self, trigger: Trigger) -> Result<()> {
        if self.triggers.contains_key(trigger.id()) {
            return Err(SchedulerError::DuplicateTrigger {
                job: self.detail.id.clone(),
                trigger: trigger.id().clone(),
            });
        }
        self.triggers.insert(trigger.id().clone(), trigger);
        Ok(())
    }

    pub(crate) fn add_trigger(
        &mut self,
        builder: TriggerBuilder,
        factories: &ScheduleFactories,
        now: DateTime<Utc>,
    ) -> Result<TriggerId> {
        if let Some(id) = builder.trigger_id() {
            if self.triggers.contains_key(id) {
                return Err(SchedulerError::DuplicateTrigger {
                    job: self.detail.id.clone(),
                    trigger: id.clone(),
                });
            }
        }
        let trigger = builder.build(factories, &self.detail.id, now)?;
        let id = trigger.id().clone();
        self.insert_trigger(trigger)?;
        Ok(id)
    }

    pub(crate) fn remove_trigger(&mut self, id: &TriggerId) -> Result<Trigger> {
        let job = self.detail.id.clone();
        self.triggers
            .remove(id)
            .ok_or_else(|| SchedulerError::TriggerNotFound { job, trigger: id.clone() })
    }

    /// Replace a trigger's definition, keeping its run and error counters.
    pub(crate) fn update_trigger(
        &mut self,
        id: &TriggerId,
        builder: TriggerBuilder,
        factories: &ScheduleFactories,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let job = self.detail.id.clone();
        let previous = self.triggers.get(id).ok_or_else(|| SchedulerError::TriggerNotFound {
            job: job.clone(),
            trigger: id.clone(),
        })?;
        let mut replacement = builder.id(id.clone()).build(factories, &job, now)?;
        replacement.inherit(previous);
        self.triggers.insert(id.clone(), replacement);
        Ok(())
    }

    /// Adopt new settings from `detail`. Identity and status are kept.
    pub(crate) fn update_detail(&mut self, detail: JobDetail) {
        let JobDetail { description, mode, log_execution, .. } = detail;
        self.detail.description = description;
        self.detail.mode = mode;
        self.detail.log_execution = log_execution;
    }

    /// Move to `Normal`, or to `Blocked` when a serial firing is still
    /// running. Returns false when already started.
    pub(crate) fn start(&mut self) -> bool {
        match self.detail.status {
            JobStatus::Paused | JobStatus::Inactive => {
                self.detail.status = if self.is_busy() {
                    JobStatus::Blocked
                } else {
                    JobStatus::Normal
                };
                true
            }
            JobStatus::Normal | JobStatus::Blocked => false,
        }
    }

    /// Move to `Paused`. Returns false when already paused.
    pub(crate) fn pause(&mut self) -> bool {
        if self.detail.status == JobStatus::Paused {
            return false;
        }
        self.detail.status = JobStatus::Paused;
        true
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    /// A serial job with a firing still running.
    fn is_busy(&self) -> bool {
        self.detail.is_serial() && self.in_flight > 0
    }

    /// True when the loop may dispatch this job now.
    pub(crate) fn is_dispatchable(&self) -> bool {
        self.detail.status.is_effective() && !self.is_busy()
    }

    /// Count one dispatched firing; a serial job is `Blocked` until it ends.
    pub(crate) fn begin_firing(&mut self) {
        self.in_flight += 1;
        if self.is_busy() && self.detail.status == JobStatus::Normal {
            self.detail.status = JobStatus::Blocked;
        }
    }

    /// Count one finished firing. Unblocks once nothing is running.
    pub(crate) fn finish_firing(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if !self.is_busy() && self.detail.status == JobStatus::Blocked {
            self.detail.status = JobStatus::Normal;
        }
    }

    /// Earliest `next_run` across triggers that can still fire.
    pub fn next_occurrence(&self) -> Option<DateTime<Utc>> {
        self.triggers.values().filter_map(Trigger::upcoming).min()
    }

    /// Triggers due at `now`, earliest first.
    pub(crate) fn due_triggers(&self, now: DateTime<Utc>) -> Vec<TriggerId> {
        let mut due: Vec<&Trigger> = self.triggers.values().filter(|t| t.should_run(now)).collect();
        due.sort_by_key(|t| t.next_run());
        due.into_iter().map(|t| t.id().clone()).collect()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            detail: self.detail.clone(),
            triggers: self.triggers.values().map(Trigger::snapshot).collect(),
            next_occurrence: self.next_occurrence(),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("detail", &self.detail)
            .field("triggers", &self.triggers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Serializable view of one job and its triggers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub detail: JobDetail,
    pub triggers: Vec<TriggerSnapshot>,
    pub next_occurrence: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::job_fn;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn scheduler(builder: JobBuilder) -> Result<Scheduler> {
        let (options, triggers) = builder.into_parts();
        let detail = JobDetail::new(JobId::from("job"), "instance".to_string(), &options);
        let handle = JobHandle::Shared(job_fn(|_, _| async { Ok(()) }));
        Scheduler::build(detail, handle, triggers, &ScheduleFactories::default(), t0())
    }

    #[test]
    fn next_occurrence_is_minimum_over_triggers() {
        let s = scheduler(
            JobBuilder::new()
                .trigger(TriggerBuilder::cron("0 * * * *").id("hourly"))
                .trigger(TriggerBuilder::cron("*/5 * * * *").id("five")),
        )
        .unwrap();
        assert_eq!(s.next_occurrence(), Some(t0() + Duration::minutes(5)));
    }

    #[test]
    fn duplicate_trigger_ids_reject_the_job() {
        let err = scheduler(
            JobBuilder::new()
                .trigger(TriggerBuilder::cron("0 * * * *").id("t"))
                .trigger(TriggerBuilder::cron("*/5 * * * *").id("t")),
        )
        .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn bad_trigger_rejects_the_job() {
        let err = scheduler(JobBuilder::new().trigger(TriggerBuilder::cron("0 0 31 2 *")))
            .unwrap_err();
        assert_eq!(err.code(), "IMPOSSIBLE_DATE");
    }

    #[test]
    fn add_remove_and_update_triggers() {
        let factories = ScheduleFactories::default();
        let mut s = scheduler(JobBuilder::new()).unwrap();
        assert_eq!(s.next_occurrence(), None);

        let id = s.add_trigger(TriggerBuilder::cron("0 * * * *"), &factories, t0()).unwrap();
        assert!(s
            .add_trigger(TriggerBuilder::cron("0 * * * *").id(id.clone()), &factories, t0())
            .is_err());

        let due = s.next_occurrence().unwrap();
        s.trigger_mut(&id).unwrap().advance(due);
        s.update_trigger(&id, TriggerBuilder::cron("*/10 * * * *"), &factories, due)
            .unwrap();
        let updated = s.trigger(&id).unwrap();
        assert_eq!(updated.runs(), 1);
        assert_eq!(updated.next_run(), Some(due + Duration::minutes(10)));

        s.remove_trigger(&id).unwrap();
        assert!(matches!(
            s.remove_trigger(&id),
            Err(SchedulerError::TriggerNotFound { .. })
        ));
    }

    #[test]
    fn start_and_pause_transitions() {
        let mut s = scheduler(JobBuilder::new().start_mode(StartMode::Deferred)).unwrap();
        assert_eq!(s.status(), JobStatus::Inactive);
        assert!(s.start());
        assert!(!s.start());
        assert!(s.pause());
        assert!(!s.pause());
        assert!(s.start());
        assert_eq!(s.status(), JobStatus::Normal);
    }

    #[test]
    fn update_detail_keeps_identity_and_status() {
        let mut s = scheduler(JobBuilder::new().description("old")).unwrap();
        s.pause();
        let mut detail = s.detail().clone();
        detail.id = JobId::from("other");
        detail.status = JobStatus::Normal;
        detail.description = Some("new".to_string());
        detail.mode = ExecutionMode::Serial;
        s.update_detail(detail);

        assert_eq!(s.id().as_str(), "job");
        assert_eq!(s.status(), JobStatus::Paused);
        assert_eq!(s.detail().description.as_deref(), Some("new"));
        assert!(s.detail().is_serial());
    }

    #[test]
    fn due_triggers_sorted_by_next_run() {
        let s = scheduler(
            JobBuilder::new()
                .trigger(TriggerBuilder::cron("*/5 * * * *").id("b"))
                .trigger(TriggerBuilder::cron("*/2 * * * *").id("a"))
                .trigger(TriggerBuilder::cron("0 0 * * *").id("c")),
        )
        .unwrap();
        let due = s.due_triggers(t0() + Duration::minutes(5));
        assert_eq!(due, vec![TriggerId::from("a"), TriggerId::from("b")]);
    }
}
