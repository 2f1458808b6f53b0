use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cadence_core::{JobConfig, JobId, SchedulerConfig, TriggerId};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{Result, SchedulerError};
use crate::job::{JobFactories, JobHandle, JobSource};
use crate::lamp::{signal_lamp, LampReceiver, SignalLamp};
use crate::schedule::ScheduleFactories;
use crate::scheduler::{JobBuilder, Scheduler, SchedulerSnapshot};
use crate::store::ScheduleStore;
use crate::trigger::{RetryPolicy, TriggerBuilder, TriggerSnapshot};
use crate::types::JobDetail;

/// A registry mutation, fanned out to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerChange {
    JobAdded { job_id: JobId },
    JobRemoved { job_id: JobId },
    JobUpdated { job_id: JobId },
    JobStarted { job_id: JobId },
    JobPaused { job_id: JobId },
    TriggerAdded { job_id: JobId, trigger_id: TriggerId },
    TriggerRemoved { job_id: JobId, trigger_id: TriggerId },
    TriggerUpdated { job_id: JobId, trigger_id: TriggerId },
}

/// One due trigger selected by the loop, with everything the execution
/// unit needs so it never has to touch the registry while running.
#[derive(Clone)]
pub(crate) struct Dispatch {
    pub job_id: JobId,
    pub trigger_id: TriggerId,
    pub occurrence: DateTime<Utc>,
    pub run_number: i64,
    pub handle: JobHandle,
    pub retry: RetryPolicy,
    pub log_execution: bool,
}

/// Builds a [`SchedulerRegistry`].
pub struct RegistryBuilder {
    change_capacity: usize,
    job_factories: JobFactories,
    schedule_factories: ScheduleFactories,
    store: Option<Arc<dyn ScheduleStore>>,
}

impl RegistryBuilder {
    pub fn change_capacity(self, change_capacity: usize) -> Self {
        Self { change_capacity: change_capacity.max(1), ..self }
    }

    pub fn job_factories(self, job_factories: JobFactories) -> Self {
        Self { job_factories, ..self }
    }

    pub fn schedule_factories(self, schedule_factories: ScheduleFactories) -> Self {
        Self { schedule_factories, ..self }
    }

    pub fn store(self, store: Arc<dyn ScheduleStore>) -> Self {
        Self { store: Some(store), ..self }
    }

    pub fn build(self) -> SchedulerRegistry {
        let (lamp, lamp_rx) = signal_lamp();
        let (changes, _) = broadcast::channel(self.change_capacity);
        SchedulerRegistry {
            schedulers: DashMap::new(),
            job_factories: self.job_factories,
            schedule_factories: self.schedule_factories,
            store: self.store,
            lamp,
            lamp_rx: Mutex::new(Some(lamp_rx)),
            changes,
        }
    }
}

/// All registered jobs, keyed by id.
///
/// Safe to share behind an `Arc` between the scheduling loop and any
/// number of callers. Every mutation wakes the loop.
pub struct SchedulerRegistry {
    schedulers: DashMap<JobId, Scheduler>,
    job_factories: JobFactories,
    schedule_factories: ScheduleFactories,
    store: Option<Arc<dyn ScheduleStore>>,
    lamp: SignalLamp,
    lamp_rx: Mutex<Option<LampReceiver>>,
    changes: broadcast::Sender<SchedulerChange>,
}

impl SchedulerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            change_capacity: cadence_core::config::DEFAULT_CHANGE_CAPACITY,
            job_factories: JobFactories::new(),
            schedule_factories: ScheduleFactories::default(),
            store: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn from_config(config: &SchedulerConfig, job_factories: JobFactories) -> Self {
        Self::builder()
            .change_capacity(config.change_capacity)
            .job_factories(job_factories)
            .build()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerChange> {
        self.changes.subscribe()
    }

    /// Register a job and its triggers. Nothing is registered on error.
    pub fn add_job(
        &self,
        id: impl Into<JobId>,
        source: JobSource,
        configure: impl FnOnce(JobBuilder) -> JobBuilder,
    ) -> Result<JobId> {
        let id = id.into();
        if self.schedulers.contains_key(&id) {
            return Err(SchedulerError::DuplicateJob { id });
        }
        self.add_job_with(id, source, configure(JobBuilder::new()))
    }

    /// Register a job declared in the config file.
    pub fn register_config(&self, config: &JobConfig) -> Result<JobId> {
        self.add_job_with(
            JobId::from(config.id.as_str()),
            JobSource::kind(config.kind.clone(), config.params.clone()),
            JobBuilder::from_config(config),
        )
    }

    fn add_job_with(&self, id: JobId, source: JobSource, builder: JobBuilder) -> Result<JobId> {
        let (options, triggers) = builder.into_parts();

        let (kind, handle) = match source {
            JobSource::Instance(job) => ("instance".to_string(), JobHandle::Shared(job)),
            JobSource::Kind { kind, params } => {
                let factory = self.job_factories.get(&kind)?;
                let instance = factory(&params).map_err(|e| SchedulerError::InvalidJob {
                    id: id.clone(),
                    reason: format!("{e:#}"),
                })?;
                let handle = if options.scoped {
                    JobHandle::Scoped { factory, params }
                } else {
                    JobHandle::Shared(instance)
                };
                (kind, handle)
            }
        };

        let detail = JobDetail::new(id.clone(), kind, &options);
        let mut scheduler =
            Scheduler::build(detail, handle, triggers, &self.schedule_factories, Utc::now())?;
        self.restore_triggers(&mut scheduler);

        let trigger_count = scheduler.triggers().count();
        match self.schedulers.entry(id.clone()) {
            Entry::Occupied(_) => return Err(SchedulerError::DuplicateJob { id }),
            Entry::Vacant(slot) => {
                slot.insert(scheduler);
            }
        }

        info!(job_id = %id, triggers = trigger_count, "job registered");
        self.notify(SchedulerChange::JobAdded { job_id: id.clone() });
        Ok(id)
    }

    pub fn remove_job(&self, id: &JobId) -> Result<()> {
        if self.schedulers.remove(id).is_none() {
            return Err(SchedulerError::JobNotFound { id: id.clone() });
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(id, None) {
                warn!(job_id = %id, code = e.code(), "store remove failed: {e}");
            }
        }
        info!(job_id = %id, "job removed");
        self.notify(SchedulerChange::JobRemoved { job_id: id.clone() });
        Ok(())
    }

    pub fn add_trigger(&self, job_id: &JobId, builder: TriggerBuilder) -> Result<TriggerId> {
        let trigger_id = {
            let mut scheduler = self.scheduler_mut(job_id)?;
            let trigger_id =
                scheduler.add_trigger(builder, &self.schedule_factories, Utc::now())?;
            if let Ok(trigger) = scheduler.trigger_mut(&trigger_id) {
                if let Some(snapshot) = self.load(job_id, &trigger_id) {
                    trigger.restore(&snapshot);
                }
            }
            trigger_id
        };
        debug!(job_id = %job_id, trigger_id = %trigger_id, "trigger added");
        self.notify(SchedulerChange::TriggerAdded {
            job_id: job_id.clone(),
            trigger_id: trigger_id.clone(),
        });
        Ok(trigger_id)
    }

    pub fn remove_trigger(&self, job_id: &JobId, trigger_id: &TriggerId) -> Result<()> {
        self.scheduler_mut(job_id)?.remove_trigger(trigger_id)?;
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(job_id, Some(trigger_id)) {
                warn!(job_id = %job_id, code = e.code(), "store remove failed: {e}");
            }
        }
        debug!(job_id = %job_id, trigger_id = %trigger_id, "trigger removed");
        self.notify(SchedulerChange::TriggerRemoved {
            job_id: job_id.clone(),
            trigger_id: trigger_id.clone(),
        });
        Ok(())
    }

    /// Replace a trigger's schedule and limits; counters carry over.
    pub fn update_trigger(
        &self,
        job_id: &JobId,
        trigger_id: &TriggerId,
        builder: TriggerBuilder,
    ) -> Result<()> {
        self.scheduler_mut(job_id)?.update_trigger(
            trigger_id,
            builder,
            &self.schedule_factories,
            Utc::now(),
        )?;
        self.notify(SchedulerChange::TriggerUpdated {
            job_id: job_id.clone(),
            trigger_id: trigger_id.clone(),
        });
        Ok(())
    }

    /// Adopt description, mode and logging flag from `detail`.
    pub fn update_detail(&self, detail: JobDetail) -> Result<()> {
        let job_id = detail.id.clone();
        self.scheduler_mut(&job_id)?.update_detail(detail);
        self.notify(SchedulerChange::JobUpdated { job_id });
        Ok(())
    }

    pub fn start_job(&self, job_id: &JobId) -> Result<()> {
        let changed = self.scheduler_mut(job_id)?.start();
        if changed {
            info!(job_id = %job_id, "job started");
            self.notify(SchedulerChange::JobStarted { job_id: job_id.clone() });
        }
        Ok(())
    }

    pub fn pause_job(&self, job_id: &JobId) -> Result<()> {
        let changed = self.scheduler_mut(job_id)?.pause();
        if changed {
            info!(job_id = %job_id, "job paused");
            self.notify(SchedulerChange::JobPaused { job_id: job_id.clone() });
        }
        Ok(())
    }

    pub fn pause_trigger(&self, job_id: &JobId, trigger_id: &TriggerId) -> Result<()> {
        self.set_trigger_paused(job_id, trigger_id, true)
    }

    pub fn start_trigger(&self, job_id: &JobId, trigger_id: &TriggerId) -> Result<()> {
        self.set_trigger_paused(job_id, trigger_id, false)
    }

    fn set_trigger_paused(&self, job_id: &JobId, trigger_id: &TriggerId, paused: bool) -> Result<()> {
        let snapshot = {
            let mut scheduler = self.scheduler_mut(job_id)?;
            let trigger = scheduler.trigger_mut(trigger_id)?;
            trigger.set_paused(paused);
            trigger.snapshot()
        };
        self.persist(&snapshot);
        self.notify(SchedulerChange::TriggerUpdated {
            job_id: job_id.clone(),
            trigger_id: trigger_id.clone(),
        });
        Ok(())
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.schedulers.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.schedulers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }

    pub fn get(&self, job_id: &JobId) -> Option<SchedulerSnapshot> {
        self.schedulers.get(job_id).map(|s| s.snapshot())
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.schedulers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> Vec<SchedulerSnapshot> {
        let mut all: Vec<SchedulerSnapshot> = self.schedulers.iter().map(|s| s.snapshot()).collect();
        all.sort_by(|a, b| a.detail.id.cmp(&b.detail.id));
        all
    }

    /// Earliest upcoming run across jobs the loop may currently dispatch.
    pub fn earliest_next_run(&self) -> Option<DateTime<Utc>> {
        self.schedulers
            .iter()
            .filter(|s| s.is_dispatchable())
            .filter_map(|s| s.next_occurrence())
            .min()
    }

    /// How long the loop may sleep at `reference`; zero when something is
    /// already due, `None` when nothing is scheduled.
    pub fn sleep_duration(&self, reference: DateTime<Utc>) -> Option<Duration> {
        self.earliest_next_run()
            .map(|next| (next - reference).to_std().unwrap_or(Duration::ZERO))
    }

    /// Ask the loop to recompute now.
    pub fn wake(&self) -> bool {
        self.lamp.wake()
    }

    // --- scheduling loop side ------------------------------------------------

    pub(crate) fn take_lamp_receiver(&self) -> Result<LampReceiver> {
        self.lamp_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SchedulerError::EngineAlreadyRunning)
    }

    pub(crate) fn return_lamp_receiver(&self, rx: LampReceiver) {
        *self.lamp_rx.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
    }

    /// Select due triggers and advance each before it is handed out.
    ///
    /// A serial job contributes at most one trigger per cycle and is marked
    /// `Blocked` until [`complete`](Self::complete) is called for it.
    pub(crate) fn collect_due(&self, reference: DateTime<Utc>) -> Vec<Dispatch> {
        let mut dispatches = Vec::new();
        let mut snapshots = Vec::new();

        for mut entry in self.schedulers.iter_mut() {
            let scheduler = entry.value_mut();
            if !scheduler.is_dispatchable() {
                continue;
            }
            let due = scheduler.due_triggers(reference);
            if due.is_empty() {
                continue;
            }

            let serial = scheduler.detail().is_serial();
            let take = if serial { 1 } else { due.len() };
            let job_id = scheduler.id().clone();
            let handle = scheduler.handle().clone();
            let log_execution = scheduler.detail().log_execution;

            for trigger_id in due.into_iter().take(take) {
                let Ok(trigger) = scheduler.trigger_mut(&trigger_id) else {
                    continue;
                };
                let occurrence = trigger.advance(reference).unwrap_or(reference);
                snapshots.push(trigger.snapshot());
                dispatches.push(Dispatch {
                    job_id: job_id.clone(),
                    trigger_id,
                    occurrence,
                    run_number: trigger.runs(),
                    handle: handle.clone(),
                    retry: trigger.retry_policy(),
                    log_execution,
                });
                scheduler.begin_firing();
            }
        }

        for snapshot in &snapshots {
            self.persist(snapshot);
        }
        dispatches
    }

    /// Report the end of one firing: count a failure and unblock a serial job.
    pub(crate) fn complete(&self, dispatch: &Dispatch, failed: bool) {
        let snapshot = match self.schedulers.get_mut(&dispatch.job_id) {
            None => None,
            Some(mut scheduler) => {
                scheduler.finish_firing();
                match scheduler.trigger_mut(&dispatch.trigger_id) {
                    Ok(trigger) if failed => {
                        if trigger.record_error() {
                            info!(
                                job_id = %dispatch.job_id,
                                trigger_id = %dispatch.trigger_id,
                                errors = trigger.errors(),
                                "trigger exhausted by error cap"
                            );
                        }
                        Some(trigger.snapshot())
                    }
                    _ => None,
                }
            }
        };
        if let Some(snapshot) = snapshot {
            self.persist(&snapshot);
        }
        self.lamp.wake();
    }

    // --- helpers -------------------------------------------------------------

    fn scheduler_mut(
        &self,
        job_id: &JobId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, JobId, Scheduler>> {
        self.schedulers
            .get_mut(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: job_id.clone() })
    }

    fn restore_triggers(&self, scheduler: &mut Scheduler) {
        let ids: Vec<TriggerId> = scheduler.triggers().map(|t| t.id().clone()).collect();
        for trigger_id in ids {
            if let Some(snapshot) = self.load(scheduler.id(), &trigger_id) {
                if let Ok(trigger) = scheduler.trigger_mut(&trigger_id) {
                    trigger.restore(&snapshot);
                    debug!(job_id = %snapshot.job_id, trigger_id = %trigger_id, runs = snapshot.runs, "trigger state restored");
                }
            }
        }
    }

    fn load(&self, job_id: &JobId, trigger_id: &TriggerId) -> Option<TriggerSnapshot> {
        let store = self.store.as_ref()?;
        match store.load(job_id, trigger_id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(job_id = %job_id, trigger_id = %trigger_id, code = e.code(), "store load failed: {e}");
                None
            }
        }
    }

    fn persist(&self, snapshot: &TriggerSnapshot) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(snapshot) {
                warn!(
                    job_id = %snapshot.job_id,
                    trigger_id = %snapshot.trigger_id,
                    code = e.code(),
                    "store save failed: {e}"
                );
            }
        }
    }

    fn notify(&self, change: SchedulerChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
        self.lamp.wake();
    }
}

impl Default for SchedulerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::job_fn;
    use crate::store::MemoryStore;
    use crate::types::JobStatus;
    use cadence_core::StartMode;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn noop() -> JobSource {
        JobSource::instance(job_fn(|_, _| async { Ok(()) }))
    }

    #[test]
    fn duplicate_jobs_are_rejected() {
        let registry = SchedulerRegistry::new();
        registry.add_job("a", noop(), |b| b).unwrap();
        let err = registry.add_job("a", noop(), |b| b).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn failed_registration_leaves_nothing_behind() {
        let registry = SchedulerRegistry::new();
        let err = registry
            .add_job("a", noop(), |b| {
                b.trigger(TriggerBuilder::cron("* * * * *"))
                    .trigger(TriggerBuilder::cron("not a cron"))
            })
            .unwrap_err();
        assert_eq!(err.code(), "EXPRESSION_SYNTAX");
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_job_kind_is_a_validation_error() {
        let registry = SchedulerRegistry::new();
        let err = registry
            .add_job("a", JobSource::kind("missing", json!({})), |b| b)
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_JOB_KIND");
    }

    #[test]
    fn factory_rejecting_params_is_a_validation_error() {
        let mut factories = JobFactories::new();
        factories.register("strict", |params| {
            anyhow::ensure!(params.get("target").is_some(), "missing target");
            Ok(job_fn(|_, _| async { Ok(()) }))
        });
        let registry = SchedulerRegistry::builder().job_factories(factories).build();
        let err = registry
            .add_job("a", JobSource::kind("strict", json!({})), |b| b)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_JOB");
        assert!(registry
            .add_job("b", JobSource::kind("strict", json!({"target": 1})), |b| b)
            .is_ok());
    }

    #[tokio::test]
    async fn mutations_are_broadcast_and_wake_the_loop() {
        let registry = SchedulerRegistry::new();
        let mut changes = registry.subscribe();
        let mut lamp = registry.take_lamp_receiver().unwrap();

        let job = registry.add_job("a", noop(), |b| b).unwrap();
        let trigger = registry
            .add_trigger(&job, TriggerBuilder::cron("* * * * *").id("t"))
            .unwrap();
        registry.pause_trigger(&job, &trigger).unwrap();
        registry.remove_trigger(&job, &trigger).unwrap();
        registry.pause_job(&job).unwrap();
        registry.start_job(&job).unwrap();
        registry.remove_job(&job).unwrap();

        let mut seen = Vec::new();
        while let Ok(change) = changes.try_recv() {
            seen.push(change);
        }
        let t = TriggerId::from("t");
        assert_eq!(
            seen,
            vec![
                SchedulerChange::JobAdded { job_id: job.clone() },
                SchedulerChange::TriggerAdded { job_id: job.clone(), trigger_id: t.clone() },
                SchedulerChange::TriggerUpdated { job_id: job.clone(), trigger_id: t.clone() },
                SchedulerChange::TriggerRemoved { job_id: job.clone(), trigger_id: t },
                SchedulerChange::JobPaused { job_id: job.clone() },
                SchedulerChange::JobStarted { job_id: job.clone() },
                SchedulerChange::JobRemoved { job_id: job },
            ]
        );
        // Seven wakes collapsed into one pending token.
        assert!(lamp.drain());
        assert!(!lamp.drain());
    }

    #[test]
    fn second_engine_cannot_take_the_lamp() {
        let registry = SchedulerRegistry::new();
        let rx = registry.take_lamp_receiver().unwrap();
        assert!(matches!(
            registry.take_lamp_receiver(),
            Err(SchedulerError::EngineAlreadyRunning)
        ));
        registry.return_lamp_receiver(rx);
        assert!(registry.take_lamp_receiver().is_ok());
    }

    #[test]
    fn sleep_duration_tracks_globally_earliest_trigger() {
        let registry = SchedulerRegistry::new();
        registry
            .add_job("a", noop(), |b| b.trigger(TriggerBuilder::period(Duration::from_secs(90))))
            .unwrap();
        registry
            .add_job("b", noop(), |b| b.trigger(TriggerBuilder::period(Duration::from_secs(30))))
            .unwrap();

        let earliest = registry.earliest_next_run().unwrap();
        let b_next = registry.get(&JobId::from("b")).unwrap().next_occurrence.unwrap();
        assert_eq!(earliest, b_next);

        let reference = earliest - ChronoDuration::seconds(12);
        assert_eq!(registry.sleep_duration(reference), Some(Duration::from_secs(12)));
        assert_eq!(
            registry.sleep_duration(earliest + ChronoDuration::seconds(1)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn inactive_and_paused_jobs_do_not_count() {
        let registry = SchedulerRegistry::new();
        registry
            .add_job("a", noop(), |b| {
                b.start_mode(StartMode::Deferred)
                    .trigger(TriggerBuilder::period(Duration::from_secs(1)))
            })
            .unwrap();
        assert_eq!(registry.earliest_next_run(), None);
        assert_eq!(registry.sleep_duration(Utc::now()), None);

        registry.start_job(&JobId::from("a")).unwrap();
        assert!(registry.earliest_next_run().is_some());
        registry.pause_job(&JobId::from("a")).unwrap();
        assert_eq!(registry.earliest_next_run(), None);
    }

    #[test]
    fn collect_due_advances_before_dispatch() {
        let registry = SchedulerRegistry::new();
        let job = registry
            .add_job("a", noop(), |b| {
                b.trigger(TriggerBuilder::cron("* * * * *").id("t").run_on_start(true))
            })
            .unwrap();
        let now = Utc::now();

        let first = registry.collect_due(now);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].run_number, 1);
        // Already advanced: the same occurrence is not handed out twice.
        assert!(registry.collect_due(now).is_empty());

        let snapshot = registry.get(&job).unwrap();
        assert_eq!(snapshot.triggers[0].runs, 1);
        assert!(snapshot.triggers[0].next_run.unwrap() > now);
    }

    #[test]
    fn serial_jobs_block_until_complete() {
        let registry = SchedulerRegistry::new();
        let job = registry
            .add_job("a", noop(), |b| {
                b.serial()
                    .trigger(TriggerBuilder::period(Duration::from_secs(1)).id("x").run_on_start(true))
                    .trigger(TriggerBuilder::period(Duration::from_secs(1)).id("y").run_on_start(true))
            })
            .unwrap();
        let now = Utc::now() + ChronoDuration::seconds(1);

        let dispatched = registry.collect_due(now);
        assert_eq!(dispatched.len(), 1);
        assert_eq!(registry.get(&job).unwrap().detail.status, JobStatus::Blocked);
        assert!(registry.collect_due(now).is_empty());
        assert_eq!(registry.earliest_next_run(), None);

        registry.complete(&dispatched[0], false);
        assert_eq!(registry.get(&job).unwrap().detail.status, JobStatus::Normal);
        assert_eq!(registry.collect_due(now).len(), 1);
    }

    #[test]
    fn pause_while_blocked_is_not_overridden() {
        let registry = SchedulerRegistry::new();
        let job = registry
            .add_job("a", noop(), |b| {
                b.serial()
                    .trigger(TriggerBuilder::period(Duration::from_secs(1)).run_on_start(true))
            })
            .unwrap();
        let dispatched = registry.collect_due(Utc::now() + ChronoDuration::seconds(1));
        registry.pause_job(&job).unwrap();
        registry.complete(&dispatched[0], false);
        assert_eq!(registry.get(&job).unwrap().detail.status, JobStatus::Paused);
    }

    #[test]
    fn pause_and_start_while_running_keep_serial_job_blocked() {
        let registry = SchedulerRegistry::new();
        let job = registry
            .add_job("a", noop(), |b| {
                b.serial()
                    .trigger(TriggerBuilder::period(Duration::from_secs(1)).id("x").run_on_start(true))
                    .trigger(TriggerBuilder::period(Duration::from_secs(1)).id("y").run_on_start(true))
            })
            .unwrap();
        let now = Utc::now() + ChronoDuration::seconds(1);

        let first = registry.collect_due(now);
        assert_eq!(first.len(), 1);
        registry.pause_job(&job).unwrap();
        registry.start_job(&job).unwrap();
        assert_eq!(registry.get(&job).unwrap().detail.status, JobStatus::Blocked);
        assert!(registry.collect_due(now).is_empty());
        assert_eq!(registry.earliest_next_run(), None);

        registry.complete(&first[0], false);
        assert_eq!(registry.get(&job).unwrap().detail.status, JobStatus::Normal);
        assert_eq!(registry.collect_due(now).len(), 1);
    }

    #[test]
    fn parallel_jobs_are_never_blocked() {
        let registry = SchedulerRegistry::new();
        let job = registry
            .add_job("a", noop(), |b| {
                b.trigger(TriggerBuilder::period(Duration::from_secs(1)).id("x").run_on_start(true))
                    .trigger(TriggerBuilder::period(Duration::from_secs(1)).id("y").run_on_start(true))
            })
            .unwrap();
        let dispatched = registry.collect_due(Utc::now() + ChronoDuration::seconds(1));
        assert_eq!(dispatched.len(), 2);
        assert_eq!(registry.get(&job).unwrap().detail.status, JobStatus::Normal);
    }

    #[test]
    fn failures_count_against_the_trigger() {
        let registry = SchedulerRegistry::new();
        let job = registry
            .add_job("a", noop(), |b| {
                b.trigger(TriggerBuilder::period(Duration::from_secs(1)).max_errors(1).run_on_start(true))
            })
            .unwrap();
        let dispatched = registry.collect_due(Utc::now() + ChronoDuration::seconds(1));
        registry.complete(&dispatched[0], true);
        let snapshot = registry.get(&job).unwrap();
        assert_eq!(snapshot.triggers[0].errors, 1);
        assert_eq!(snapshot.triggers[0].next_run, None);
    }

    #[test]
    fn store_carries_counters_across_registrations() {
        let store = Arc::new(MemoryStore::new());
        let registry = SchedulerRegistry::builder().store(store.clone()).build();
        let add = |registry: &SchedulerRegistry| {
            registry.add_job("a", noop(), |b| {
                b.trigger(TriggerBuilder::period(Duration::from_secs(1)).id("t").run_on_start(true))
            })
        };

        let job = add(&registry).unwrap();
        registry.collect_due(Utc::now() + ChronoDuration::seconds(1));
        assert_eq!(store.len(), 1);

        let other = SchedulerRegistry::builder().store(store.clone()).build();
        add(&other).unwrap();
        assert_eq!(other.get(&job).unwrap().triggers[0].runs, 1);

        other.remove_job(&job).unwrap();
        assert!(store.is_empty());
    }

    struct BrokenStore;

    impl ScheduleStore for BrokenStore {
        fn load(&self, _: &JobId, _: &TriggerId) -> Result<Option<TriggerSnapshot>> {
            Err(SchedulerError::Store("disk unavailable".to_string()))
        }

        fn save(&self, _: &TriggerSnapshot) -> Result<()> {
            Err(SchedulerError::Store("disk unavailable".to_string()))
        }

        fn remove(&self, _: &JobId, _: Option<&TriggerId>) -> Result<()> {
            Err(SchedulerError::Store("disk unavailable".to_string()))
        }
    }

    #[test]
    fn store_failures_do_not_stop_scheduling() {
        let registry = SchedulerRegistry::builder().store(Arc::new(BrokenStore)).build();
        let job = registry
            .add_job("a", noop(), |b| {
                b.trigger(TriggerBuilder::period(Duration::from_secs(1)).id("t").run_on_start(true))
            })
            .unwrap();

        let dispatched = registry.collect_due(Utc::now() + ChronoDuration::seconds(1));
        assert_eq!(dispatched.len(), 1);
        registry.complete(&dispatched[0], false);
        assert_eq!(registry.get(&job).unwrap().triggers[0].runs, 1);

        registry.remove_job(&job).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn register_config_uses_job_factories() {
        let config: cadence_core::CadenceConfig = cadence_core::CadenceConfig::from_toml_str(
            r#"
            [[jobs]]
            id = "heartbeat"
            kind = "noop"
            mode = "serial"

            [[jobs.triggers]]
            id = "every-minute"
            kind = "cron"
            args = ["0 * * * * *"]
            "#,
        )
        .unwrap();
        let mut factories = JobFactories::new();
        factories.register("noop", |_| Ok(job_fn(|_, _| async { Ok(()) })));
        let registry = SchedulerRegistry::from_config(&config.scheduler, factories);

        let id = registry.register_config(&config.jobs[0]).unwrap();
        let snapshot = registry.get(&id).unwrap();
        assert_eq!(snapshot.detail.kind, "noop");
        assert!(snapshot.detail.is_serial());
        assert_eq!(snapshot.triggers[0].trigger_id.as_str(), "every-minute");
        assert!(registry.register_config(&config.jobs[0]).unwrap_err().is_conflict());
    }
}
