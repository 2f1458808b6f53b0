use cadence_core::{JobId, TriggerId};
use dashmap::DashMap;

use crate::error::Result;
use crate::trigger::TriggerSnapshot;

/// Optional persistence for trigger counters and run times.
///
/// The registry loads a snapshot when a trigger is registered and saves
/// one after every dispatch and every recorded failure. Implementations
/// must be cheap; they are called from the scheduling loop.
pub trait ScheduleStore: Send + Sync {
    fn load(&self, job_id: &JobId, trigger_id: &TriggerId) -> Result<Option<TriggerSnapshot>>;

    fn save(&self, snapshot: &TriggerSnapshot) -> Result<()>;

    /// Forget one trigger, or every trigger of the job when `trigger_id` is `None`.
    fn remove(&self, job_id: &JobId, trigger_id: Option<&TriggerId>) -> Result<()>;
}

/// In-process store, useful for tests and for keeping counters across
/// re-registration of the same job.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: DashMap<(JobId, TriggerId), TriggerSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl ScheduleStore for MemoryStore {
    fn load(&self, job_id: &JobId, trigger_id: &TriggerId) -> Result<Option<TriggerSnapshot>> {
        Ok(self
            .snapshots
            .get(&(job_id.clone(), trigger_id.clone()))
            .map(|entry| entry.value().clone()))
    }

    fn save(&self, snapshot: &TriggerSnapshot) -> Result<()> {
        self.snapshots.insert(
            (snapshot.job_id.clone(), snapshot.trigger_id.clone()),
            snapshot.clone(),
        );
        Ok(())
    }

    fn remove(&self, job_id: &JobId, trigger_id: Option<&TriggerId>) -> Result<()> {
        match trigger_id {
            Some(trigger_id) => {
                self.snapshots.remove(&(job_id.clone(), trigger_id.clone()));
            }
            None => self.snapshots.retain(|(job, _), _| job != job_id),
        }
        Ok(())
    }
}
