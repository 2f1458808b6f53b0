use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use cadence_core::{JobId, TriggerId};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SchedulerError};

/// Key/value bag created fresh for every firing and shared with the hooks.
pub type PropertyBag = Arc<Mutex<Map<String, Value>>>;

/// Everything a job body and its hooks know about one firing.
#[derive(Debug, Clone)]
pub struct JobExecutionContext {
    pub job_id: JobId,
    pub trigger_id: TriggerId,
    /// The scheduled instant being fired.
    pub occurrence: DateTime<Utc>,
    /// The trigger's run counter after this firing was counted.
    pub run_number: i64,
    /// 1 for the first attempt, incremented by retries.
    pub attempt: u32,
    properties: PropertyBag,
}

impl JobExecutionContext {
    pub fn new(
        job_id: JobId,
        trigger_id: TriggerId,
        occurrence: DateTime<Utc>,
        run_number: i64,
    ) -> Self {
        Self {
            job_id,
            trigger_id,
            occurrence,
            run_number,
            attempt: 1,
            properties: Arc::new(Mutex::new(Map::new())),
        }
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Same firing, next retry attempt. The property bag is shared.
    pub(crate) fn next_attempt(&self) -> Self {
        Self { attempt: self.attempt + 1, ..self.clone() }
    }
}

/// A unit of work the scheduler runs on every firing of its triggers.
///
/// Implementations should return promptly once `cancel` fires.
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(
        &self,
        ctx: &JobExecutionContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a [`Job`].
pub struct FnJob<F> {
    f: F,
}

/// Wrap `f` as a job. The closure receives owned copies of the context and token.
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn Job>
where
    F: Fn(JobExecutionContext, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnJob { f })
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(JobExecutionContext, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn execute(
        &self,
        ctx: &JobExecutionContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        (self.f)(ctx.clone(), cancel.clone()).await
    }
}

/// Builds a job instance from the `params` of a job definition.
pub type JobFactory = Arc<dyn Fn(&Value) -> anyhow::Result<Arc<dyn Job>> + Send + Sync>;

/// Job factories keyed by kind tag.
#[derive(Clone, Default)]
pub struct JobFactories {
    factories: HashMap<String, JobFactory>,
}

impl JobFactories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Value) -> anyhow::Result<Arc<dyn Job>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub(crate) fn get(&self, kind: &str) -> Result<JobFactory> {
        self.factories
            .get(kind)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownJobKind(kind.to_string()))
    }
}

impl fmt::Debug for JobFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFactories")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// What the caller hands to `add_job`.
pub enum JobSource {
    /// A ready-made job shared by every firing.
    Instance(Arc<dyn Job>),
    /// A job built by the factory registered under `kind`.
    Kind { kind: String, params: Value },
}

impl JobSource {
    pub fn instance(job: Arc<dyn Job>) -> Self {
        JobSource::Instance(job)
    }

    pub fn kind(kind: impl Into<String>, params: Value) -> Self {
        JobSource::Kind { kind: kind.into(), params }
    }
}

impl fmt::Debug for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSource::Instance(_) => f.write_str("Instance"),
            JobSource::Kind { kind, .. } => f.debug_struct("Kind").field("kind", kind).finish(),
        }
    }
}

/// A registered job's way of producing the instance for one firing.
#[derive(Clone)]
pub(crate) enum JobHandle {
    Shared(Arc<dyn Job>),
    Scoped { factory: JobFactory, params: Value },
}

impl JobHandle {
    pub(crate) fn instance(&self) -> anyhow::Result<Arc<dyn Job>> {
        match self {
            JobHandle::Shared(job) => Ok(Arc::clone(job)),
            JobHandle::Scoped { factory, params } => factory(params),
        }
    }
}
