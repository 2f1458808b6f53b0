use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_core::{JobId, TriggerId};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::hooks::{Execution, JobExecutor, JobMonitor, RetryingExecutor};
use crate::job::JobExecutionContext;
use crate::lamp::{LampReceiver, Wake};
use crate::registry::{Dispatch, SchedulerRegistry};

/// How one firing ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    Failed { error: String },
    /// The job failed after the engine was asked to stop.
    Cancelled,
}

/// Sent to the host after every firing, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub job_id: JobId,
    pub trigger_id: TriggerId,
    pub occurrence: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub attempts: u32,
    pub outcome: ExecutionOutcome,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.outcome == ExecutionOutcome::Succeeded
    }
}

/// Bounded channel for [`ExecutionReport`]s. Reports are dropped with a
/// warning when the receiver falls behind; the loop never waits on it.
pub fn report_channel(
    capacity: usize,
) -> (mpsc::Sender<ExecutionReport>, mpsc::Receiver<ExecutionReport>) {
    mpsc::channel(capacity.max(1))
}

/// The scheduling loop.
///
/// Each cycle selects due triggers from the registry, advances them, spawns
/// one task per firing and then sleeps until the earliest upcoming run or
/// until the registry signals a change.
pub struct SchedulerEngine {
    registry: Arc<SchedulerRegistry>,
    executor: Arc<dyn JobExecutor>,
    monitor: Option<Arc<dyn JobMonitor>>,
    reports: Option<mpsc::Sender<ExecutionReport>>,
    cancel: CancellationToken,
}

impl SchedulerEngine {
    pub fn new(registry: Arc<SchedulerRegistry>) -> Self {
        Self {
            registry,
            executor: Arc::new(RetryingExecutor),
            monitor: None,
            reports: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_executor(self, executor: Arc<dyn JobExecutor>) -> Self {
        Self { executor, ..self }
    }

    pub fn with_monitor(self, monitor: Arc<dyn JobMonitor>) -> Self {
        Self { monitor: Some(monitor), ..self }
    }

    /// Send a copy of every [`ExecutionReport`] to `tx` (non-blocking).
    pub fn with_reports(self, tx: mpsc::Sender<ExecutionReport>) -> Self {
        Self { reports: Some(tx), ..self }
    }

    /// Stop when `cancel` fires. Job bodies receive the same token.
    pub fn with_cancellation(self, cancel: CancellationToken) -> Self {
        Self { cancel, ..self }
    }

    /// Spawn the loop on the current runtime.
    ///
    /// Fails when another engine is already driving the same registry.
    pub fn start(self) -> Result<EngineHandle> {
        let lamp = self.registry.take_lamp_receiver()?;
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run(lamp));
        Ok(EngineHandle { cancel, task })
    }

    async fn run(self, mut lamp: LampReceiver) {
        info!(jobs = self.registry.len(), "scheduler engine started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let reference = Utc::now();
            let due = self.registry.collect_due(reference);
            if !due.is_empty() {
                debug!(count = due.len(), "dispatching due triggers");
            }
            for dispatch in due {
                self.spawn_firing(dispatch);
            }

            let sleep = self.registry.sleep_duration(Utc::now());
            debug!(sleep_ms = sleep.map(|d| d.as_millis() as u64), "scheduler sleeping");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                wake = lamp.wait(sleep) => {
                    if wake == Wake::Closed {
                        warn!("signal lamp closed");
                        break;
                    }
                }
            }
        }

        self.registry.return_lamp_receiver(lamp);
        info!("scheduler engine stopped");
    }

    fn spawn_firing(&self, dispatch: Dispatch) {
        let firing = Firing {
            registry: Arc::clone(&self.registry),
            executor: Arc::clone(&self.executor),
            monitor: self.monitor.clone(),
            reports: self.reports.clone(),
            cancel: self.cancel.clone(),
        };
        tokio::spawn(firing.run(dispatch));
    }
}

/// Everything one spawned execution unit owns.
struct Firing {
    registry: Arc<SchedulerRegistry>,
    executor: Arc<dyn JobExecutor>,
    monitor: Option<Arc<dyn JobMonitor>>,
    reports: Option<mpsc::Sender<ExecutionReport>>,
    cancel: CancellationToken,
}

impl Firing {
    async fn run(self, dispatch: Dispatch) {
        let ctx = JobExecutionContext::new(
            dispatch.job_id.clone(),
            dispatch.trigger_id.clone(),
            dispatch.occurrence,
            dispatch.run_number,
        );
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut completion = Completion {
            registry: Arc::clone(&self.registry),
            dispatch: &dispatch,
            failed: true,
        };

        if dispatch.log_execution {
            info!(job_id = %ctx.job_id, trigger_id = %ctx.trigger_id, run = ctx.run_number, "executing job");
        } else {
            debug!(job_id = %ctx.job_id, trigger_id = %ctx.trigger_id, run = ctx.run_number, "executing job");
        }

        if let Some(monitor) = &self.monitor {
            if let Err(e) = contained(monitor.on_before_execute(&ctx)).await {
                warn!(job_id = %ctx.job_id, "before-execute hook failed: {e:#}");
            }
        }

        let instance = std::panic::catch_unwind(AssertUnwindSafe(|| dispatch.handle.instance()))
            .unwrap_or_else(|panic| Err(panicked("job", &*panic)));
        let execution = match instance {
            Ok(job) => {
                let call = self
                    .executor
                    .execute(job, ctx.clone(), dispatch.retry, self.cancel.clone());
                match AssertUnwindSafe(call).catch_unwind().await {
                    Ok(execution) => execution,
                    Err(panic) => Execution { attempts: 1, result: Err(panicked("job", &*panic)) },
                }
            }
            Err(e) => Execution {
                attempts: 0,
                result: Err(e.context("failed to build job instance")),
            },
        };

        if let Some(monitor) = &self.monitor {
            let hook = monitor.on_after_execute(&ctx, execution.result.as_ref().err());
            if let Err(e) = contained(hook).await {
                warn!(job_id = %ctx.job_id, "after-execute hook failed: {e:#}");
            }
        }

        let outcome = match &execution.result {
            Ok(()) => ExecutionOutcome::Succeeded,
            Err(_) if self.cancel.is_cancelled() => ExecutionOutcome::Cancelled,
            Err(e) => ExecutionOutcome::Failed { error: format!("{e:#}") },
        };
        completion.failed = matches!(outcome, ExecutionOutcome::Failed { .. });
        drop(completion);

        let elapsed = clock.elapsed();
        match &outcome {
            ExecutionOutcome::Succeeded if dispatch.log_execution => info!(
                job_id = %ctx.job_id,
                trigger_id = %ctx.trigger_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "job completed"
            ),
            ExecutionOutcome::Succeeded => debug!(
                job_id = %ctx.job_id,
                trigger_id = %ctx.trigger_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "job completed"
            ),
            ExecutionOutcome::Failed { error } => error!(
                job_id = %ctx.job_id,
                trigger_id = %ctx.trigger_id,
                attempts = execution.attempts,
                "job failed: {error}"
            ),
            ExecutionOutcome::Cancelled => {
                info!(job_id = %ctx.job_id, trigger_id = %ctx.trigger_id, "job cancelled")
            }
        }

        if let Some(tx) = &self.reports {
            let report = ExecutionReport {
                job_id: dispatch.job_id.clone(),
                trigger_id: dispatch.trigger_id.clone(),
                occurrence: dispatch.occurrence,
                started_at,
                elapsed,
                attempts: execution.attempts,
                outcome,
            };
            // try_send never blocks the firing; drop the report if the host is behind.
            if tx.try_send(report).is_err() {
                warn!(job_id = %dispatch.job_id, "report channel full or closed, report dropped");
            }
        }
    }
}

/// Reports the end of a firing to the registry when dropped, so an
/// unwinding firing still releases a serial job.
struct Completion<'a> {
    registry: Arc<SchedulerRegistry>,
    dispatch: &'a Dispatch,
    failed: bool,
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.registry.complete(self.dispatch, self.failed);
    }
}

/// Run a hook, turning a panic into an error.
async fn contained<F>(hook: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    AssertUnwindSafe(hook)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(panicked("hook", &*panic)))
}

fn panicked(what: &str, panic: &(dyn Any + Send)) -> anyhow::Error {
    anyhow::anyhow!("{what} panicked: {}", panic_message(panic))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Control over a running [`SchedulerEngine`].
pub struct EngineHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// The token the loop and every job body observe.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the loop to stop. In-flight firings are not awaited.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("scheduler engine task failed: {e}");
        }
    }

    /// Shut down and wait for the loop to exit.
    pub async fn stop(self) {
        self.shutdown();
        self.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_readable() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*boxed), "unknown panic payload");
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(ExecutionOutcome::Failed { error: "x".to_string() }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "failed", "error": "x"}));
    }

    #[tokio::test]
    async fn only_one_engine_per_registry() {
        let registry = Arc::new(SchedulerRegistry::new());
        let first = SchedulerEngine::new(Arc::clone(&registry)).start().unwrap();
        assert!(SchedulerEngine::new(Arc::clone(&registry)).start().is_err());
        first.stop().await;
        // The lamp is handed back when the loop exits.
        let second = SchedulerEngine::new(registry).start().unwrap();
        second.stop().await;
    }
}
