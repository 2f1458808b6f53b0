use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::job::{Job, JobExecutionContext};
use crate::trigger::RetryPolicy;

/// Observes every firing. Errors returned here are logged and never stop
/// the job from running.
#[async_trait]
pub trait JobMonitor: Send + Sync {
    async fn on_before_execute(&self, _ctx: &JobExecutionContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_after_execute(
        &self,
        _ctx: &JobExecutionContext,
        _error: Option<&anyhow::Error>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Result of running a job through an executor.
#[derive(Debug)]
pub struct Execution {
    pub attempts: u32,
    pub result: anyhow::Result<()>,
}

/// Wraps the call into the job body; replace it to add timeouts, tracing
/// spans or a different retry strategy.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(
        &self,
        job: Arc<dyn Job>,
        ctx: JobExecutionContext,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Execution;
}

/// Runs the job, retrying failures `policy.retries` times with
/// `policy.timeout` between attempts. Stops early on cancellation.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryingExecutor;

#[async_trait]
impl JobExecutor for RetryingExecutor {
    async fn execute(
        &self,
        job: Arc<dyn Job>,
        ctx: JobExecutionContext,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Execution {
        let mut ctx = ctx;
        loop {
            let result = job.execute(&ctx, &cancel).await;
            let error = match result {
                Ok(()) => return Execution { attempts: ctx.attempt, result: Ok(()) },
                Err(e) => e,
            };

            if ctx.attempt > policy.retries || cancel.is_cancelled() {
                return Execution { attempts: ctx.attempt, result: Err(error) };
            }

            warn!(
                job_id = %ctx.job_id,
                trigger_id = %ctx.trigger_id,
                attempt = ctx.attempt,
                retry_in_ms = policy.timeout.as_millis() as u64,
                "job attempt failed: {error:#}"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(job_id = %ctx.job_id, "retry abandoned on cancellation");
                    return Execution { attempts: ctx.attempt, result: Err(error) };
                }
                _ = tokio::time::sleep(policy.timeout) => {}
            }
            ctx = ctx.next_attempt();
        }
    }
}
