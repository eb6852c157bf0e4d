//! Bounded worker pool for decode steps.
//!
//! Decode steps are synchronous, compute-heavy engine calls. Each one runs on
//! tokio's blocking thread pool so the async caller (an HTTP response stream,
//! a CLI printer) is never blocked between chunks. A semaphore caps how many
//! steps run at once across all sessions.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::GenerationError;

/// Bounded pool that runs engine work off the async executor.
#[derive(Debug, Clone)]
pub struct StepPool {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl StepPool {
    /// Create a pool allowing at most `workers` concurrent steps.
    pub fn new(workers: usize) -> Result<Self, GenerationError> {
        if workers == 0 {
            return Err(GenerationError::invalid_argument(
                "step_workers",
                "must be greater than 0",
            ));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        })
    }

    /// Pool sized to the number of available CPUs.
    pub fn with_available_parallelism() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of step slots currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Submit one unit of work.
    ///
    /// The permit moves into the worker with the work, so it is held until
    /// the work finishes even if the returned future is dropped early. Values
    /// captured by `work` are dropped on the worker thread.
    pub fn submit<T, F>(&self, work: F) -> BoxFuture<'static, Result<T, GenerationError>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        Box::pin(async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|e| GenerationError::WorkerFailed(e.to_string()))?;
            trace!("Step permit acquired");
            run_blocking(permit, work).await
        })
    }

    /// Submit work that is skipped if `cancel` fires before a slot is free.
    ///
    /// Resolves to `Ok(None)` when the work never started; `work` and
    /// everything it captured are dropped without running. Once a slot is
    /// acquired the token is checked again, so cancellation that lands while
    /// waiting never costs a step.
    pub fn submit_unless_cancelled<T, F>(
        &self,
        cancel: CancellationToken,
        work: F,
    ) -> BoxFuture<'static, Result<Option<T>, GenerationError>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        Box::pin(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    trace!("Cancelled while waiting for a step permit");
                    return Ok(None);
                }
                permit = permits.acquire_owned() => {
                    permit.map_err(|e| GenerationError::WorkerFailed(e.to_string()))?
                }
            };
            if cancel.is_cancelled() {
                trace!("Cancelled after acquiring a step permit");
                return Ok(None);
            }
            trace!("Step permit acquired");
            run_blocking(permit, work).await.map(Some)
        })
    }

    /// Stop accepting work. Pending and future submissions fail with
    /// `WorkerFailed`; work already running finishes normally.
    pub fn close(&self) {
        self.permits.close();
    }
}

async fn run_blocking<T, F>(permit: OwnedSemaphorePermit, work: F) -> Result<T, GenerationError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        work()
    })
    .await
    .map_err(|e| GenerationError::WorkerFailed(e.to_string()))
}
