//! Bounded offload of blocking inference onto tokio's blocking threads.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("server is busy: {in_flight} inference jobs already running or queued")]
    Overloaded { in_flight: usize },

    #[error("inference job panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Job(#[from] anyhow::Error),
}

/// Runs at most `max_concurrent` jobs at once and lets at most `max_queued`
/// more wait for a slot. Anything beyond that is turned away immediately.
#[derive(Clone)]
pub struct InferencePool {
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    capacity: usize,
}

impl InferencePool {
    pub fn new(max_concurrent: usize, max_queued: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let capacity = max_concurrent + max_queued;
        Self {
            admission: Arc::new(Semaphore::new(capacity)),
            workers: Arc::new(Semaphore::new(max_concurrent)),
            capacity,
        }
    }

    /// Jobs currently running or waiting for a worker.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.admission.available_permits()
    }

    pub async fn run<T, F>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let ticket = self.admission.clone().try_acquire_owned().map_err(|_| {
            let in_flight = self.in_flight();
            warn!(in_flight, "rejecting inference job, queue is full");
            PoolError::Overloaded { in_flight }
        })?;
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            // Neither semaphore is ever closed.
            .map_err(|e| PoolError::Job(e.into()))?;

        // The permits travel with the job: a caller that goes away must not
        // free a slot while the blocking work is still running.
        let result = tokio::task::spawn_blocking(move || {
            let _held = (ticket, permit);
            job()
        })
        .await
        .map_err(|e| PoolError::Panicked(e.to_string()))?;
        result.map_err(PoolError::Job)
    }
}
