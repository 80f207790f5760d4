//! Fixed-size worker pool behind the [`Scheduler`] interface.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("job cancelled")]
    Cancelled,
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl From<JoinError> for JobError {
    fn from(e: JoinError) -> Self {
        if e.is_panic() {
            JobError::Panicked(panic_message(e.into_panic()))
        } else {
            JobError::Cancelled
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Awaitable, cancellable handle to a submitted job.
pub struct JobHandle<T> {
    inner: JoinHandle<T>,
}

impl<T: Send + 'static> JobHandle<T> {
    /// Spawns `job` on the runtime without taking a worker slot.
    pub fn spawn<F>(job: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            inner: tokio::spawn(job),
        }
    }
}

impl<T> JobHandle<T> {
    /// Requests cancellation; takes effect at the job's next suspension point.
    pub fn cancel(&self) {
        self.inner.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, JobError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll(cx).map(|res| res.map_err(JobError::from))
    }
}

/// Runs jobs concurrently.
pub trait Scheduler: Send + Sync {
    fn submit<F>(&self, job: F) -> JobHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;
}

/// At most `size` jobs run at once; waiting jobs take free slots in the
/// order they queued (tokio's semaphore is fair).
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Free worker slots.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Scheduler for WorkerPool {
    fn submit<F>(&self, job: F) -> JobHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        JobHandle::spawn(async move {
            // the pool never closes its semaphore
            let _permit = permits.acquire_owned().await.ok();
            job.await
        })
    }
}
