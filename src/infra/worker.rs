//! A bounded pool for running work off the async executor.

use super::error::InternalError;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs closures on blocking threads, at most `size` at a time.
///
/// Cloning the pool is cheap and every clone shares the same permits.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Constructs a pool allowing `size` concurrent workers (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// The maximum number of concurrent workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Waits for a free worker and runs `f` on it.
    ///
    /// The permit travels with the closure, so a caller that stops waiting
    /// does not free the slot before the work is actually done.
    pub async fn run<F, T>(&self, f: F) -> Result<T, InternalError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| InternalError::WorkerPoolClosed)?;
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        })
        .await?;
        Ok(result)
    }

    /// Stops accepting new work. Pending and future calls to [`WorkerPool::run`] fail.
    pub fn close(&self) {
        self.permits.close();
    }
}
