//! Bounded executor for blocking work awaited from async code.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Executor is shut down")]
    Closed,
    #[error("Blocking task panicked: {0}")]
    Panicked(String),
}

/// Runs closures on tokio's blocking threads, at most `workers` at a time.
#[derive(Clone)]
pub struct BlockingExecutor {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl BlockingExecutor {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `f` on a blocking thread once a worker slot is free.
    ///
    /// A panic inside `f` is contained and reported as [`ExecutorError::Panicked`].
    pub async fn run<F, T>(&self, f: F) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExecutorError::Closed)?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        });

        handle.await.map_err(|e| {
            if e.is_panic() {
                let payload = e.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                ExecutorError::Panicked(message)
            } else {
                ExecutorError::Closed
            }
        })
    }

    /// Stop accepting work. Tasks already running finish normally.
    pub fn close(&self) {
        self.permits.close();
    }
}
