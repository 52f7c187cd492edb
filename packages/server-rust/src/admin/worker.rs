//! Queue-draining worker for fire-and-forget deliveries.
//!
//! A `BackgroundWorker<R>` owns one tokio task that feeds queued items to a
//! `BackgroundRunnable` in submission order. Producers that must never wait
//! (event listeners running inside a lifecycle transition) use `try_submit`.
//! Stopping closes the queue; items already queued are still delivered.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 64;

/// Handler driven by [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    async fn run(&mut self, task: Self::Task);

    /// Runs once after the queue is closed and drained.
    async fn shutdown(&mut self) {}
}

/// Why a task was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("worker queue is full")]
    Full,
    #[error("worker not running")]
    Stopped,
}

pub struct BackgroundWorker<R: BackgroundRunnable> {
    queue: RwLock<Option<mpsc::Sender<R::Task>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker task. Must be called inside a tokio runtime.
    pub fn start(mut runnable: R, capacity: usize) -> Self {
        let (queue, mut pending) = mpsc::channel::<R::Task>(capacity.max(1));
        let task = tokio::spawn(async move {
            while let Some(item) = pending.recv().await {
                runnable.run(item).await;
            }
            runnable.shutdown().await;
        });
        Self {
            queue: RwLock::new(Some(queue)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Enqueues `task` without waiting.
    ///
    /// # Errors
    ///
    /// [`WorkerError::Full`] when the queue is at capacity,
    /// [`WorkerError::Stopped`] after [`BackgroundWorker::stop`].
    pub fn try_submit(&self, task: R::Task) -> Result<(), WorkerError> {
        let queue = self.queue.read();
        let queue = queue.as_ref().ok_or(WorkerError::Stopped)?;
        queue.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WorkerError::Full,
            mpsc::error::TrySendError::Closed(_) => WorkerError::Stopped,
        })
    }

    /// Closes the queue and waits until every queued item has been handled.
    /// Later calls return at once.
    pub async fn stop(&self) {
        self.queue.write().take();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background worker ended abnormally");
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.queue.read().is_some()
    }
}

impl<R: BackgroundRunnable> std::fmt::Debug for BackgroundWorker<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundWorker")
            .field("running", &self.is_running())
            .finish()
    }
}
