//! Execution dispatcher: hands resolved calls to a bounded pool and keeps
//! the in-flight set the close sequence drains.
//!
//! Submission never blocks the connection task. Each call runs in its own
//! tokio task gated by a semaphore permit, so at most `pool_size` business
//! calls execute at once while the rest queue on the semaphore.

pub mod inflight;

use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tern_core::{RpcError, RpcResponse};
use tokio::sync::{oneshot, Semaphore};
use tower::ServiceExt;
use tracing::debug;

use crate::config::DispatchConfig;
use crate::service::{build_call_pipeline, CallPipeline, ResolvedRequest};

pub use inflight::{InFlightEntry, InFlightGuard, InFlightSet, TaskId, INFLIGHT_TASKS};

/// Submission failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher is shut down")]
    Closed,
    #[error("task was cancelled before it produced a response")]
    Cancelled,
}

impl From<DispatchError> for RpcError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Closed => RpcError::Offline,
            DispatchError::Cancelled => RpcError::Execution(e.to_string()),
        }
    }
}

/// Handle to one submitted call; resolves to its single response.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<RpcResponse>,
}

impl TaskHandle {
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Waits for the task's response.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Cancelled`] if the task was dropped without
    /// producing a response (runtime shutdown).
    pub async fn response(self) -> Result<RpcResponse, DispatchError> {
        self.rx.await.map_err(|_| DispatchError::Cancelled)
    }
}

/// Bounded execution pool with in-flight tracking.
#[derive(Debug)]
pub struct Dispatcher {
    permits: Arc<Semaphore>,
    pool_size: usize,
    inflight: Arc<InFlightSet>,
    pipeline: CallPipeline,
    /// Set by [`Dispatcher::begin_drain`]; new submissions are refused.
    draining: AtomicBool,
    closed: AtomicBool,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: &DispatchConfig) -> Self {
        let pool_size = config.pool_size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            inflight: Arc::new(InFlightSet::new()),
            pipeline: build_call_pipeline(),
            draining: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Registers the call as in flight and schedules it. Returns without
    /// waiting for a pool slot.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Closed`] once [`Dispatcher::begin_drain`]
    /// or [`Dispatcher::shutdown`] has run.
    pub fn submit(&self, req: ResolvedRequest) -> Result<TaskHandle, DispatchError> {
        if self.is_draining() {
            return Err(DispatchError::Closed);
        }

        // Track before re-checking the gate: a submit racing `begin_drain`
        // is either seen by the drain or refused here, never missed by both.
        let guard = self.inflight.track(InFlightEntry {
            request_id: req.request_id.clone(),
            service: req.service.clone(),
            method: req.method.clone(),
            submitted_at: Instant::now(),
        });
        fence(Ordering::SeqCst);
        if self.is_draining() {
            return Err(DispatchError::Closed);
        }
        let id = guard.id();
        let (tx, rx) = oneshot::channel();
        let permits = Arc::clone(&self.permits);
        let pipeline = self.pipeline.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let request_id = req.request_id.clone();

            let response = match permits.acquire_owned().await {
                Ok(_permit) => match pipeline.oneshot(req).await {
                    Ok(resp) => resp,
                    Err(never) => match never {},
                },
                // Pool closed while queued: only reachable after a drain
                // timeout.
                Err(_) => RpcResponse::failure(request_id.clone(), &RpcError::Offline),
            };

            if tx.send(response).is_err() {
                debug!(
                    request_id = %request_id,
                    task_id = id,
                    "connection closed before response was ready; dropped"
                );
            }
        });

        Ok(TaskHandle { id, rx })
    }

    /// Refuses every later submission. Calls already tracked keep running
    /// and are what [`Dispatcher::wait_idle`] waits for.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);
    }

    fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Stops accepting work and closes the pool. Tasks already holding a
    /// permit run to completion.
    pub fn shutdown(&self) {
        self.begin_drain();
        self.closed.store(true, Ordering::Release);
        self.permits.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Waits for every submitted task to finish. See
    /// [`InFlightSet::wait_idle`].
    pub async fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        self.inflight.wait_idle(timeout).await
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inflight.len()
    }

    #[must_use]
    pub fn in_flight(&self) -> &Arc<InFlightSet> {
        &self.inflight
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
