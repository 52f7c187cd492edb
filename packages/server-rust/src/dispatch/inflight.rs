//! In-flight task tracking with RAII guards and an event-signalled drain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Notify;

/// Gauge of tasks submitted but not yet completed.
pub const INFLIGHT_TASKS: &str = "tern_inflight_tasks";

/// Identifier assigned to every submitted task, unique per set.
pub type TaskId = u64;

/// What the drain is waiting on, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct InFlightEntry {
    pub request_id: String,
    pub service: String,
    pub method: String,
    pub submitted_at: Instant,
}

/// Set of submitted-but-unfinished tasks.
///
/// Entries are inserted by [`InFlightSet::track`] and removed exactly once
/// when the returned guard drops, including during unwinding. Waiters in
/// [`InFlightSet::wait_idle`] are woken when the set becomes empty.
#[derive(Debug, Default)]
pub struct InFlightSet {
    entries: DashMap<TaskId, InFlightEntry>,
    next_id: AtomicU64,
    idle: Notify,
}

impl InFlightSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `entry` and returns the guard that removes it.
    #[must_use]
    pub fn track(self: &Arc<Self>, entry: InFlightEntry) -> InFlightGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, entry);
        metrics::gauge!(INFLIGHT_TASKS).increment(1.0);
        InFlightGuard {
            id,
            set: Arc::clone(self),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies the current entries, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(TaskId, InFlightEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    /// Waits until the set is empty.
    ///
    /// Returns `true` once drained, or `false` if `timeout` elapsed first.
    /// `None` waits without bound.
    pub async fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                // Register before checking so a removal racing the check
                // still wakes us.
                notified.as_mut().enable();
                if self.entries.is_empty() {
                    return;
                }
                notified.await;
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, drained).await.is_ok(),
            None => {
                drained.await;
                true
            }
        }
    }

    fn remove(&self, id: TaskId) {
        if self.entries.remove(&id).is_some() {
            metrics::gauge!(INFLIGHT_TASKS).decrement(1.0);
        }
        if self.entries.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

/// RAII guard removing its task from the [`InFlightSet`] on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    id: TaskId,
    set: Arc<InFlightSet>,
}

impl InFlightGuard {
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(self.id);
    }
}
