//! Typed lifecycle notifications.
//!
//! Listeners subscribe per event kind and are called synchronously, in
//! registration order, from the transition that emits the event.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

/// Externally visible lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Node entered ONLINE after registering its services.
    Online,
    /// Node left ONLINE (offline request or close).
    Offline,
}

impl LifecycleEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives lifecycle events. Must not block: it runs inside the transition.
pub trait LifecycleListener: Send + Sync {
    /// # Errors
    ///
    /// Errors are logged by the bus and otherwise ignored.
    fn on_event(&self, event: LifecycleEvent) -> anyhow::Result<()>;
}

impl<F> LifecycleListener for F
where
    F: Fn(LifecycleEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: LifecycleEvent) -> anyhow::Result<()> {
        self(event)
    }
}

type Listeners = RwLock<Vec<Arc<dyn LifecycleListener>>>;

/// Fan-out of lifecycle events to ordered listener lists.
///
/// A failing or panicking listener is logged and skipped; the remaining
/// listeners still run and the emitting transition still completes.
#[derive(Default)]
pub struct EventBus {
    online: Listeners,
    offline: Listeners,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self, event: LifecycleEvent) -> &Listeners {
        match event {
            LifecycleEvent::Online => &self.online,
            LifecycleEvent::Offline => &self.offline,
        }
    }

    /// Adds `listener` for one event kind.
    pub fn subscribe(&self, event: LifecycleEvent, listener: Arc<dyn LifecycleListener>) {
        self.listeners(event).write().push(listener);
    }

    /// Adds `listener` for every event kind.
    pub fn subscribe_all(&self, listener: Arc<dyn LifecycleListener>) {
        self.subscribe(LifecycleEvent::Online, Arc::clone(&listener));
        self.subscribe(LifecycleEvent::Offline, listener);
    }

    #[must_use]
    pub fn listener_count(&self, event: LifecycleEvent) -> usize {
        self.listeners(event).read().len()
    }

    /// Calls every listener for `event` in order.
    pub fn emit(&self, event: LifecycleEvent) {
        // Snapshot so listeners may subscribe without deadlocking.
        let listeners = self.listeners(event).read().clone();
        debug!(event = %event, listeners = listeners.len(), "emitting lifecycle event");

        for (index, listener) in listeners.iter().enumerate() {
            match std::panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(event = %event, index, error = %e, "lifecycle listener failed"),
                Err(_) => warn!(event = %event, index, "lifecycle listener panicked"),
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("online", &self.online.read().len())
            .field("offline", &self.offline.read().len())
            .finish()
    }
}
