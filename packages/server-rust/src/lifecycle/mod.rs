//! Node lifecycle: `INIT -> BOUND -> ONLINE <-> OFFLINE -> CLOSED`.
//!
//! The [`Lifecycle`] owns the phase, drives registry publication on
//! transitions, emits [`LifecycleEvent`]s and runs the ordered close
//! sequence. Phase reads are lock-free; transitions serialize on a mutex.

pub mod events;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tern_core::NodeStatus;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::admin::AdminNotifier;
use crate::dispatch::Dispatcher;
use crate::registry::RegistryTable;
use crate::service::ServiceTable;

pub use events::{EventBus, LifecycleEvent, LifecycleListener};

/// Internal lifecycle phase. [`NodeStatus`] is its externally visible
/// projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Init,
    Bound,
    Online,
    Offline,
    Closed,
}

impl LifecyclePhase {
    #[must_use]
    pub fn status(self) -> NodeStatus {
        match self {
            Self::Init | Self::Bound => NodeStatus::Connecting,
            Self::Online => NodeStatus::Online,
            Self::Offline | Self::Closed => NodeStatus::Offline,
        }
    }
}

/// Lifecycle controller shared by the transport and the server handle.
pub struct Lifecycle {
    phase: ArcSwap<LifecyclePhase>,
    transition: Mutex<()>,
    /// Set by the first `close()` caller; later callers are no-ops.
    closing: AtomicBool,
    /// Whether services are currently published.
    registered: AtomicBool,
    services: Arc<ServiceTable>,
    registries: Arc<RegistryTable>,
    events: Arc<EventBus>,
    dispatcher: Arc<Dispatcher>,
    socket: watch::Sender<bool>,
    drain_timeout: Option<Duration>,
    /// Heartbeat queue flushed as the last close step.
    admin: Option<Arc<AdminNotifier>>,
}

impl Lifecycle {
    #[must_use]
    pub fn new(
        services: Arc<ServiceTable>,
        registries: Arc<RegistryTable>,
        events: Arc<EventBus>,
        dispatcher: Arc<Dispatcher>,
        drain_timeout: Option<Duration>,
    ) -> Self {
        let (socket, _) = watch::channel(false);
        Self {
            phase: ArcSwap::from_pointee(LifecyclePhase::Init),
            transition: Mutex::new(()),
            closing: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            services,
            registries,
            events,
            dispatcher,
            socket,
            drain_timeout,
            admin: None,
        }
    }

    /// Flushes `notifier`'s queued heartbeats when the node closes, so the
    /// final OFFLINE notice is delivered.
    #[must_use]
    pub fn with_admin(mut self, notifier: Arc<AdminNotifier>) -> Self {
        self.admin = Some(notifier);
        self
    }

    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        **self.phase.load()
    }

    #[must_use]
    pub fn status(&self) -> NodeStatus {
        self.phase().status()
    }

    /// Whether the data path currently accepts calls.
    #[must_use]
    pub fn accepts_calls(&self) -> bool {
        self.status().accepts_calls()
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        self.phase.store(Arc::new(phase));
    }

    /// INIT -> BOUND, once the listening socket exists.
    pub async fn mark_bound(&self) {
        let _t = self.transition.lock().await;
        if self.phase() == LifecyclePhase::Init {
            self.set_phase(LifecyclePhase::Bound);
            info!("node bound");
        }
    }

    /// BOUND | OFFLINE -> ONLINE: publish services, then accept calls.
    ///
    /// No-op when already ONLINE, before bind, or once closing started.
    /// Registration failures are logged and do not prevent the transition.
    pub async fn go_online(&self) -> NodeStatus {
        let _t = self.transition.lock().await;
        if self.closing.load(Ordering::Acquire) {
            return self.status();
        }
        match self.phase() {
            LifecyclePhase::Bound | LifecyclePhase::Offline => {}
            LifecyclePhase::Init => {
                warn!("online requested before the socket was bound");
                return self.status();
            }
            LifecyclePhase::Online | LifecyclePhase::Closed => return self.status(),
        }

        let failed = self.registries.register_all(self.services.descriptors()).await;
        self.registered.store(true, Ordering::Release);
        self.set_phase(LifecyclePhase::Online);
        info!(
            services = self.services.len(),
            failed = failed.len(),
            "node online"
        );
        self.events.emit(LifecycleEvent::Online);
        self.status()
    }

    /// ONLINE | BOUND -> OFFLINE: stop accepting calls first, then withdraw
    /// services. In-flight calls keep running.
    pub async fn go_offline(&self) -> NodeStatus {
        let _t = self.transition.lock().await;
        match self.phase() {
            LifecyclePhase::Online | LifecyclePhase::Bound => {}
            _ => return self.status(),
        }

        self.set_phase(LifecyclePhase::Offline);
        if self.registered.swap(false, Ordering::AcqRel) {
            self.registries.unregister_all(self.services.descriptors()).await;
        }
        info!("node offline");
        self.events.emit(LifecycleEvent::Offline);
        self.status()
    }

    /// Runs the close sequence once. Returns `false` for every caller but
    /// the first.
    ///
    /// Order: stop accepting calls, drain in-flight tasks (bounded by the
    /// drain timeout), shut the pool, withdraw services, release the socket,
    /// enter CLOSED, flush admin heartbeats.
    pub async fn close(&self) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!("closing node");

        {
            let _t = self.transition.lock().await;
            let previous = self.phase();
            self.set_phase(LifecyclePhase::Offline);
            if previous == LifecyclePhase::Online {
                self.events.emit(LifecycleEvent::Offline);
            }
        }
        self.dispatcher.begin_drain();

        if !self.dispatcher.wait_idle(self.drain_timeout).await {
            let stuck: Vec<String> = self
                .dispatcher
                .in_flight()
                .snapshot()
                .into_iter()
                .map(|(_, e)| format!("{}.{} ({})", e.service, e.method, e.request_id))
                .collect();
            warn!(
                remaining = stuck.len(),
                stuck = ?stuck,
                timeout = ?self.drain_timeout,
                "drain timed out; closing with tasks still running"
            );
        }
        self.dispatcher.shutdown();

        if self.registered.swap(false, Ordering::AcqRel) {
            self.registries.unregister_all(self.services.descriptors()).await;
        }

        self.socket.send_replace(true);
        self.set_phase(LifecyclePhase::Closed);
        info!("node closed");

        if let Some(admin) = &self.admin {
            admin.flush().await;
        }
        true
    }

    /// Fires once the close sequence releases the listening socket.
    #[must_use]
    pub fn socket_released(&self) -> watch::Receiver<bool> {
        self.socket.subscribe()
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    #[must_use]
    pub fn services(&self) -> &Arc<ServiceTable> {
        &self.services
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("phase", &self.phase())
            .field("closing", &self.closing.load(Ordering::Relaxed))
            .field("registered", &self.registered.load(Ordering::Relaxed))
            .field("drain_timeout", &self.drain_timeout)
            .field("admin", &self.admin.is_some())
            .finish_non_exhaustive()
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c"),
        () = terminate => info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
