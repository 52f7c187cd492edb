//! Server assembly.
//!
//! [`RpcServer`] validates configuration, [`RpcServer::bind`] wires every
//! component around a bound socket, and [`BoundServer::start`] brings the
//! node online and serves until the socket is released.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tern_core::{codec_by_name, Codec, NodeStatus};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::admin::{resolve_app_id, AdminNotifier, NodeInfo, ServiceEntry, APP_ID_ENV};
use crate::config::{BindAddress, InitializationError, ServerConfig};
use crate::dispatch::Dispatcher;
use crate::lifecycle::{shutdown_signal, EventBus, Lifecycle};
use crate::network::{AppState, NetworkModule};
use crate::registry::RegistryTable;
use crate::service::{config_service, RpcRouter, ServerContext, ServiceDescriptor, ServiceTable, CONFIG_SERVICE};

/// A validated, not yet bound server.
#[derive(Debug)]
pub struct RpcServer {
    config: ServerConfig,
    address: BindAddress,
    codec: Arc<dyn Codec>,
    descriptors: Vec<ServiceDescriptor>,
    registries: Arc<RegistryTable>,
    context: Arc<ServerContext>,
    events: Arc<EventBus>,
}

impl RpcServer {
    /// Validates `config` against `descriptors`. Nothing is bound yet.
    ///
    /// # Errors
    ///
    /// Any [`InitializationError`] except `Bind`: unknown codec, bad bind
    /// address, empty pool, duplicate service names, or a registry problem.
    pub fn new(config: ServerConfig, descriptors: Vec<ServiceDescriptor>) -> Result<Self, InitializationError> {
        let codec = codec_by_name(&config.codec).ok_or_else(|| InitializationError::UnknownCodec(config.codec.clone()))?;
        let address = BindAddress::parse(&config.address)?;
        if config.dispatch.pool_size == 0 {
            return Err(InitializationError::EmptyPool);
        }

        let mut seen = HashSet::from([CONFIG_SERVICE.to_string()]);
        for d in &descriptors {
            if !seen.insert(d.service_name.clone()) {
                return Err(InitializationError::DuplicateService(d.service_name.clone()));
            }
        }

        let registries = Arc::new(RegistryTable::build(&config.registries, &descriptors)?);

        Ok(Self {
            config,
            address,
            codec,
            descriptors,
            registries,
            context: Arc::new(ServerContext::new()),
            events: Arc::new(EventBus::new()),
        })
    }

    /// Node-wide context exposed through the built-in config service.
    #[must_use]
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Lifecycle event bus; subscribe before `bind()` to see every event.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Binds the listener and assembles the node. The lifecycle ends in BOUND.
    ///
    /// # Errors
    ///
    /// Returns [`InitializationError::Bind`] if the socket cannot be bound.
    pub async fn bind(self) -> Result<BoundServer, InitializationError> {
        let Self {
            config,
            address,
            codec,
            descriptors,
            registries,
            context,
            events,
        } = self;

        let mut network = NetworkModule::new(config.network.clone());
        let local_addr = network.start(&address).await?;

        let host = address.advertised_host();
        let node_address = format!("{host}:{}", local_addr.port());
        let app_id = resolve_app_id(&config.app_id, std::env::var(APP_ID_ENV).ok());
        context.set("app.id", app_id.as_str());
        if let Some(name) = &config.app_name {
            context.set("app.name", name.as_str());
        }

        let services = Arc::new(
            ServiceTable::builder()
                .register(config_service(Arc::clone(&context)))
                .register_all(descriptors)
                .build(&node_address, config.elastic_address.as_deref(), &app_id)?,
        );
        info!(
            address = %node_address,
            services = services.len(),
            app_id = %app_id,
            "service table built"
        );

        let mut admin = None;
        if config.admin.enabled {
            let node = NodeInfo {
                app_id: app_id.clone(),
                host,
                port: local_addr.port(),
                owner: config.owner.clone(),
                owner_email: config.owner_email.clone(),
                services: services
                    .descriptors()
                    .iter()
                    .map(|d| ServiceEntry {
                        name: d.service_name.clone(),
                        address: d.address().to_string(),
                    })
                    .collect(),
            };
            match AdminNotifier::start(&config.admin, node) {
                Ok(notifier) => {
                    let notifier = Arc::new(notifier);
                    events.subscribe_all(Arc::clone(&notifier) as Arc<dyn crate::lifecycle::LifecycleListener>);
                    admin = Some(notifier);
                }
                Err(e) => warn!(error = %e, "admin notifier disabled: cannot build http client"),
            }
        }

        let dispatcher = Arc::new(Dispatcher::new(&config.dispatch));
        info!(pool_size = dispatcher.pool_size(), codec = codec.name(), "dispatcher ready");
        let mut lifecycle = Lifecycle::new(
            Arc::clone(&services),
            registries,
            events,
            Arc::clone(&dispatcher),
            config.drain_timeout,
        );
        if let Some(notifier) = admin {
            lifecycle = lifecycle.with_admin(notifier);
        }
        let lifecycle = Arc::new(lifecycle);
        lifecycle.mark_bound().await;

        let state = AppState {
            lifecycle: Arc::clone(&lifecycle),
            router: Arc::new(RpcRouter::new(services, codec)),
            dispatcher,
        };

        Ok(BoundServer {
            network,
            state,
            local_addr,
            test_mode: config.test_mode,
            handle_signals: config.handle_signals,
        })
    }
}

/// A server with its socket bound, not yet serving.
#[derive(Debug)]
pub struct BoundServer {
    network: NetworkModule,
    state: AppState,
    local_addr: SocketAddr,
    test_mode: bool,
    handle_signals: bool,
}

impl BoundServer {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.state.lifecycle
    }

    /// Goes ONLINE and serves.
    ///
    /// In test mode the serve loop runs on a background task and this
    /// returns at once; otherwise it returns after the socket is released.
    ///
    /// # Errors
    ///
    /// Returns an error if the serve loop fails outside test mode.
    pub async fn start(self) -> anyhow::Result<ServerHandle> {
        let Self {
            network,
            state,
            local_addr,
            test_mode,
            handle_signals,
        } = self;
        let lifecycle = Arc::clone(&state.lifecycle);

        if handle_signals {
            let on_signal = Arc::clone(&lifecycle);
            tokio::spawn(async move {
                shutdown_signal().await;
                on_signal.close().await;
            });
        }

        let status = lifecycle.go_online().await;
        info!(address = %local_addr, status = %status, "rpc server started");

        let mut released = lifecycle.socket_released();
        let shutdown = async move {
            if released.wait_for(|r| *r).await.is_err() {
                warn!("lifecycle dropped before socket release");
            }
        };
        let serve = network.serve(state, shutdown);

        let handle = ServerHandle {
            lifecycle,
            local_addr,
            serve: Mutex::new(None),
        };
        if test_mode {
            *handle.serve.lock() = Some(tokio::spawn(serve));
        } else {
            serve.await?;
        }
        Ok(handle)
    }
}

/// Control handle for a started server.
#[derive(Debug)]
pub struct ServerHandle {
    lifecycle: Arc<Lifecycle>,
    local_addr: SocketAddr,
    serve: Mutex<Option<JoinHandle<anyhow::Result<()>>>>,
}

impl ServerHandle {
    #[must_use]
    pub fn status(&self) -> NodeStatus {
        self.lifecycle.status()
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    /// Runs the close sequence. `false` if it already ran.
    pub async fn close(&self) -> bool {
        self.lifecycle.close().await
    }

    /// Waits for the serve loop to finish.
    ///
    /// # Errors
    ///
    /// Returns the serve loop's error, or a join error if it panicked.
    pub async fn wait(&self) -> anyhow::Result<()> {
        let serve = self.serve.lock().take();
        match serve {
            Some(task) => task.await.map_err(|e| {
                error!(error = %e, "serve task failed");
                anyhow::Error::from(e)
            })?,
            None => Ok(()),
        }
    }
}
