//! Tern server: RPC runtime with an axum transport, bounded dispatcher,
//! pluggable discovery backends and an online/offline lifecycle.

pub mod admin;
pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod network;
pub mod registry;
pub mod server;
pub mod service;

pub use config::{
    AdminConfig, BindAddress, DispatchConfig, InitializationError, RegistryConfig, ServerConfig,
};
pub use lifecycle::{EventBus, Lifecycle, LifecycleEvent, LifecycleListener, LifecyclePhase};
pub use network::NetworkConfig;
pub use registry::{RegistryKind, ServiceRegistry};
pub use server::{BoundServer, RpcServer, ServerHandle};
pub use service::{CallContext, MethodTable, ServiceDescriptor, ServiceTarget};
