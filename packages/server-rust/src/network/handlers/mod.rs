//! HTTP handler definitions.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod control;
pub mod rpc;

pub use control::{offline_handler, online_handler, status_handler};
pub use rpc::rpc_handler;

use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::lifecycle::Lifecycle;
use crate::service::RpcRouter;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Debug, Clone)]
pub struct AppState {
    pub lifecycle: Arc<Lifecycle>,
    pub router: Arc<RpcRouter>,
    pub dispatcher: Arc<Dispatcher>,
}
