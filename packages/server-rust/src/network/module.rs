//! HTTP listener for the control and data paths.
//!
//! The socket is bound in `start()` and only served in `serve()`, so the
//! real port is known (and written into the service table) before the
//! node publishes anything.

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::config::NetworkConfig;
use super::handlers::{offline_handler, online_handler, rpc_handler, status_handler, AppState};
use super::middleware::build_http_layers;
use crate::config::{BindAddress, InitializationError};

/// Owns the listening socket and assembles the HTTP surface.
///
/// 1. `new()` -- stores configuration
/// 2. `start()` -- binds the TCP listener to the node address
/// 3. `serve()` -- accepts connections until the shutdown future resolves
#[derive(Debug)]
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
}

impl NetworkModule {
    /// No socket is opened here.
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
        }
    }

    /// Routes:
    /// - `GET /status` -- node status
    /// - `POST /offline` -- go offline
    /// - `POST /online` -- go online
    /// - `POST /rpc` -- data path
    pub fn build_router(&self, state: AppState) -> Router {
        Router::new()
            .route("/status", get(status_handler))
            .route("/offline", post(offline_handler))
            .route("/online", post(online_handler))
            .route("/rpc", post(rpc_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the TCP listener.
    ///
    /// Returns the actual bound address, whose port differs from the
    /// configured one when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns [`InitializationError::Bind`] if the address cannot be bound.
    pub async fn start(&mut self, address: &BindAddress) -> Result<SocketAddr, InitializationError> {
        let bind_error = |source| InitializationError::Bind {
            address: address.to_string(),
            source,
        };
        let listener = TcpListener::bind((address.host.as_str(), address.port))
            .await
            .map_err(bind_error)?;
        let local = listener.local_addr().map_err(bind_error)?;

        info!(address = %local, "TCP listener bound");

        self.listener = Some(listener);
        Ok(local)
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Serves connections until `shutdown` resolves, then stops accepting
    /// and lets open connections finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        state: AppState,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| anyhow::anyhow!("start() must be called before serve()"))?;
        let router = self.build_router(state);

        info!("serving rpc connections");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("listener released");
        Ok(())
    }
}
