//! HTTP transport: configuration, middleware, handlers and the listener.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;

pub use config::NetworkConfig;
pub use handlers::AppState;
pub use middleware::X_REQUEST_ID;
pub use module::NetworkModule;
