//! HTTP transport configuration.

/// Transport settings for the listener and its middleware.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Allowed CORS origins. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Maximum accepted `/rpc` body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cors_origins: vec!["*".to_string()],
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}
