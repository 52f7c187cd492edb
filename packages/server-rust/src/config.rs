//! Server-level configuration and startup errors.
//!
//! Configuration is plain data with `Default` impls; the binary maps CLI
//! arguments and environment variables onto these structs.

use std::time::Duration;

use tern_core::DEFAULT_CODEC;

use crate::network::NetworkConfig;
use crate::registry::RegistryKind;

/// Top-level configuration for one server node.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address, either `"host:port"` or just `"port"`.
    pub address: String,
    /// Optional public address advertised alongside the bind address.
    pub elastic_address: Option<String>,
    /// Application id reported to registries and the admin service.
    pub app_id: String,
    /// Human-readable application name.
    pub app_name: Option<String>,
    /// Owner name reported to the admin service.
    pub owner: Option<String>,
    /// Owner contact reported to the admin service.
    pub owner_email: Option<String>,
    /// Codec name for the data path (see `tern_core::codec_by_name`).
    pub codec: String,
    /// When `true`, `BoundServer::start()` returns immediately and serves on a
    /// background task instead of blocking until the socket closes.
    pub test_mode: bool,
    /// Install Ctrl-C / SIGTERM handling that triggers `close()`.
    pub handle_signals: bool,
    /// Upper bound on the drain wait during close. `None` waits indefinitely.
    pub drain_timeout: Option<Duration>,
    /// HTTP transport settings.
    pub network: NetworkConfig,
    /// Worker pool settings.
    pub dispatch: DispatchConfig,
    /// Admin heartbeat settings.
    pub admin: AdminConfig,
    /// Named discovery backends. A local `"default"` backend is added when
    /// none is configured under that name.
    pub registries: Vec<RegistryConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:0".to_string(),
            elastic_address: None,
            app_id: "default".to_string(),
            app_name: None,
            owner: None,
            owner_email: None,
            codec: DEFAULT_CODEC.to_string(),
            test_mode: false,
            handle_signals: true,
            drain_timeout: None,
            network: NetworkConfig::default(),
            dispatch: DispatchConfig::default(),
            admin: AdminConfig::default(),
            registries: Vec::new(),
        }
    }
}

/// Bounded worker pool configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of business calls executing at once.
    pub pool_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get);
        Self {
            pool_size: cpus * 2,
        }
    }
}

/// External admin service integration.
///
/// No credentials default: `enabled` is `false` until a URL is supplied.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub enabled: bool,
    /// Base URL; heartbeats go to `{url}/api/server`.
    pub url: String,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            username: String::new(),
            password: String::new(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// One named discovery backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Name referenced by `ServiceDescriptor::registry`.
    pub name: String,
    pub kind: RegistryKind,
    /// Connection address; required for coordination backends.
    pub address: Option<String>,
}

impl RegistryConfig {
    /// Parses `name=kind[@address]`, e.g. `default=coordination@http://10.0.0.5:8500`.
    ///
    /// # Errors
    ///
    /// Returns [`InitializationError::InvalidRegistry`] for malformed entries
    /// or unknown kinds.
    pub fn parse(entry: &str) -> Result<Self, InitializationError> {
        let invalid = |reason: &str| InitializationError::InvalidRegistry {
            name: entry.to_string(),
            reason: reason.to_string(),
        };
        let (name, rest) = entry.split_once('=').ok_or_else(|| invalid("expected name=kind[@address]"))?;
        let (kind, address) = match rest.split_once('@') {
            Some((kind, address)) => (kind, Some(address.to_string())),
            None => (rest, None),
        };
        let kind = kind.parse::<RegistryKind>().map_err(|e| invalid(&e))?;
        if name.is_empty() {
            return Err(invalid("empty registry name"));
        }
        Ok(Self {
            name: name.to_string(),
            kind,
            address,
        })
    }
}

/// Parsed bind address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAddress {
    pub host: String,
    pub port: u16,
}

impl BindAddress {
    /// Parses `"host:port"` or `"port"`. A bare port binds all interfaces.
    ///
    /// # Errors
    ///
    /// Returns [`InitializationError::InvalidAddress`] if the port is missing
    /// or not a valid `u16`.
    pub fn parse(address: &str) -> Result<Self, InitializationError> {
        let invalid = |reason: String| InitializationError::InvalidAddress {
            address: address.to_string(),
            reason,
        };
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => (host.to_string(), port),
            Some((_, _)) => return Err(invalid("empty host".to_string())),
            None => ("0.0.0.0".to_string(), address),
        };
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|e| invalid(format!("bad port: {e}")))?;
        Ok(Self { host, port })
    }

    /// Host to advertise to registries. Wildcard hosts are replaced by the
    /// machine hostname.
    #[must_use]
    pub fn advertised_host(&self) -> String {
        if self.host == "0.0.0.0" || self.host == "::" || self.host == "[::]" {
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "127.0.0.1".to_string())
        } else {
            self.host.clone()
        }
    }
}

impl std::fmt::Display for BindAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Fatal configuration errors. Any of these aborts startup before the
/// socket is bound (or, for `Bind`, instead of binding).
#[derive(Debug, thiserror::Error)]
pub enum InitializationError {
    #[error("unknown codec: {0}")]
    UnknownCodec(String),
    #[error("invalid bind address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("invalid registry {name}: {reason}")]
    InvalidRegistry { name: String, reason: String },
    #[error("service {service} selects unknown registry {registry}")]
    UnknownRegistry { service: String, registry: String },
    #[error("service {0} is registered twice")]
    DuplicateService(String),
    #[error("worker pool size must be at least 1")]
    EmptyPool,
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}
