//! Tern RPC server node.
//!
//! Exposes a demo `EchoService` next to the built-in config service.
//!
//! Usage:
//!   tern-server                                         # 0.0.0.0:5066, local registry
//!   tern-server --address 127.0.0.1:9000                # Custom bind address
//!   tern-server --registry default=coordination@http://10.0.0.5:8500
//!   tern-server --admin-url http://admin:8080 --admin-username ops

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Value};
use tern_core::TypeSpec;
use tern_server::{
    AdminConfig, DispatchConfig, MethodTable, NetworkConfig, RegistryConfig, RpcServer,
    ServerConfig, ServiceDescriptor,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tern-server", about = "Tern RPC server node")]
struct Cli {
    /// Bind address, "host:port" or "port"
    #[arg(long, env = "TERN_ADDRESS", default_value = "0.0.0.0:5066")]
    address: String,

    /// Public address advertised alongside the bind address
    #[arg(long, env = "TERN_ELASTIC_ADDRESS")]
    elastic_address: Option<String>,

    /// Application id (the APPID variable overrides it)
    #[arg(long, env = "TERN_APP_ID", default_value = "default")]
    app_id: String,

    #[arg(long, env = "TERN_APP_NAME")]
    app_name: Option<String>,

    #[arg(long, env = "TERN_OWNER")]
    owner: Option<String>,

    #[arg(long, env = "TERN_OWNER_EMAIL")]
    owner_email: Option<String>,

    /// Data-path codec: json or msgpack
    #[arg(long, env = "TERN_CODEC", default_value = "json")]
    codec: String,

    /// Maximum concurrent business calls (default: 2 x CPUs)
    #[arg(long, env = "TERN_POOL_SIZE")]
    pool_size: Option<usize>,

    /// Upper bound in seconds on the drain wait during shutdown
    #[arg(long, env = "TERN_DRAIN_TIMEOUT_SECS")]
    drain_timeout_secs: Option<u64>,

    /// Registry backend, name=kind[@address]; repeatable
    #[arg(long = "registry", env = "TERN_REGISTRIES", value_delimiter = ',')]
    registries: Vec<String>,

    /// Allowed CORS origin; repeatable
    #[arg(long = "cors-origin", env = "TERN_CORS_ORIGINS", value_delimiter = ',')]
    cors_origins: Vec<String>,

    /// Admin service base URL; enables heartbeats when set
    #[arg(long, env = "TERN_ADMIN_URL")]
    admin_url: Option<String>,

    #[arg(long, env = "TERN_ADMIN_USERNAME", default_value = "")]
    admin_username: String,

    #[arg(long, env = "TERN_ADMIN_PASSWORD", default_value = "", hide_env_values = true)]
    admin_password: String,

    /// Log as JSON lines
    #[arg(long, env = "TERN_LOG_JSON")]
    log_json: bool,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let registries = self
            .registries
            .iter()
            .map(String::as_str)
            .map(RegistryConfig::parse)
            .collect::<Result<Vec<_>, _>>()?;

        let mut network = NetworkConfig::default();
        if !self.cors_origins.is_empty() {
            network.cors_origins = self.cors_origins;
        }

        let mut dispatch = DispatchConfig::default();
        if let Some(pool_size) = self.pool_size {
            dispatch.pool_size = pool_size;
        }

        let admin = match self.admin_url {
            Some(url) => AdminConfig {
                enabled: true,
                url,
                username: self.admin_username,
                password: self.admin_password,
                ..AdminConfig::default()
            },
            None => AdminConfig::default(),
        };

        Ok(ServerConfig {
            address: self.address,
            elastic_address: self.elastic_address,
            app_id: self.app_id,
            app_name: self.app_name,
            owner: self.owner,
            owner_email: self.owner_email,
            codec: self.codec,
            test_mode: false,
            handle_signals: true,
            drain_timeout: self.drain_timeout_secs.map(Duration::from_secs),
            network,
            dispatch,
            admin,
            registries,
        })
    }
}

fn echo_service() -> ServiceDescriptor {
    let target = MethodTable::new()
        .method("echo", [TypeSpec::String], TypeSpec::String, |params, _| async move {
            Ok(params.into_iter().next().unwrap_or(Value::Null))
        })
        .method("add", [TypeSpec::Long, TypeSpec::Long], TypeSpec::Long, |params, _| async move {
            let a = params[0].as_i64().context("a is not a long")?;
            let b = params[1].as_i64().context("b is not a long")?;
            Ok(json!(a.checked_add(b).context("overflow")?))
        })
        .method("whoami", Vec::<TypeSpec>::new(), TypeSpec::map(TypeSpec::String), |_, ctx| async move {
            Ok(json!(ctx.attachments))
        });
    ServiceDescriptor::new("EchoService", Arc::new(target))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if cli.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = cli.into_config()?;
    let server = RpcServer::new(config, vec![echo_service()])?;
    server.context().set("node.version", env!("CARGO_PKG_VERSION"));

    let bound = server.bind().await?;
    tracing::info!(address = %bound.local_addr(), "listening");
    bound.start().await?;
    Ok(())
}
