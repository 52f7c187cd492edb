//! Admin service heartbeats.
//!
//! When enabled, every ONLINE/OFFLINE transition posts a [`ServerNotice`] to
//! `{url}/api/server`. Posting happens on a background worker so the
//! transition never waits on the admin service; delivery failures are
//! logged at debug and dropped.

pub mod worker;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tern_core::NodeStatus;
use tracing::debug;

use crate::config::AdminConfig;
use crate::lifecycle::{LifecycleEvent, LifecycleListener};

pub use worker::{BackgroundRunnable, BackgroundWorker, WorkerError, DEFAULT_CAPACITY};

/// Environment variable that overrides the configured application id.
pub const APP_ID_ENV: &str = "APPID";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One exposed service as reported to the admin service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub address: String,
}

/// Static node facts captured at bind time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub app_id: String,
    pub host: String,
    pub port: u16,
    pub owner: Option<String>,
    pub owner_email: Option<String>,
    pub services: Vec<ServiceEntry>,
}

/// Heartbeat payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerNotice {
    pub app_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    pub pid: u32,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline_time: Option<String>,
    pub services: Vec<ServiceEntry>,
}

impl ServerNotice {
    /// Builds the notice for `event`, stamped with the current local time.
    #[must_use]
    pub fn new(node: &NodeInfo, event: LifecycleEvent) -> Self {
        let now = chrono::Local::now().format(TIME_FORMAT).to_string();
        let (status, online_time, offline_time) = match event {
            LifecycleEvent::Online => (NodeStatus::Online, Some(now), None),
            LifecycleEvent::Offline => (NodeStatus::Offline, None, Some(now)),
        };
        Self {
            app_id: node.app_id.clone(),
            host: node.host.clone(),
            port: node.port,
            owner: node.owner.clone(),
            owner_email: node.owner_email.clone(),
            pid: std::process::id(),
            status,
            online_time,
            offline_time,
            services: node.services.clone(),
        }
    }

    /// `host:port` as sent in the `address` header.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `APPID` wins over the configured id when set and non-empty.
#[must_use]
pub fn resolve_app_id(configured: &str, from_env: Option<String>) -> String {
    from_env
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| configured.to_string())
}

// ---------------------------------------------------------------------------
// HeartbeatSender
// ---------------------------------------------------------------------------

struct HeartbeatSender {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

#[async_trait]
impl BackgroundRunnable for HeartbeatSender {
    type Task = ServerNotice;

    async fn run(&mut self, notice: ServerNotice) {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("notice_status", notice.status.as_str())
            .header("address", notice.address())
            .json(&notice);
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        match request.send().await.and_then(reqwest::Response::error_for_status) {
            Ok(_) => debug!(status = %notice.status, endpoint = %self.endpoint, "admin heartbeat sent"),
            Err(e) => debug!(status = %notice.status, error = %e, "admin heartbeat failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// AdminNotifier
// ---------------------------------------------------------------------------

/// Lifecycle listener that queues heartbeats for the admin service.
pub struct AdminNotifier {
    node: NodeInfo,
    worker: BackgroundWorker<HeartbeatSender>,
}

impl AdminNotifier {
    /// Starts the heartbeat worker. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn start(config: &AdminConfig, node: NodeInfo) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()?;
        let sender = HeartbeatSender {
            client,
            endpoint: format!("{}/api/server", config.url.trim_end_matches('/')),
            username: config.username.clone(),
            password: config.password.clone(),
        };
        Ok(Self {
            node,
            worker: BackgroundWorker::start(sender, DEFAULT_CAPACITY),
        })
    }

    /// Queues a heartbeat for `event` without waiting.
    pub fn notify(&self, event: LifecycleEvent) {
        if let Err(e) = self.worker.try_submit(ServerNotice::new(&self.node, event)) {
            debug!(event = %event, error = %e, "admin heartbeat dropped");
        }
    }

    /// Stops taking heartbeats and waits until the queued ones were sent
    /// (or failed).
    pub async fn flush(&self) {
        self.worker.stop().await;
    }
}

impl LifecycleListener for AdminNotifier {
    fn on_event(&self, event: LifecycleEvent) -> anyhow::Result<()> {
        self.notify(event);
        Ok(())
    }
}

impl fmt::Debug for AdminNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminNotifier")
            .field("node", &self.node)
            .field("worker", &self.worker)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
