//! Discovery backends and the per-node lookup table over them.
//!
//! A [`ServiceRegistry`] publishes and withdraws service descriptors in one
//! external (or in-process) directory. Backends are selected by
//! [`RegistryKind`] at startup and collected into an immutable
//! [`RegistryTable`] that the lifecycle drives.

pub mod coordination;
pub mod local;
pub mod table;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::service::ServiceDescriptor;

pub use coordination::CoordinationRegistry;
pub use local::LocalRegistry;
pub use table::RegistryTable;

// ---------------------------------------------------------------------------
// RegistryKind
// ---------------------------------------------------------------------------

/// Closed set of backend implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    /// In-process directory, no external coordination.
    Local,
    /// HTTP coordination service.
    Coordination,
}

impl RegistryKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Coordination => "coordination",
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "default" => Ok(Self::Local),
            "coordination" => Ok(Self::Coordination),
            other => Err(format!("unknown registry kind: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Backend failures. Logged by the lifecycle; never fatal after startup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry backend error: {0}")]
    Backend(String),
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed for services: {}", failed.join(", "))]
    Partial { failed: Vec<String> },
}

// ---------------------------------------------------------------------------
// NodeRecord
// ---------------------------------------------------------------------------

/// What a backend stores per `(service, address)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub service: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elastic_address: Option<String>,
    #[serde(default)]
    pub weight: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
}

impl From<&ServiceDescriptor> for NodeRecord {
    fn from(d: &ServiceDescriptor) -> Self {
        Self {
            service: d.service_name.clone(),
            address: d.address().to_string(),
            elastic_address: d.elastic_address.clone(),
            weight: d.weight,
            app_id: d.app_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry trait
// ---------------------------------------------------------------------------

/// One discovery backend.
///
/// `register` and `unregister` must be idempotent per
/// `(service_name, address)`.
#[async_trait]
pub trait ServiceRegistry: Send + Sync + fmt::Debug {
    fn kind(&self) -> RegistryKind;

    async fn register(&self, descriptor: &ServiceDescriptor) -> Result<(), RegistryError>;

    async fn unregister(&self, descriptor: &ServiceDescriptor) -> Result<(), RegistryError>;

    /// Registers each descriptor, continuing past failures.
    async fn register_all(&self, descriptors: &[ServiceDescriptor]) -> Result<(), RegistryError> {
        let mut failed = Vec::new();
        for d in descriptors {
            if let Err(e) = self.register(d).await {
                warn!(service = %d.service_name, error = %e, "register failed");
                failed.push(d.service_name.clone());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Partial { failed })
        }
    }

    /// Unregisters each descriptor, continuing past failures.
    async fn unregister_all(&self, descriptors: &[ServiceDescriptor]) -> Result<(), RegistryError> {
        let mut failed = Vec::new();
        for d in descriptors {
            if let Err(e) = self.unregister(d).await {
                warn!(service = %d.service_name, error = %e, "unregister failed");
                failed.push(d.service_name.clone());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Partial { failed })
        }
    }

    /// Addresses currently registered for `service_name`.
    async fn discover(&self, service_name: &str) -> Result<Vec<String>, RegistryError>;
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;

    /// Records every call; fails for services named in `fail_for`.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingRegistry {
        pub calls: Mutex<Vec<String>>,
        pub fail_for: Vec<String>,
    }

    impl RecordingRegistry {
        pub(crate) fn failing(services: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_for: services.iter().map(|s| (*s).to_string()).collect(),
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, op: &str, d: &ServiceDescriptor) -> Result<(), RegistryError> {
            self.calls.lock().push(format!("{op}:{}", d.service_name));
            if self.fail_for.contains(&d.service_name) {
                Err(RegistryError::Backend(format!("{op} rejected")))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl ServiceRegistry for RecordingRegistry {
        fn kind(&self) -> RegistryKind {
            RegistryKind::Local
        }

        async fn register(&self, d: &ServiceDescriptor) -> Result<(), RegistryError> {
            self.record("register", d)
        }

        async fn unregister(&self, d: &ServiceDescriptor) -> Result<(), RegistryError> {
            self.record("unregister", d)
        }

        async fn discover(&self, _service_name: &str) -> Result<Vec<String>, RegistryError> {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::testing::RecordingRegistry;
    use super::*;
    use crate::service::MethodTable;

    #[test]
    fn parses_kinds() {
        assert_eq!("local".parse::<RegistryKind>(), Ok(RegistryKind::Local));
        assert_eq!("Coordination".parse::<RegistryKind>(), Ok(RegistryKind::Coordination));
        assert!("etcd".parse::<RegistryKind>().is_err());
        assert_eq!(RegistryKind::Coordination.to_string(), "coordination");
    }

    #[test]
    fn node_record_from_descriptor() {
        let d = ServiceDescriptor::new("UserService", Arc::new(MethodTable::new()))
            .with_address("10.0.0.1:5066")
            .with_weight(3);
        let record = NodeRecord::from(&d);
        assert_eq!(record.service, "UserService");
        assert_eq!(record.address, "10.0.0.1:5066");
        assert_eq!(record.weight, 3);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("elasticAddress").is_none());
    }

    #[tokio::test]
    async fn register_all_continues_past_failures() {
        let registry = RecordingRegistry::failing(&["B"]);
        let descriptors: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|n| ServiceDescriptor::new(*n, Arc::new(MethodTable::new())))
            .collect();

        let err = registry.register_all(&descriptors).await.unwrap_err();
        assert!(matches!(err, RegistryError::Partial { ref failed } if failed == &["B".to_string()]));
        assert_eq!(registry.calls(), vec!["register:A", "register:B", "register:C"]);
    }
}
