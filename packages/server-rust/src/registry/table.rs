use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use super::{CoordinationRegistry, LocalRegistry, RegistryError, RegistryKind, ServiceRegistry};
use crate::config::{InitializationError, RegistryConfig};
use crate::service::{ServiceDescriptor, DEFAULT_REGISTRY};

/// Instantiates the backend for one configuration entry.
fn create(config: &RegistryConfig) -> Result<Arc<dyn ServiceRegistry>, String> {
    match config.kind {
        RegistryKind::Local => Ok(Arc::new(LocalRegistry::new())),
        RegistryKind::Coordination => {
            let address = config
                .address
                .as_deref()
                .filter(|a| !a.is_empty())
                .ok_or_else(|| "coordination registry requires an address".to_string())?;
            Ok(Arc::new(CoordinationRegistry::new(address)?))
        }
    }
}

/// Immutable `name -> backend` map, built once at startup.
#[derive(Clone)]
pub struct RegistryTable {
    backends: HashMap<String, Arc<dyn ServiceRegistry>>,
}

impl RegistryTable {
    /// Builds backends for `configs`, checking them against what
    /// `descriptors` select.
    ///
    /// A backend that fails to build is fatal only if some descriptor
    /// selects it; otherwise it is skipped with a warning. A local
    /// `"default"` backend is added unless configured explicitly.
    ///
    /// # Errors
    ///
    /// [`InitializationError::InvalidRegistry`] for a selected backend that
    /// cannot be built or a name configured twice;
    /// [`InitializationError::UnknownRegistry`] for a descriptor naming a
    /// backend that does not exist.
    pub fn build(
        configs: &[RegistryConfig],
        descriptors: &[ServiceDescriptor],
    ) -> Result<Self, InitializationError> {
        let selected = |name: &str| descriptors.iter().any(|d| d.registry == name);
        let mut backends: HashMap<String, Arc<dyn ServiceRegistry>> = HashMap::new();

        for config in configs {
            if backends.contains_key(&config.name) {
                return Err(InitializationError::InvalidRegistry {
                    name: config.name.clone(),
                    reason: "configured more than once".to_string(),
                });
            }
            match create(config) {
                Ok(backend) => {
                    info!(registry = %config.name, kind = %config.kind, "registry backend ready");
                    backends.insert(config.name.clone(), backend);
                }
                Err(reason) if !selected(&config.name) => {
                    warn!(
                        registry = %config.name,
                        reason = %reason,
                        "skipping unusable registry backend; no service selects it"
                    );
                }
                Err(reason) => {
                    return Err(InitializationError::InvalidRegistry {
                        name: config.name.clone(),
                        reason,
                    });
                }
            }
        }

        if !backends.contains_key(DEFAULT_REGISTRY) && !configs.iter().any(|c| c.name == DEFAULT_REGISTRY) {
            backends.insert(DEFAULT_REGISTRY.to_string(), Arc::new(LocalRegistry::new()));
        }

        let table = Self { backends };
        for d in descriptors {
            if table.get(&d.registry).is_none() {
                return Err(InitializationError::UnknownRegistry {
                    service: d.service_name.clone(),
                    registry: d.registry.clone(),
                });
            }
        }
        Ok(table)
    }

    /// Adds or replaces a backend. Intended for assembling the table before
    /// it is shared.
    #[must_use]
    pub fn with_backend(mut self, name: impl Into<String>, backend: Arc<dyn ServiceRegistry>) -> Self {
        self.backends.insert(name.into(), backend);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ServiceRegistry>> {
        self.backends.get(name)
    }

    /// Backend names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registers every descriptor with its selected backend.
    ///
    /// Failures are logged and returned as service names; they never abort
    /// the caller.
    pub async fn register_all(&self, descriptors: &[ServiceDescriptor]) -> Vec<String> {
        self.for_each_backend(descriptors, Op::Register).await
    }

    /// Withdraws every descriptor from its selected backend. Failures are
    /// logged and returned as service names.
    pub async fn unregister_all(&self, descriptors: &[ServiceDescriptor]) -> Vec<String> {
        self.for_each_backend(descriptors, Op::Unregister).await
    }

    async fn for_each_backend(&self, descriptors: &[ServiceDescriptor], op: Op) -> Vec<String> {
        // Group by backend, keeping first-appearance order.
        let mut groups: Vec<(&str, Vec<ServiceDescriptor>)> = Vec::new();
        for d in descriptors {
            match groups.iter_mut().find(|(name, _)| *name == d.registry) {
                Some((_, group)) => group.push(d.clone()),
                None => groups.push((d.registry.as_str(), vec![d.clone()])),
            }
        }

        let mut failed = Vec::new();
        for (name, group) in groups {
            let Some(backend) = self.get(name) else {
                warn!(registry = name, "no such registry backend");
                failed.extend(group.iter().map(|d| d.service_name.clone()));
                continue;
            };
            let result = match op {
                Op::Register => backend.register_all(&group).await,
                Op::Unregister => backend.unregister_all(&group).await,
            };
            match result {
                Ok(()) => info!(registry = name, count = group.len(), op = op.as_str(), "registry updated"),
                Err(RegistryError::Partial { failed: names }) => {
                    warn!(registry = name, failed = ?names, op = op.as_str(), "registry partially updated");
                    failed.extend(names);
                }
                Err(e) => {
                    warn!(registry = name, error = %e, op = op.as_str(), "registry update failed");
                    failed.extend(group.iter().map(|d| d.service_name.clone()));
                }
            }
        }
        failed
    }
}

impl fmt::Debug for RegistryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryTable")
            .field("backends", &self.names())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Register,
    Unregister,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Unregister => "unregister",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing::RecordingRegistry;
    use crate::service::MethodTable;

    fn descriptor(name: &str, registry: &str) -> ServiceDescriptor {
        ServiceDescriptor::new(name, Arc::new(MethodTable::new()))
            .with_registry(registry)
            .with_address("10.0.0.1:5066")
    }

    fn coordination(name: &str, address: Option<&str>) -> RegistryConfig {
        RegistryConfig {
            name: name.to_string(),
            kind: RegistryKind::Coordination,
            address: address.map(str::to_string),
        }
    }

    #[test]
    fn default_local_backend_is_always_present() {
        let table = RegistryTable::build(&[], &[descriptor("A", DEFAULT_REGISTRY)]).unwrap();
        assert_eq!(table.names(), vec![DEFAULT_REGISTRY]);
        assert_eq!(table.get(DEFAULT_REGISTRY).unwrap().kind(), RegistryKind::Local);
    }

    #[test]
    fn configured_default_replaces_builtin() {
        let configs = [coordination(DEFAULT_REGISTRY, Some("http://127.0.0.1:8500"))];
        let table = RegistryTable::build(&configs, &[]).unwrap();
        assert_eq!(table.get(DEFAULT_REGISTRY).unwrap().kind(), RegistryKind::Coordination);
    }

    #[test]
    fn unknown_registry_on_descriptor_is_fatal() {
        let err = RegistryTable::build(&[], &[descriptor("A", "zk")]).unwrap_err();
        assert!(matches!(
            err,
            InitializationError::UnknownRegistry { ref service, ref registry } if service == "A" && registry == "zk"
        ));
    }

    #[test]
    fn broken_backend_is_fatal_only_when_selected() {
        let configs = [coordination("zk", None)];

        let table = RegistryTable::build(&configs, &[descriptor("A", DEFAULT_REGISTRY)]).unwrap();
        assert!(table.get("zk").is_none());

        let err = RegistryTable::build(&configs, &[descriptor("A", "zk")]).unwrap_err();
        assert!(matches!(err, InitializationError::InvalidRegistry { ref name, .. } if name == "zk"));
    }

    #[test]
    fn duplicate_registry_names_are_rejected() {
        let configs = [
            coordination("zk", Some("http://127.0.0.1:1")),
            coordination("zk", Some("http://127.0.0.1:2")),
        ];
        assert!(RegistryTable::build(&configs, &[]).is_err());
    }

    #[tokio::test]
    async fn operations_group_by_backend_and_report_failures() {
        let primary = Arc::new(RecordingRegistry::default());
        let secondary = Arc::new(RecordingRegistry::failing(&["C"]));
        let table = RegistryTable::build(&[], &[])
            .unwrap()
            .with_backend(DEFAULT_REGISTRY, primary.clone())
            .with_backend("secondary", secondary.clone());

        let descriptors = [
            descriptor("A", DEFAULT_REGISTRY),
            descriptor("C", "secondary"),
            descriptor("B", DEFAULT_REGISTRY),
        ];

        let failed = table.register_all(&descriptors).await;
        assert_eq!(failed, vec!["C"]);
        assert_eq!(primary.calls(), vec!["register:A", "register:B"]);
        assert_eq!(secondary.calls(), vec!["register:C"]);

        let failed = table.unregister_all(&descriptors).await;
        assert_eq!(failed, vec!["C"]);
        assert_eq!(primary.calls().len(), 4);
    }
}
