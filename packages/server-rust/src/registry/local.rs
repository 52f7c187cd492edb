use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use super::{RegistryError, RegistryKind, ServiceRegistry};
use crate::service::ServiceDescriptor;

/// In-process backend for single-node deployments and tests.
///
/// Keeps a service-name to address directory so `discover` answers
/// locally; nothing leaves the process.
#[derive(Debug, Default)]
pub struct LocalRegistry {
    directory: DashMap<String, BTreeSet<String>>,
}

impl LocalRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceRegistry for LocalRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::Local
    }

    async fn register(&self, descriptor: &ServiceDescriptor) -> Result<(), RegistryError> {
        let inserted = self
            .directory
            .entry(descriptor.service_name.clone())
            .or_default()
            .insert(descriptor.address().to_string());
        if inserted {
            info!(
                service = %descriptor.service_name,
                address = %descriptor.address(),
                "registered service locally"
            );
        } else {
            debug!(service = %descriptor.service_name, "already registered");
        }
        Ok(())
    }

    async fn unregister(&self, descriptor: &ServiceDescriptor) -> Result<(), RegistryError> {
        let emptied = self
            .directory
            .get_mut(&descriptor.service_name)
            .is_some_and(|mut addresses| {
                addresses.remove(descriptor.address());
                addresses.is_empty()
            });
        if emptied {
            self.directory
                .remove_if(&descriptor.service_name, |_, addresses| addresses.is_empty());
        }
        Ok(())
    }

    async fn discover(&self, service_name: &str) -> Result<Vec<String>, RegistryError> {
        Ok(self
            .directory
            .get(service_name)
            .map(|addresses| addresses.iter().cloned().collect())
            .unwrap_or_default())
    }
}
