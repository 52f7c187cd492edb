use std::collections::HashMap;
use std::sync::Arc;

use crate::config::InitializationError;

use super::descriptor::ServiceDescriptor;

// ---------------------------------------------------------------------------
// ServiceTableBuilder
// ---------------------------------------------------------------------------

/// Collects descriptors during startup and freezes them into a
/// [`ServiceTable`].
#[derive(Debug, Default)]
pub struct ServiceTableBuilder {
    descriptors: Vec<ServiceDescriptor>,
}

impl ServiceTableBuilder {
    /// Adds a descriptor. Registration order is kept for deterministic
    /// register/unregister sequencing.
    #[must_use]
    pub fn register(mut self, descriptor: ServiceDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Adds every descriptor from `descriptors`, in order.
    #[must_use]
    pub fn register_all(mut self, descriptors: impl IntoIterator<Item = ServiceDescriptor>) -> Self {
        self.descriptors.extend(descriptors);
        self
    }

    /// Fills node defaults into every descriptor and freezes the table.
    ///
    /// # Errors
    ///
    /// Returns [`InitializationError::DuplicateService`] if two descriptors
    /// share a service name.
    pub fn build(
        self,
        node_address: &str,
        elastic_address: Option<&str>,
        app_id: &str,
    ) -> Result<ServiceTable, InitializationError> {
        let mut by_name = HashMap::with_capacity(self.descriptors.len());
        let mut order = Vec::with_capacity(self.descriptors.len());
        for mut descriptor in self.descriptors {
            descriptor.apply_node_defaults(node_address, elastic_address, app_id);
            let name = descriptor.service_name.clone();
            if by_name.insert(name.clone(), order.len()).is_some() {
                return Err(InitializationError::DuplicateService(name));
            }
            order.push(descriptor);
        }
        Ok(ServiceTable {
            by_name,
            descriptors: order.into(),
        })
    }
}

// ---------------------------------------------------------------------------
// ServiceTable
// ---------------------------------------------------------------------------

/// Immutable map of service name to descriptor.
///
/// Built once at bind time and shared via `Arc`; lookups take no locks.
#[derive(Debug)]
pub struct ServiceTable {
    by_name: HashMap<String, usize>,
    descriptors: Arc<[ServiceDescriptor]>,
}

impl ServiceTable {
    #[must_use]
    pub fn builder() -> ServiceTableBuilder {
        ServiceTableBuilder::default()
    }

    /// Retrieve a descriptor by service name.
    #[must_use]
    pub fn get(&self, service_name: &str) -> Option<&ServiceDescriptor> {
        self.by_name
            .get(service_name)
            .map(|&index| &self.descriptors[index])
    }

    /// All descriptors in registration order.
    #[must_use]
    pub fn descriptors(&self) -> &[ServiceDescriptor] {
        &self.descriptors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
