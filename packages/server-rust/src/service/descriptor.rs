use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tern_core::TypeSpec;

/// Name of the registry backend used when a descriptor names none.
pub const DEFAULT_REGISTRY: &str = "default";

// ---------------------------------------------------------------------------
// Method signatures and call context
// ---------------------------------------------------------------------------

/// Declared shape of one exposed method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub name: String,
    pub params: Vec<TypeSpec>,
    pub returns: TypeSpec,
}

/// Per-call data handed to the target alongside the bound parameters.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub request_id: String,
    /// String-keyed context forwarded from the envelope.
    pub attachments: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// ServiceTarget trait
// ---------------------------------------------------------------------------

/// The object behind a service name: declares methods and executes them.
///
/// Implementations are shared (`Arc`) and owned by the application; the
/// server only invokes them from dispatcher tasks.
#[async_trait]
pub trait ServiceTarget: Send + Sync {
    /// Exposed methods in declaration order. Resolution picks the first
    /// entry whose name matches.
    fn methods(&self) -> &[MethodSignature];

    /// Executes `method` with already-bound parameters.
    async fn invoke(
        &self,
        method: &str,
        params: Vec<Value>,
        ctx: &CallContext,
    ) -> anyhow::Result<Value>;
}

// ---------------------------------------------------------------------------
// MethodTable (closure-backed target)
// ---------------------------------------------------------------------------

type MethodFn =
    Arc<dyn Fn(Vec<Value>, CallContext) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A [`ServiceTarget`] assembled from closures, one per method.
///
/// ```ignore
/// let users = MethodTable::new().method(
///     "getUser",
///     [TypeSpec::Long],
///     TypeSpec::object("User"),
///     |params, _ctx| async move { Ok(json!({ "id": params[0] })) },
/// );
/// ```
#[derive(Default)]
pub struct MethodTable {
    signatures: Vec<MethodSignature>,
    handlers: Vec<MethodFn>,
}

impl MethodTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method. Declaring the same name twice keeps both entries but
    /// only the first is ever resolved.
    #[must_use]
    pub fn method<F, Fut>(
        mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = TypeSpec>,
        returns: TypeSpec,
        handler: F,
    ) -> Self
    where
        F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.signatures.push(MethodSignature {
            name: name.into(),
            params: params.into_iter().collect(),
            returns,
        });
        self.handlers
            .push(Arc::new(move |params, ctx| handler(params, ctx).boxed()));
        self
    }
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("signatures", &self.signatures)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ServiceTarget for MethodTable {
    fn methods(&self) -> &[MethodSignature] {
        &self.signatures
    }

    async fn invoke(
        &self,
        method: &str,
        params: Vec<Value>,
        ctx: &CallContext,
    ) -> anyhow::Result<Value> {
        let index = self
            .signatures
            .iter()
            .position(|s| s.name == method)
            .ok_or_else(|| anyhow::anyhow!("method [{method}] not found"))?;
        (self.handlers[index])(params, ctx.clone()).await
    }
}

// ---------------------------------------------------------------------------
// ServiceDescriptor
// ---------------------------------------------------------------------------

/// Registration record binding a service name to its target and location.
///
/// Address fields left `None` are filled from the node's own address when
/// the service table is built at bind time.
#[derive(Clone)]
pub struct ServiceDescriptor {
    pub service_name: String,
    /// `None` models a descriptor whose target could not be wired.
    pub target: Option<Arc<dyn ServiceTarget>>,
    pub address: Option<String>,
    pub elastic_address: Option<String>,
    /// Registry backend name; defaults to [`DEFAULT_REGISTRY`].
    pub registry: String,
    /// Load-balancing hint for callers.
    pub weight: u32,
    pub app_id: Option<String>,
}

impl ServiceDescriptor {
    /// Creates a descriptor with default registry, weight and addresses.
    #[must_use]
    pub fn new(service_name: impl Into<String>, target: Arc<dyn ServiceTarget>) -> Self {
        Self {
            service_name: service_name.into(),
            target: Some(target),
            address: None,
            elastic_address: None,
            registry: DEFAULT_REGISTRY.to_string(),
            weight: 0,
            app_id: None,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_elastic_address(mut self, address: impl Into<String>) -> Self {
        self.elastic_address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Effective network address. Empty until the table fills defaults.
    #[must_use]
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or_default()
    }

    /// Fills unset address and app-id fields from node-level values.
    pub(crate) fn apply_node_defaults(
        &mut self,
        address: &str,
        elastic_address: Option<&str>,
        app_id: &str,
    ) {
        if self.address.is_none() {
            self.address = Some(address.to_string());
        }
        if self.elastic_address.is_none() {
            self.elastic_address = elastic_address.map(str::to_string);
        }
        if self.app_id.is_none() {
            self.app_id = Some(app_id.to_string());
        }
        if self.registry.is_empty() {
            self.registry = DEFAULT_REGISTRY.to_string();
        }
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("service_name", &self.service_name)
            .field("has_target", &self.target.is_some())
            .field("address", &self.address)
            .field("elastic_address", &self.elastic_address)
            .field("registry", &self.registry)
            .field("weight", &self.weight)
            .field("app_id", &self.app_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn users() -> MethodTable {
        MethodTable::new()
            .method("getUser", [TypeSpec::Long], TypeSpec::object("User"), |params, _| async move {
                Ok(json!({ "id": params[0] }))
            })
            .method("getUser", [TypeSpec::String], TypeSpec::String, |_, _| async {
                Ok(json!("shadowed"))
            })
    }

    #[tokio::test]
    async fn method_table_invokes_first_match() {
        let table = users();
        assert_eq!(table.methods().len(), 2);
        let out = table
            .invoke("getUser", vec![json!(42)], &CallContext::default())
            .await
            .unwrap();
        assert_eq!(out, json!({"id": 42}));
    }

    #[tokio::test]
    async fn method_table_unknown_method_errors() {
        let err = users()
            .invoke("deleteUser", vec![], &CallContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("deleteUser"));
    }

    #[test]
    fn descriptor_defaults() {
        let d = ServiceDescriptor::new("UserService", Arc::new(users()));
        assert_eq!(d.registry, DEFAULT_REGISTRY);
        assert_eq!(d.weight, 0);
        assert_eq!(d.address(), "");
        assert!(d.target.is_some());
    }

    #[test]
    fn node_defaults_only_fill_unset_fields() {
        let mut d = ServiceDescriptor::new("A", Arc::new(users())).with_address("10.0.0.1:9000");
        d.apply_node_defaults("host:1", Some("1.2.3.4:1"), "app");
        assert_eq!(d.address(), "10.0.0.1:9000");
        assert_eq!(d.elastic_address.as_deref(), Some("1.2.3.4:1"));
        assert_eq!(d.app_id.as_deref(), Some("app"));
    }
}
