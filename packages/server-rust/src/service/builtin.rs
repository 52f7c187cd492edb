//! Built-in services registered on every node.
//!
//! The config service exposes the node's [`ServerContext`] key/value pairs
//! to remote callers.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tern_core::TypeSpec;

use super::descriptor::{MethodTable, ServiceDescriptor};

/// Service name of the built-in config service.
pub const CONFIG_SERVICE: &str = "tern.ConfigService";

/// Node-wide string context, readable through [`CONFIG_SERVICE`].
#[derive(Debug, Default)]
pub struct ServerContext {
    entries: DashMap<String, String>,
}

impl ServerContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn snapshot(&self) -> serde_json::Map<String, Value> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), Value::String(e.value().clone())))
            .collect()
    }
}

/// Descriptor for the built-in config service backed by `context`.
///
/// Methods: `get(String) -> String` (null when absent) and
/// `entries() -> Map<String,String>`.
#[must_use]
pub fn config_service(context: Arc<ServerContext>) -> ServiceDescriptor {
    let for_get = Arc::clone(&context);
    let target = MethodTable::new()
        .method("get", [TypeSpec::String], TypeSpec::String, move |params, _| {
            let ctx = Arc::clone(&for_get);
            async move {
                let key = params.first().and_then(Value::as_str).unwrap_or_default();
                Ok(ctx.get(key).map_or(Value::Null, Value::String))
            }
        })
        .method("entries", Vec::<TypeSpec>::new(), TypeSpec::map(TypeSpec::String), move |_, _| {
            let ctx = Arc::clone(&context);
            async move { Ok(Value::Object(ctx.snapshot())) }
        });
    ServiceDescriptor::new(CONFIG_SERVICE, Arc::new(target))
}
