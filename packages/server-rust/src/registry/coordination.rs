//! Backend for an external HTTP coordination service.
//!
//! Wire contract, relative to the configured base URL:
//!
//! | Operation  | Request                                               |
//! |------------|-------------------------------------------------------|
//! | register   | `PUT    /v1/services/{name}/nodes/{address}` + [`NodeRecord`] |
//! | unregister | `DELETE /v1/services/{name}/nodes/{address}`          |
//! | discover   | `GET    /v1/services/{name}/nodes` -> `[NodeRecord]`  |

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use reqwest::{StatusCode, Url};
use tracing::{debug, info};

use super::{NodeRecord, RegistryError, RegistryKind, ServiceRegistry};
use crate::service::ServiceDescriptor;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct CoordinationRegistry {
    base: Url,
    client: reqwest::Client,
    /// `(service, address)` pairs this node has published.
    registered: DashSet<(String, String)>,
}

impl CoordinationRegistry {
    /// Creates a client for the coordination service at `address`.
    ///
    /// # Errors
    ///
    /// Returns a reason string if `address` is not an `http(s)` URL or the
    /// HTTP client cannot be built.
    pub fn new(address: &str) -> Result<Self, String> {
        let base = Url::parse(address).map_err(|e| format!("invalid url {address}: {e}"))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(format!("expected an http(s) base url, got {address}"));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("http client: {e}"))?;
        Ok(Self {
            base,
            client,
            registered: DashSet::new(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RegistryError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| RegistryError::Backend(format!("{} cannot be a base url", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn node_url(&self, descriptor: &ServiceDescriptor) -> Result<Url, RegistryError> {
        self.url(&[
            "v1",
            "services",
            &descriptor.service_name,
            "nodes",
            descriptor.address(),
        ])
    }
}

#[async_trait]
impl ServiceRegistry for CoordinationRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::Coordination
    }

    async fn register(&self, descriptor: &ServiceDescriptor) -> Result<(), RegistryError> {
        let key = (descriptor.service_name.clone(), descriptor.address().to_string());
        if self.registered.contains(&key) {
            debug!(service = %key.0, address = %key.1, "already published");
            return Ok(());
        }

        self.client
            .put(self.node_url(descriptor)?)
            .json(&NodeRecord::from(descriptor))
            .send()
            .await?
            .error_for_status()?;

        info!(
            service = %key.0,
            address = %key.1,
            base = %self.base,
            "published service to coordination registry"
        );
        self.registered.insert(key);
        Ok(())
    }

    async fn unregister(&self, descriptor: &ServiceDescriptor) -> Result<(), RegistryError> {
        let key = (descriptor.service_name.clone(), descriptor.address().to_string());
        if !self.registered.contains(&key) {
            return Ok(());
        }

        let response = self.client.delete(self.node_url(descriptor)?).send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            response.error_for_status()?;
        }

        info!(service = %key.0, address = %key.1, "withdrew service from coordination registry");
        self.registered.remove(&key);
        Ok(())
    }

    async fn discover(&self, service_name: &str) -> Result<Vec<String>, RegistryError> {
        let nodes: Vec<NodeRecord> = self
            .client
            .get(self.url(&["v1", "services", service_name, "nodes"])?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(nodes.into_iter().map(|n| n.address).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use parking_lot::Mutex;

    use super::*;
    use crate::service::MethodTable;

    #[derive(Clone, Default)]
    struct MockCoordinator {
        nodes: Arc<Mutex<HashMap<String, Vec<NodeRecord>>>>,
        puts: Arc<Mutex<usize>>,
    }

    async fn put_node(
        State(state): State<MockCoordinator>,
        Path((name, address)): Path<(String, String)>,
        Json(record): Json<NodeRecord>,
    ) -> HttpStatus {
        assert_eq!(record.service, name);
        assert_eq!(record.address, address);
        *state.puts.lock() += 1;
        let mut nodes = state.nodes.lock();
        let entry = nodes.entry(name).or_default();
        entry.retain(|n| n.address != address);
        entry.push(record);
        HttpStatus::NO_CONTENT
    }

    async fn delete_node(
        State(state): State<MockCoordinator>,
        Path((name, address)): Path<(String, String)>,
    ) -> HttpStatus {
        if let Some(entry) = state.nodes.lock().get_mut(&name) {
            entry.retain(|n| n.address != address);
        }
        HttpStatus::NO_CONTENT
    }

    async fn list_nodes(
        State(state): State<MockCoordinator>,
        Path(name): Path<String>,
    ) -> Json<Vec<NodeRecord>> {
        Json(state.nodes.lock().get(&name).cloned().unwrap_or_default())
    }

    async fn start_mock() -> (String, MockCoordinator) {
        let state = MockCoordinator::default();
        let app = Router::new()
            .route(
                "/v1/services/{name}/nodes/{address}",
                put(put_node).delete(delete_node),
            )
            .route("/v1/services/{name}/nodes", get(list_nodes))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), state)
    }

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::new("UserService", Arc::new(MethodTable::new()))
            .with_address("10.0.0.1:5066")
            .with_weight(2)
    }

    #[test]
    fn rejects_non_http_addresses() {
        assert!(CoordinationRegistry::new("not a url").is_err());
        assert!(CoordinationRegistry::new("zk://10.0.0.1:2181").is_err());
        assert!(CoordinationRegistry::new("http://10.0.0.1:8500").is_ok());
    }

    #[tokio::test]
    async fn register_discover_unregister() {
        let (base, mock) = start_mock().await;
        let registry = CoordinationRegistry::new(&base).unwrap();
        let d = descriptor();

        registry.register(&d).await.unwrap();
        registry.register(&d).await.unwrap();
        assert_eq!(*mock.puts.lock(), 1);
        assert_eq!(
            registry.discover("UserService").await.unwrap(),
            vec!["10.0.0.1:5066"]
        );

        registry.unregister(&d).await.unwrap();
        assert!(registry.discover("UserService").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_backend_reports_http_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let registry = CoordinationRegistry::new(&format!("http://{addr}")).unwrap();
        let err = registry.register(&descriptor()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Http(_)));
    }
}
