//! End-to-end tests against a real socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tern_core::{NodeStatus, RpcResponse, StatusBody, TypeSpec};
use tern_server::{MethodTable, RpcServer, ServerConfig, ServerHandle, ServiceDescriptor};
use tokio::sync::Notify;

struct Node {
    handle: ServerHandle,
    client: reqwest::Client,
    base: String,
}

impl Node {
    async fn start(descriptors: Vec<ServiceDescriptor>) -> Self {
        let config = ServerConfig {
            address: "127.0.0.1:0".to_string(),
            test_mode: true,
            handle_signals: false,
            ..ServerConfig::default()
        };
        let handle = RpcServer::new(config, descriptors)
            .unwrap()
            .bind()
            .await
            .unwrap()
            .start()
            .await
            .unwrap();
        let base = format!("http://{}", handle.local_addr());
        Self {
            handle,
            client: reqwest::Client::new(),
            base,
        }
    }

    async fn status(&self, method: reqwest::Method, path: &str) -> NodeStatus {
        let resp = self
            .client
            .request(method, format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.json::<StatusBody>().await.unwrap().status
    }

    async fn call(&self, body: Value) -> (u16, RpcResponse) {
        let resp = self
            .client
            .post(format!("{}/rpc", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

fn calculator() -> ServiceDescriptor {
    let target = MethodTable::new().method(
        "sum",
        [TypeSpec::list(TypeSpec::Int)],
        TypeSpec::Long,
        |params, _| async move {
            let total: i64 = params[0]
                .as_array()
                .map(|xs| xs.iter().filter_map(Value::as_i64).sum())
                .unwrap_or_default();
            Ok(json!(total))
        },
    );
    ServiceDescriptor::new("Calculator", Arc::new(target))
}

#[tokio::test]
async fn status_and_control_endpoints() {
    let node = Node::start(vec![calculator()]).await;

    assert_eq!(node.status(reqwest::Method::GET, "/status").await, NodeStatus::Online);
    assert_eq!(node.status(reqwest::Method::POST, "/offline").await, NodeStatus::Offline);
    assert_eq!(node.status(reqwest::Method::GET, "/status").await, NodeStatus::Offline);

    let (code, resp) = node
        .call(json!({"service": "Calculator", "method": "sum", "parameters": [[1, 2]]}))
        .await;
    assert_eq!(code, 502);
    assert_eq!(resp.return_type, "OfflineError");

    assert_eq!(node.status(reqwest::Method::POST, "/online").await, NodeStatus::Online);
    let (code, resp) = node
        .call(json!({"requestId": "e2e-1", "service": "Calculator", "method": "sum", "parameters": [[1, 2, 3]]}))
        .await;
    assert_eq!(code, 200);
    assert!(resp.success);
    assert_eq!(resp.request_id, "e2e-1");
    assert_eq!(resp.value, Some(json!(6)));

    node.handle.close().await;
    node.handle.wait().await.unwrap();
}

#[tokio::test]
async fn data_path_headers_and_generated_request_id() {
    let node = Node::start(vec![calculator()]).await;

    let resp = node
        .client
        .post(format!("{}/rpc", node.base))
        .json(&json!({"service": "Calculator", "method": "sum", "parameters": [[5]]}))
        .send()
        .await
        .unwrap();
    let headers = resp.headers().clone();
    let body: RpcResponse = resp.json().await.unwrap();

    assert!(!body.request_id.is_empty());
    assert_eq!(headers["x-request-id"], body.request_id.as_str());
    assert_eq!(headers["x-rpc-service"], "Calculator");
    assert_eq!(headers["x-rpc-method"], "sum");
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["pragma"], "no-cache");
    assert_eq!(headers["expires"], "-1");

    node.handle.close().await;
    node.handle.wait().await.unwrap();
}

#[tokio::test]
async fn close_drains_in_flight_calls_before_releasing_socket() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let finished = Arc::new(AtomicUsize::new(0));

    let (s, r, f) = (Arc::clone(&started), Arc::clone(&release), Arc::clone(&finished));
    let target = MethodTable::new().method("slow", Vec::<TypeSpec>::new(), TypeSpec::String, move |_, _| {
        let (s, r, f) = (Arc::clone(&s), Arc::clone(&r), Arc::clone(&f));
        async move {
            s.notify_one();
            r.notified().await;
            f.fetch_add(1, Ordering::SeqCst);
            Ok(json!("done"))
        }
    });
    let node = Arc::new(Node::start(vec![ServiceDescriptor::new("Slow", Arc::new(target))]).await);

    let caller = Arc::clone(&node);
    let call = tokio::spawn(async move { caller.call(json!({"service": "Slow", "method": "slow"})).await });
    started.notified().await;

    let closer = Arc::clone(&node);
    let close = tokio::spawn(async move { closer.handle.close().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!close.is_finished());
    assert_eq!(node.handle.status(), NodeStatus::Offline);

    release.notify_one();
    let (code, resp) = call.await.unwrap();
    assert_eq!(code, 200);
    assert_eq!(resp.value, Some(json!("done")));
    assert!(close.await.unwrap());
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    node.handle.wait().await.unwrap();
    assert!(tokio::net::TcpStream::connect(node.handle.local_addr()).await.is_err());
}

#[tokio::test]
async fn concurrent_close_runs_once() {
    let node = Arc::new(Node::start(vec![calculator()]).await);
    let closers: Vec<_> = (0..8)
        .map(|_| {
            let node = Arc::clone(&node);
            tokio::spawn(async move { node.handle.close().await })
        })
        .collect();

    let mut first = 0;
    for closer in closers {
        if closer.await.unwrap() {
            first += 1;
        }
    }
    assert_eq!(first, 1);
    node.handle.wait().await.unwrap();
}
