//! Terminal Tower service that executes a [`ResolvedRequest`] against its
//! target and always yields exactly one [`RpcResponse`].

use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use tern_core::{RpcError, RpcResponse, TypeSpec};
use tower::Service;
use tracing::warn;

use super::router::ResolvedRequest;

/// Invokes business targets. Failures and panics become `success: false`
/// responses; the service itself never errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Invoker;

impl Service<ResolvedRequest> for Invoker {
    type Response = RpcResponse;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<RpcResponse, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ResolvedRequest) -> Self::Future {
        Box::pin(async move { Ok(execute(req).await) })
    }
}

async fn execute(req: ResolvedRequest) -> RpcResponse {
    let ctx = req.call_context();
    let outcome = AssertUnwindSafe(req.target.invoke(&req.method, req.params, &ctx))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(value)) => {
            // Results are checked against the declared return type so a
            // target cannot put an undeclared shape on the wire.
            let checked = match req.return_type {
                TypeSpec::Void | TypeSpec::Any => Ok(value),
                ref declared => declared.bind(&value),
            };
            match checked {
                Ok(value) => RpcResponse::success(req.request_id, req.return_type.name(), value),
                Err(e) => {
                    warn!(
                        request_id = %req.request_id,
                        service = %req.service,
                        method = %req.method,
                        error = %e,
                        "result does not match declared return type"
                    );
                    RpcResponse::failure(
                        req.request_id,
                        &RpcError::Serialization(format!("result: {e}")),
                    )
                }
            }
        }
        Ok(Err(e)) => {
            warn!(
                request_id = %req.request_id,
                service = %req.service,
                method = %req.method,
                error = %e,
                "rpc method failed"
            );
            RpcResponse::failure(req.request_id, &RpcError::Execution(format!("{e:#}")))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(
                request_id = %req.request_id,
                service = %req.service,
                method = %req.method,
                panic = %message,
                "rpc method panicked"
            );
            RpcResponse::failure(req.request_id, &RpcError::Execution(message))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic in rpc method".to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::service::descriptor::{MethodTable, ServiceTarget};

    fn request(target: Arc<dyn ServiceTarget>, method: &str, returns: TypeSpec) -> ResolvedRequest {
        ResolvedRequest {
            request_id: "r-1".into(),
            service: "S".into(),
            method: method.into(),
            param_types: vec![TypeSpec::Long],
            return_type: returns,
            params: vec![json!(42)],
            context: HashMap::new(),
            target,
        }
    }

    fn target() -> Arc<dyn ServiceTarget> {
        Arc::new(
            MethodTable::new()
                .method("ok", [TypeSpec::Long], TypeSpec::object("User"), |p, _| async move {
                    Ok(json!({ "id": p[0] }))
                })
                .method("fail", [TypeSpec::Long], TypeSpec::Void, |_, _| async {
                    Err(anyhow::anyhow!("database unavailable"))
                })
                .method("boom", [TypeSpec::Long], TypeSpec::Void, |p: Vec<Value>, _| async move {
                    assert!(p.is_empty(), "boom");
                    Ok(Value::Null)
                })
                .method("wrong", [TypeSpec::Long], TypeSpec::Long, |_, _| async {
                    Ok(json!("not a number"))
                }),
        )
    }

    #[tokio::test]
    async fn success_echoes_request_id_and_return_type() {
        let resp = Invoker
            .oneshot(request(target(), "ok", TypeSpec::object("User")))
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.request_id, "r-1");
        assert_eq!(resp.return_type, "User");
        assert_eq!(resp.value, Some(json!({"id": 42})));
    }

    #[tokio::test]
    async fn method_error_becomes_failure_response() {
        let resp = Invoker
            .oneshot(request(target(), "fail", TypeSpec::Void))
            .await
            .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.return_type, "ExecutionError");
        assert!(resp.exception.unwrap().contains("database unavailable"));
    }

    #[tokio::test]
    async fn panic_becomes_failure_response() {
        let resp = Invoker
            .oneshot(request(target(), "boom", TypeSpec::Void))
            .await
            .unwrap();
        assert!(!resp.success);
        assert!(resp.exception.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn undeclared_result_shape_is_serialization_error() {
        let resp = Invoker
            .oneshot(request(target(), "wrong", TypeSpec::Long))
            .await
            .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.return_type, "SerializationError");
    }
}
