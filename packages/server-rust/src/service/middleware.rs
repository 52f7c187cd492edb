//! Metrics middleware for RPC calls.
//!
//! Wraps the invoker in an `rpc_call` span and records call duration and
//! outcome both on the span and through the `metrics` facade.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tern_core::RpcResponse;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::router::ResolvedRequest;

/// Counter of completed calls, labelled by `service`, `method` and `outcome`.
pub const CALLS_TOTAL: &str = "tern_rpc_calls_total";
/// Histogram of call durations in seconds, labelled by `service`.
pub const CALL_DURATION: &str = "tern_rpc_call_duration_seconds";

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records call duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<ResolvedRequest> for MetricsService<S>
where
    S: Service<ResolvedRequest, Response = RpcResponse, Error = Infallible> + Send,
    S::Future: Send + 'static,
{
    type Response = RpcResponse;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<RpcResponse, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ResolvedRequest) -> Self::Future {
        let service = req.service.clone();
        let method = req.method.clone();

        let span = info_span!(
            "rpc_call",
            request_id = %req.request_id,
            service = %service,
            method = %method,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(resp) if resp.success => "ok",
                    Ok(resp) => match resp.return_type.as_str() {
                        "SerializationError" => "serialization_error",
                        _ => "execution_error",
                    },
                    Err(never) => match *never {},
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(
                    CALLS_TOTAL,
                    "service" => service.clone(),
                    "method" => method,
                    "outcome" => outcome,
                )
                .increment(1);
                metrics::histogram!(CALL_DURATION, "service" => service)
                    .record(elapsed.as_secs_f64());

                tracing::debug!(duration_ms, outcome, "rpc call complete");

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use serde_json::json;
    use tern_core::TypeSpec;
    use tower::ServiceExt;

    use super::*;
    use crate::service::descriptor::MethodTable;
    use crate::service::invoke::Invoker;

    #[tokio::test]
    async fn metrics_layer_passes_through_response() {
        let target = MethodTable::new().method("ping", Vec::<TypeSpec>::new(), TypeSpec::String, |_, _| async {
            Ok(json!("pong"))
        });
        let req = ResolvedRequest {
            request_id: "r-9".into(),
            service: "Ping".into(),
            method: "ping".into(),
            param_types: vec![],
            return_type: TypeSpec::String,
            params: vec![],
            context: HashMap::new(),
            target: Arc::new(target),
        };

        let resp = MetricsLayer.layer(Invoker).oneshot(req).await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.request_id, "r-9");
        assert_eq!(resp.value, Some(json!("pong")));
    }
}
