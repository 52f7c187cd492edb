//! `POST /rpc`: the data path.
//!
//! Rejects while OFFLINE, resolves the call, submits it to the dispatcher
//! and encodes its single response with the configured codec. RPC-level
//! failures are answered with `502 Bad Gateway` so callers can tell a
//! reached-but-failed call from a transport failure.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tern_core::{CallMeta, RpcError, RpcResponse};
use tracing::{debug, error};

use super::AppState;
use crate::network::middleware::X_REQUEST_ID;

pub const X_RPC_SERVICE: &str = "x-rpc-service";
pub const X_RPC_METHOD: &str = "x-rpc-method";

pub async fn rpc_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let fallback_id = headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);

    if !state.lifecycle.accepts_calls() {
        let meta = best_effort_meta(&state, &body, fallback_id);
        debug!(request_id = %meta.request_id, "rejecting call while offline");
        return failure(&state, meta, &RpcError::Offline);
    }

    let request = match state.router.resolve(&body, &fallback_id) {
        Ok(request) => request,
        Err(rejection) => {
            debug!(
                request_id = %rejection.meta.request_id,
                error = %rejection.error,
                "rejected rpc call"
            );
            return failure(&state, rejection.meta, &rejection.error);
        }
    };

    let meta = request.meta();
    let response = match state.dispatcher.submit(request) {
        Ok(handle) => handle.response().await,
        Err(e) => Err(e),
    };
    match response {
        Ok(response) => encode(&state, &meta, &response),
        Err(e) => failure(&state, meta, &RpcError::from(e)),
    }
}

/// Correlation data for a call rejected before resolution.
fn best_effort_meta(state: &AppState, body: &[u8], fallback_id: String) -> CallMeta {
    match state.router.codec().decode_envelope(body) {
        Ok(envelope) => CallMeta {
            request_id: envelope
                .request_id
                .filter(|id| !id.is_empty())
                .unwrap_or(fallback_id),
            service: envelope.service,
            method: envelope.method,
        },
        Err(_) => CallMeta {
            request_id: fallback_id,
            ..CallMeta::default()
        },
    }
}

fn failure(state: &AppState, meta: CallMeta, error: &RpcError) -> Response {
    let response = RpcResponse::failure(meta.request_id.clone(), error);
    encode(state, &meta, &response)
}

fn encode(state: &AppState, meta: &CallMeta, response: &RpcResponse) -> Response {
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };

    let body = match state.router.codec().encode_response(response) {
        Ok(body) => body,
        Err(e) => {
            let fallback = RpcResponse::failure(meta.request_id.clone(), &RpcError::from(e));
            match state.router.codec().encode_response(&fallback) {
                Ok(body) => return with_headers(state, meta, StatusCode::BAD_GATEWAY, body),
                Err(e) => {
                    error!(request_id = %meta.request_id, error = %e, "cannot encode failure response");
                    return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
                }
            }
        }
    };
    with_headers(state, meta, status, body)
}

fn with_headers(state: &AppState, meta: &CallMeta, status: StatusCode, body: Vec<u8>) -> Response {
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(state.router.codec().content_type()));
    for (name, value) in [
        (X_REQUEST_ID, &meta.request_id),
        (X_RPC_SERVICE, &meta.service),
        (X_RPC_METHOD, &meta.method),
    ] {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    response
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
