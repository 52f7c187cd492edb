//! Call resolution: decodes an envelope, resolves `(service, method)` against
//! the [`ServiceTable`] and binds positional parameters to the declared
//! parameter types.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tern_core::{CallMeta, Codec, RpcError, TypeSpec};
use tracing::debug;

use super::descriptor::{CallContext, ServiceTarget};
use super::table::ServiceTable;

// ---------------------------------------------------------------------------
// ResolvedRequest
// ---------------------------------------------------------------------------

/// A call that passed every validation step and is ready for dispatch.
///
/// Owned exclusively by the dispatcher task executing it.
#[derive(Clone)]
pub struct ResolvedRequest {
    pub request_id: String,
    pub service: String,
    pub method: String,
    pub param_types: Vec<TypeSpec>,
    pub return_type: TypeSpec,
    pub params: Vec<Value>,
    pub context: HashMap<String, String>,
    pub target: Arc<dyn ServiceTarget>,
}

impl ResolvedRequest {
    /// Correlation fields for response headers.
    #[must_use]
    pub fn meta(&self) -> CallMeta {
        CallMeta {
            request_id: self.request_id.clone(),
            service: self.service.clone(),
            method: self.method.clone(),
        }
    }

    /// Context handed to the target.
    #[must_use]
    pub fn call_context(&self) -> CallContext {
        CallContext {
            request_id: self.request_id.clone(),
            attachments: self.context.clone(),
        }
    }
}

impl fmt::Debug for ResolvedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedRequest")
            .field("request_id", &self.request_id)
            .field("service", &self.service)
            .field("method", &self.method)
            .field("param_types", &self.param_types)
            .field("return_type", &self.return_type)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// A validation failure together with whatever correlation data was known
/// when it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub meta: CallMeta,
    pub error: RpcError,
}

// ---------------------------------------------------------------------------
// RpcRouter
// ---------------------------------------------------------------------------

/// Resolves inbound `/rpc` bodies into [`ResolvedRequest`]s.
///
/// Validation order, first failure wins: empty body, envelope decode,
/// empty service, empty method, unknown service, missing target, unknown
/// method, arity, per-parameter binding. Methods resolve by name only; the
/// first declared method with a matching name is used even when the
/// service declares overloads.
#[derive(Debug, Clone)]
pub struct RpcRouter {
    table: Arc<ServiceTable>,
    codec: Arc<dyn Codec>,
}

impl RpcRouter {
    #[must_use]
    pub fn new(table: Arc<ServiceTable>, codec: Arc<dyn Codec>) -> Self {
        Self { table, codec }
    }

    #[must_use]
    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Decodes and resolves one call.
    ///
    /// `fallback_request_id` is used for correlation when the body cannot be
    /// decoded. A decoded envelope without a `requestId` gets a fresh UUID.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] describing the first failed validation step.
    pub fn resolve(&self, body: &[u8], fallback_request_id: &str) -> Result<ResolvedRequest, Rejection> {
        let mut meta = CallMeta {
            request_id: fallback_request_id.to_string(),
            ..CallMeta::default()
        };
        let reject = |meta: &CallMeta, error: RpcError| Rejection {
            meta: meta.clone(),
            error,
        };

        if body.is_empty() {
            return Err(reject(&meta, RpcError::Protocol("request body is empty".into())));
        }

        let envelope = self
            .codec
            .decode_envelope(body)
            .map_err(|e| reject(&meta, e.into()))?;

        meta.request_id = envelope
            .request_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        meta.service.clone_from(&envelope.service);
        meta.method.clone_from(&envelope.method);

        if envelope.service.is_empty() {
            return Err(reject(&meta, RpcError::Protocol("service name is empty".into())));
        }
        if envelope.method.is_empty() {
            return Err(reject(&meta, RpcError::Protocol("method name is empty".into())));
        }

        let descriptor = self.table.get(&envelope.service).ok_or_else(|| {
            reject(
                &meta,
                RpcError::NotFound(format!("not register service [{}]", envelope.service)),
            )
        })?;
        let target = descriptor.target.clone().ok_or_else(|| {
            reject(
                &meta,
                RpcError::NotFound(format!("no target bound for service [{}]", envelope.service)),
            )
        })?;
        let signature = target
            .methods()
            .iter()
            .find(|m| m.name == envelope.method)
            .cloned()
            .ok_or_else(|| {
                reject(
                    &meta,
                    RpcError::NotFound(format!("method [{}] not found", envelope.method)),
                )
            })?;

        if signature.params.len() != envelope.parameters.len() {
            return Err(reject(
                &meta,
                RpcError::Serialization(format!(
                    "method [{}] takes {} parameters, got {}",
                    signature.name,
                    signature.params.len(),
                    envelope.parameters.len()
                )),
            ));
        }

        let params = signature
            .params
            .iter()
            .zip(&envelope.parameters)
            .enumerate()
            .map(|(i, (ty, raw))| {
                ty.bind(raw).map_err(|e| {
                    reject(
                        &meta,
                        RpcError::Serialization(format!("parameter {i}: {e}")),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            request_id = %meta.request_id,
            service = %meta.service,
            method = %meta.method,
            "resolved rpc call"
        );

        Ok(ResolvedRequest {
            request_id: meta.request_id,
            service: envelope.service,
            method: envelope.method,
            param_types: signature.params,
            return_type: signature.returns,
            params,
            context: envelope.context.unwrap_or_default(),
            target,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
