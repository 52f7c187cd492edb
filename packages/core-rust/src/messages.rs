//! Wire messages exchanged on the data path and the control paths.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` so the JSON and
//! `MsgPack` (named) encodings carry the same field names.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;
use crate::status::NodeStatus;

/// Decoded form of one inbound `/rpc` call, prior to resolution.
///
/// `service` and `method` default to empty strings when absent so that a
/// missing name is reported as a protocol error rather than a decode error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, String>>,
}

/// Exactly one response is produced per resolved request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    pub request_id: String,
    pub success: bool,
    pub return_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
}

impl RpcResponse {
    /// Successful call carrying the method's return value.
    #[must_use]
    pub fn success(request_id: impl Into<String>, return_type: impl Into<String>, value: Value) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            return_type: return_type.into(),
            value: Some(value),
            exception: None,
        }
    }

    /// Failed call. `returnType` carries the error class and `exception`
    /// its serialized `{error, message}` description.
    #[must_use]
    pub fn failure(request_id: impl Into<String>, error: &RpcError) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            return_type: error.kind().to_string(),
            value: None,
            exception: Some(error.describe()),
        }
    }
}

/// Body of `/status`, `/offline` and `/online` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBody {
    pub status: NodeStatus,
}

/// Correlation fields echoed in response headers.
///
/// Fields are filled in as far as validation got before a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallMeta {
    pub request_id: String,
    pub service: String,
    pub method: String,
}
