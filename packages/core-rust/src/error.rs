//! Data-path error taxonomy.
//!
//! Every variant maps to a stable class name placed in `returnType` and in
//! the serialized `exception` of a failed [`RpcResponse`](crate::RpcResponse).
//! Only the class and message reach the wire.

use serde_json::json;

use crate::codec::CodecError;
use crate::types::BindError;

/// Errors reported to callers of the `/rpc` data path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// Malformed envelope or missing service/method name.
    #[error("{0}")]
    Protocol(String),
    /// Service, target or method could not be resolved.
    #[error("{0}")]
    NotFound(String),
    /// The node is offline (or closing) and rejects data-path calls.
    #[error("the server has been offline")]
    Offline,
    /// A parameter or result could not be encoded or decoded.
    #[error("{0}")]
    Serialization(String),
    /// The business method failed or panicked.
    #[error("{0}")]
    Execution(String),
}

impl RpcError {
    /// Wire class name of this error.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "ProtocolError",
            Self::NotFound(_) => "NotFoundError",
            Self::Offline => "OfflineError",
            Self::Serialization(_) => "SerializationError",
            Self::Execution(_) => "ExecutionError",
        }
    }

    /// Serialized `{error, message}` description carried as `exception`.
    #[must_use]
    pub fn describe(&self) -> String {
        json!({ "error": self.kind(), "message": self.to_string() }).to_string()
    }
}

impl From<CodecError> for RpcError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Decode(msg) => Self::Protocol(format!("unable to identify the request format: {msg}")),
            CodecError::Encode(msg) => Self::Serialization(msg),
        }
    }
}

impl From<BindError> for RpcError {
    fn from(err: BindError) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let kinds = [
            RpcError::Protocol(String::new()).kind(),
            RpcError::NotFound(String::new()).kind(),
            RpcError::Offline.kind(),
            RpcError::Serialization(String::new()).kind(),
            RpcError::Execution(String::new()).kind(),
        ];
        let mut dedup = kinds.to_vec();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), kinds.len());
    }

    #[test]
    fn describe_is_json() {
        let err = RpcError::NotFound("not register service [Nope]".into());
        let v: Value = serde_json::from_str(&err.describe()).unwrap();
        assert_eq!(v["error"], "NotFoundError");
        assert_eq!(v["message"], "not register service [Nope]");
    }

    #[test]
    fn decode_failure_is_protocol_error() {
        let err: RpcError = CodecError::Decode("eof".into()).into();
        assert_eq!(err.kind(), "ProtocolError");
    }

    #[test]
    fn bind_failure_is_serialization_error() {
        let err: RpcError = BindError::Mismatch {
            expected: "long".into(),
            found: "string",
        }
        .into();
        assert_eq!(err.kind(), "SerializationError");
    }
}
