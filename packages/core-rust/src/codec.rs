//! Pluggable envelope/response codecs.
//!
//! A [`Codec`] turns request bytes into a [`RequestEnvelope`] and a
//! [`RpcResponse`] back into bytes. Codecs are selected by name from a
//! closed set via [`codec_by_name`].

use std::fmt;
use std::sync::Arc;

use crate::messages::{RequestEnvelope, RpcResponse};

/// Name of the codec used when none is configured.
pub const DEFAULT_CODEC: &str = "json";

/// Encoding or decoding failure at the codec boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Wire codec for the data path.
///
/// Both directions are exposed so the same contract serves servers and
/// clients.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Registered name (e.g., `"json"`).
    fn name(&self) -> &'static str;

    /// MIME type placed in the `content-type` header.
    fn content_type(&self) -> &'static str;

    /// Decodes an inbound request body.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes are not a valid envelope.
    fn decode_envelope(&self, bytes: &[u8]) -> Result<RequestEnvelope, CodecError>;

    /// Encodes an outbound request body.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the envelope cannot be represented.
    fn encode_envelope(&self, envelope: &RequestEnvelope) -> Result<Vec<u8>, CodecError>;

    /// Encodes a response body.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if the response cannot be represented.
    fn encode_response(&self, response: &RpcResponse) -> Result<Vec<u8>, CodecError>;

    /// Decodes a response body.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] if the bytes are not a valid response.
    fn decode_response(&self, bytes: &[u8]) -> Result<RpcResponse, CodecError>;
}

/// JSON codec (`application/json`), the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn content_type(&self) -> &'static str {
        "application/json;charset=utf-8"
    }

    fn decode_envelope(&self, bytes: &[u8]) -> Result<RequestEnvelope, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode_envelope(&self, envelope: &RequestEnvelope) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(envelope).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn encode_response(&self, response: &RpcResponse) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(response).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<RpcResponse, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// `MsgPack` codec (`application/msgpack`) with named fields, so the map
/// keys match the JSON field names.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl Codec for MsgPackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn content_type(&self) -> &'static str {
        "application/msgpack"
    }

    fn decode_envelope(&self, bytes: &[u8]) -> Result<RequestEnvelope, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode_envelope(&self, envelope: &RequestEnvelope) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(envelope).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn encode_response(&self, response: &RpcResponse) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(response).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode_response(&self, bytes: &[u8]) -> Result<RpcResponse, CodecError> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Resolves a codec by name (case-insensitive). Returns `None` for names
/// outside the built-in set.
#[must_use]
pub fn codec_by_name(name: &str) -> Option<Arc<dyn Codec>> {
    match name.to_ascii_lowercase().as_str() {
        "json" => Some(Arc::new(JsonCodec)),
        "msgpack" => Some(Arc::new(MsgPackCodec)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::{json, Value};

    use super::*;
    use crate::types::TypeSpec;

    #[test]
    fn resolves_known_codecs() {
        assert_eq!(codec_by_name("json").unwrap().name(), "json");
        assert_eq!(codec_by_name("MsgPack").unwrap().name(), "msgpack");
        assert!(codec_by_name("kryo").is_none());
    }

    #[test]
    fn json_rejects_garbage() {
        let err = JsonCodec.decode_envelope(b"{not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn msgpack_envelope_keeps_field_names() {
        let env = RequestEnvelope {
            request_id: Some("r-9".into()),
            service: "UserService".into(),
            method: "getUser".into(),
            parameters: vec![json!(42), json!({"nested": [1, 2]})],
            context: None,
        };
        let bytes = MsgPackCodec.encode_envelope(&env).unwrap();
        let back = MsgPackCodec.decode_envelope(&bytes).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn typed_parameters_survive_decode_bind_encode() {
        let body = json!({
            "service": "S",
            "method": "m",
            "parameters": [7, "name", [1, 2, 3], {"a": {"b": [true, null]}}, 2.5]
        });
        let bytes = serde_json::to_vec(&body).unwrap();
        let env = JsonCodec.decode_envelope(&bytes).unwrap();
        let types = [
            TypeSpec::Long,
            TypeSpec::String,
            TypeSpec::list(TypeSpec::Int),
            TypeSpec::object("Nested"),
            TypeSpec::Double,
        ];
        let bound: Vec<Value> = types
            .iter()
            .zip(&env.parameters)
            .map(|(t, v)| t.bind(v).unwrap())
            .collect();
        let reencoded = JsonCodec
            .encode_envelope(&RequestEnvelope {
                parameters: bound,
                ..env
            })
            .unwrap();
        let reparsed: Value = serde_json::from_slice(&reencoded).unwrap();
        assert_eq!(reparsed["parameters"], body["parameters"]);
        assert!(reparsed["parameters"][0].is_i64());
        assert!(reparsed["parameters"][4].is_f64());
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            // Quarter steps keep the decimal form exact in both codecs.
            (-4_000_000i32..4_000_000).prop_map(|n| Value::from(f64::from(n) / 4.0)),
            "[a-z0-9 ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn parameter_lists_round_trip(params in prop::collection::vec(arb_value(), 0..5)) {
            let env = RequestEnvelope {
                request_id: None,
                service: "S".into(),
                method: "m".into(),
                parameters: params.clone(),
                context: None,
            };
            for codec in [codec_by_name("json").unwrap(), codec_by_name("msgpack").unwrap()] {
                let bytes = codec.encode_envelope(&env).unwrap();
                let decoded = codec.decode_envelope(&bytes).unwrap();
                let bound: Vec<Value> = decoded
                    .parameters
                    .iter()
                    .map(|v| TypeSpec::Any.bind(v).unwrap())
                    .collect();
                prop_assert_eq!(&bound, &params);
            }
        }
    }
}
