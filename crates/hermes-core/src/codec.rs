//! Structured payload encoding.
//!
//! The coordinator treats the wire encoding as a black box behind
//! [`StructuredCodec`]. [`JsonCodec`] is the default.
//!
//! Two diagnostic keys are internal-only and are removed by
//! [`strip_diagnostics`] before anything is encoded for a client.

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

/// Key carrying an execution trace on failure values.
pub const EXEC_INFO_KEY: &str = "ExecInfo";

/// Key carrying a call stack on constructed error values.
pub const CALL_STACK_KEY: &str = "CallStack";

/// Codec failure.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Encoding failed.
    #[error("encode failed: {0}")]
    Encode(String),
    /// Decoding failed.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Encodes and decodes structured values.
pub trait StructuredCodec: Send + Sync {
    /// Content type announced for encoded bodies.
    fn content_type(&self) -> &'static str;

    /// Encodes a value.
    fn encode(&self, value: &Value) -> Result<Bytes, CodecError>;

    /// Decodes a value.
    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl StructuredCodec for JsonCodec {
    fn content_type(&self) -> &'static str {
        crate::transport::STRUCTURED_CONTENT_TYPE
    }

    fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Removes diagnostic keys from every object in `value`, at any depth.
pub fn strip_diagnostics(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove(EXEC_INFO_KEY);
            map.remove(CALL_STACK_KEY);
            for nested in map.values_mut() {
                strip_diagnostics(nested);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_diagnostics(item);
            }
        }
        _ => {}
    }
}

/// Returns `true` if any object in `value` still carries a diagnostic key.
#[must_use]
pub fn has_diagnostics(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key(EXEC_INFO_KEY)
                || map.contains_key(CALL_STACK_KEY)
                || map.values().any(has_diagnostics)
        }
        Value::Array(items) => items.iter().any(has_diagnostics),
        _ => false,
    }
}
