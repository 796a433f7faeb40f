//! What a business method hands back.
//!
//! [`MethodResult`] is a tagged union over the shapes the response finisher
//! knows how to write. Methods usually return something convertible into it:
//!
//! ```
//! use hermes_core::{returns, MethodResult};
//!
//! let structured: MethodResult = returns::ok(serde_json::json!([1, 2, 3])).into();
//! let text: MethodResult = "pong".into();
//! let nothing: MethodResult = ().into();
//!
//! assert!(matches!(structured, MethodResult::Value(_)));
//! assert!(matches!(text, MethodResult::Text(_)));
//! assert!(matches!(nothing, MethodResult::Empty));
//! ```

use bytes::Bytes;
use serde_json::Value;

use crate::deferred::DeferredResponse;

/// Result of a business method.
#[derive(Debug)]
pub enum MethodResult {
    /// Structured value, encoded by the codec.
    Value(Value),
    /// No value; the response completes with an empty body.
    Empty,
    /// Recorded transport operations to replay on the coordinator.
    Deferred(DeferredResponse),
    /// Raw bytes, sent as an octet stream.
    Raw(Bytes),
    /// Plain text, sent without a forced content type.
    Text(String),
}

impl From<Value> for MethodResult {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl MethodResult {
    /// Drops diagnostic keys from every structured value this result would
    /// send. Raw bytes and text are left alone.
    pub fn strip_diagnostics(&mut self) {
        match self {
            Self::Value(value) => crate::codec::strip_diagnostics(value),
            Self::Deferred(deferred) => deferred.strip_diagnostics(),
            Self::Empty | Self::Raw(_) | Self::Text(_) => {}
        }
    }
}

impl From<()> for MethodResult {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

impl From<Option<Value>> for MethodResult {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Self::Empty, Self::Value)
    }
}

impl From<DeferredResponse> for MethodResult {
    fn from(value: DeferredResponse) -> Self {
        Self::Deferred(value)
    }
}

impl From<Bytes> for MethodResult {
    fn from(value: Bytes) -> Self {
        Self::Raw(value)
    }
}

impl From<Vec<u8>> for MethodResult {
    fn from(value: Vec<u8>) -> Self {
        Self::Raw(Bytes::from(value))
    }
}

impl From<String> for MethodResult {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for MethodResult {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Return structures: `{"OK": true, "Value": ..}` and
/// `{"OK": false, "Message": ..}`.
pub mod returns {
    use serde_json::{json, Value};

    use crate::codec::CALL_STACK_KEY;

    /// Builds a success structure.
    #[must_use]
    pub fn ok(value: Value) -> Value {
        json!({ "OK": true, "Value": value })
    }

    /// Builds a failure structure.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Value {
        json!({ "OK": false, "Message": message.into() })
    }

    /// Builds a failure structure that records where it was constructed.
    ///
    /// The call stack is diagnostic only and is stripped before encoding.
    #[must_use]
    pub fn error_with_stack(message: impl Into<String>, stack: Vec<String>) -> Value {
        let mut value = error(message);
        if let Value::Object(map) = &mut value {
            map.insert(CALL_STACK_KEY.to_string(), Value::from(stack));
        }
        value
    }

    /// Reads the outcome of a return structure.
    ///
    /// `None` if `value` is not a return structure; otherwise `Ok(())` or
    /// `Err(message)`.
    #[must_use]
    pub fn outcome(value: &Value) -> Option<Result<(), String>> {
        let ok = value.as_object()?.get("OK")?.as_bool()?;
        if ok {
            Some(Ok(()))
        } else {
            let message = value
                .get("Message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(Err(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{has_diagnostics, strip_diagnostics};

    #[test]
    fn test_outcome_classification() {
        assert_eq!(returns::outcome(&returns::ok(Value::Null)), Some(Ok(())));
        assert_eq!(
            returns::outcome(&returns::error("no such file")),
            Some(Err("no such file".to_string()))
        );
        assert_eq!(returns::outcome(&serde_json::json!({"files": []})), None);
        assert_eq!(returns::outcome(&serde_json::json!("text")), None);
    }

    #[test]
    fn test_error_with_stack_is_strippable() {
        let mut value = returns::error_with_stack("boom", vec!["frame 1".to_string()]);
        assert!(has_diagnostics(&value));
        strip_diagnostics(&mut value);
        assert!(!has_diagnostics(&value));
        assert_eq!(value["Message"], "boom");
    }

    #[test]
    fn test_conversions() {
        assert!(matches!(MethodResult::from(None::<Value>), MethodResult::Empty));
        assert!(matches!(
            MethodResult::from(vec![0_u8, 1]),
            MethodResult::Raw(_)
        ));
        assert!(matches!(
            MethodResult::from(DeferredResponse::empty()),
            MethodResult::Deferred(_)
        ));
    }
}
