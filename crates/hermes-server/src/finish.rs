//! Completing responses on the coordinator.
//!
//! [`finish_result`] turns a [`MethodResult`] into a response. Diagnostic
//! keys are stripped first, then the first matching rule wins:
//!
//! 1. a deferred response is replayed
//! 2. an empty result completes with an empty body
//! 3. a raw-content request, or raw bytes, goes out as an octet stream
//! 4. text is written as-is
//! 5. anything else is encoded by the writer's codec
//!
//! Per-method finishers replace these rules. They receive an already
//! stripped result.

use bytes::Bytes;
use hermes_core::{
    returns, HermesError, MethodResult, Payload, ResponseWriter, TransportError, OCTET_STREAM,
};
use http::header::CONTENT_TYPE;
use http::StatusCode;
use serde_json::Value;

/// Writes `result` into `writer` and completes it.
///
/// Returns the structured value that was sent, if any, for outcome
/// classification.
///
/// # Errors
///
/// Returns [`TransportError`] when a replayed operation is invalid or the
/// writer is already complete.
pub fn finish_result(
    mut result: MethodResult,
    raw_content: bool,
    writer: &mut ResponseWriter,
) -> Result<Option<Value>, TransportError> {
    result.strip_diagnostics();
    match result {
        MethodResult::Deferred(deferred) => {
            deferred.replay(writer)?;
            Ok(None)
        }
        MethodResult::Empty => {
            writer.finish(None)?;
            Ok(None)
        }
        MethodResult::Raw(bytes) => {
            finish_raw(bytes, writer)?;
            Ok(None)
        }
        MethodResult::Text(text) if raw_content => {
            finish_raw(Bytes::from(text), writer)?;
            Ok(None)
        }
        MethodResult::Value(value) if raw_content => {
            let bytes = match value {
                Value::String(text) => Bytes::from(text),
                other => writer.codec().encode(&other)?,
            };
            finish_raw(bytes, writer)?;
            Ok(None)
        }
        MethodResult::Text(text) => {
            writer.finish(Some(Payload::Text(text)))?;
            Ok(None)
        }
        MethodResult::Value(value) => {
            writer.finish(Some(Payload::Structured(value.clone())))?;
            Ok(Some(value))
        }
    }
}

fn finish_raw(bytes: Bytes, writer: &mut ResponseWriter) -> Result<(), TransportError> {
    writer.set_header(CONTENT_TYPE.as_str(), OCTET_STREAM)?;
    writer.finish(Some(Payload::Bytes(bytes)))
}

/// Writes the client envelope for `error`.
///
/// A writer that is already complete is left untouched.
pub fn finish_error(
    error: &HermesError,
    request_id: Option<&str>,
    writer: &mut ResponseWriter,
) -> Result<(), TransportError> {
    if writer.is_finished() {
        return Ok(());
    }
    let envelope = serde_json::to_value(error.to_envelope(request_id))?;
    writer.set_status(error.status_code())?;
    writer.finish(Some(Payload::Structured(envelope)))
}

/// Outcome label for the request log.
///
/// Error statuses win over the payload. A return structure classifies by
/// its `OK` flag; anything else is `OK <status>`.
///
/// ```
/// use hermes_server::finish::classify;
/// use http::StatusCode;
/// use serde_json::json;
///
/// assert_eq!(classify(StatusCode::OK, Some(&json!({"OK": true, "Value": 1}))), "OK");
/// assert_eq!(
///     classify(StatusCode::OK, Some(&json!({"OK": false, "Message": "no such file"}))),
///     "ERROR: no such file"
/// );
/// assert_eq!(classify(StatusCode::FORBIDDEN, None), "ERROR 403: Forbidden");
/// assert_eq!(classify(StatusCode::NO_CONTENT, None), "OK 204");
/// ```
pub fn classify(status: StatusCode, structured: Option<&Value>) -> String {
    if status.as_u16() >= 400 {
        return format!(
            "ERROR {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        );
    }
    match structured.and_then(returns::outcome) {
        Some(Ok(())) => "OK".to_string(),
        Some(Err(message)) => format!("ERROR: {message}"),
        None => format!("OK {}", status.as_u16()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::DeferredResponse;
    use serde_json::json;

    fn content_type(writer: &ResponseWriter) -> Option<&str> {
        writer.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    #[test]
    fn test_empty_result() {
        let mut writer = ResponseWriter::new();
        finish_result(MethodResult::Empty, false, &mut writer).unwrap();
        assert!(writer.is_finished());
        assert!(writer.body().is_empty());
        assert_eq!(content_type(&writer), None);
    }

    #[test]
    fn test_raw_bytes() {
        let data = Bytes::from_static(&[0, 159, 146, 150, 255]);
        let mut writer = ResponseWriter::new();
        finish_result(MethodResult::Raw(data.clone()), true, &mut writer).unwrap();
        assert_eq!(content_type(&writer), Some(OCTET_STREAM));
        assert_eq!(writer.body(), &data[..]);
    }

    #[test]
    fn test_raw_flag_on_text_and_values() {
        let mut writer = ResponseWriter::new();
        finish_result(MethodResult::Text("line\n".into()), true, &mut writer).unwrap();
        assert_eq!(content_type(&writer), Some(OCTET_STREAM));
        assert_eq!(writer.body(), b"line\n");

        let mut writer = ResponseWriter::new();
        finish_result(json!("file contents").into(), true, &mut writer).unwrap();
        assert_eq!(writer.body(), b"file contents");
    }

    #[test]
    fn test_text_keeps_content_type() {
        let mut writer = ResponseWriter::new();
        writer.set_header("content-type", "text/html").unwrap();
        finish_result(MethodResult::Text("<p>hi</p>".into()), false, &mut writer).unwrap();
        assert_eq!(content_type(&writer), Some("text/html"));
        assert_eq!(writer.body(), b"<p>hi</p>");
    }

    #[test]
    fn test_structured_strips_diagnostics() {
        let mut writer = ResponseWriter::new();
        let result = returns::error_with_stack("boom", vec!["frame".into()]);
        let mut with_trace = result.clone();
        with_trace["ExecInfo"] = json!(["Traceback"]);

        let sent = finish_result(with_trace.into(), false, &mut writer).unwrap().unwrap();
        assert_eq!(content_type(&writer), Some("application/json"));
        assert!(sent.get("CallStack").is_none());
        assert!(sent.get("ExecInfo").is_none());

        let body: Value = serde_json::from_slice(writer.body()).unwrap();
        assert_eq!(body, json!({"OK": false, "Message": "boom"}));
    }

    #[test]
    fn test_raw_structured_strips_diagnostics() {
        let mut failure = returns::error_with_stack("boom", vec!["frame 1".into()]);
        failure["ExecInfo"] = json!(["Traceback"]);

        let mut writer = ResponseWriter::new();
        finish_result(failure.into(), true, &mut writer).unwrap();
        assert_eq!(content_type(&writer), Some(OCTET_STREAM));
        let body: Value = serde_json::from_slice(writer.body()).unwrap();
        assert_eq!(body, json!({"OK": false, "Message": "boom"}));
    }

    #[test]
    fn test_deferred_payload_strips_diagnostics() {
        let mut failure = returns::error_with_stack("boom", vec!["frame 1".into()]);
        failure["ExecInfo"] = json!(["Traceback"]);

        let mut writer = ResponseWriter::new();
        finish_result(DeferredResponse::new(failure).into(), false, &mut writer).unwrap();
        let body: Value = serde_json::from_slice(writer.body()).unwrap();
        assert_eq!(body, json!({"OK": false, "Message": "boom"}));
    }

    #[test]
    fn test_deferred_replay() {
        let deferred = DeferredResponse::new("created")
            .with_status(StatusCode::CREATED)
            .set_header("x-request-state", "stored");
        let mut writer = ResponseWriter::new();
        finish_result(deferred.into(), true, &mut writer).unwrap();
        assert_eq!(writer.status(), StatusCode::CREATED);
        assert_eq!(writer.body(), b"created");
        // Raw flag does not apply to deferred responses.
        assert_eq!(content_type(&writer), None);
    }

    #[test]
    fn test_error_envelope() {
        let mut writer = ResponseWriter::new();
        finish_error(&HermesError::not_implemented("nope"), Some("req-1"), &mut writer).unwrap();
        assert_eq!(writer.status(), StatusCode::NOT_IMPLEMENTED);
        let body: Value = serde_json::from_slice(writer.body()).unwrap();
        assert_eq!(body["error"]["code"], "NOT_IMPLEMENTED");
        assert_eq!(body["request_id"], "req-1");
    }

    #[test]
    fn test_error_after_finish_is_noop() {
        let mut writer = ResponseWriter::new();
        writer.finish(Some("partial".into())).unwrap();
        finish_error(&HermesError::internal("late"), None, &mut writer).unwrap();
        assert_eq!(writer.status(), StatusCode::OK);
        assert_eq!(writer.body(), b"partial");
    }

    #[test]
    fn test_status_beats_payload() {
        let ok = json!({"OK": true, "Value": null});
        assert_eq!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, Some(&ok)),
            "ERROR 500: Internal Server Error"
        );
        assert_eq!(classify(StatusCode::OK, Some(&json!([1, 2]))), "OK 200");
    }
}
