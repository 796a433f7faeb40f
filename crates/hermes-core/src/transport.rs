//! The response transport object.
//!
//! [`ResponseWriter`] is the only thing that writes the reply for a request.
//! It belongs to the coordinator: the type is neither `Send` nor `Sync`, so it
//! cannot be handed to a worker thread. Business code that needs transport
//! operations records them in a [`DeferredResponse`](crate::DeferredResponse)
//! instead, and the coordinator replays them here.
//!
//! Once [`ResponseWriter::finish`] has run, every further mutation fails with
//! [`TransportError::AlreadyFinished`].
//!
//! Structured payloads go through the writer's [`StructuredCodec`] and lose
//! their diagnostic keys on the way, whichever path wrote them.

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, Response, StatusCode};
use http_body_util::Full;
use serde_json::Value;
use thiserror::Error;

use crate::codec::{strip_diagnostics, CodecError, JsonCodec, StructuredCodec};

/// Content type for structured (JSON) bodies.
pub const STRUCTURED_CONTENT_TYPE: &str = "application/json";

/// Content type for raw byte bodies.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Errors raised by transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The response was already completed.
    #[error("response already finished")]
    AlreadyFinished,

    /// A header name or value was not valid HTTP.
    #[error("invalid header {name}: {reason}")]
    InvalidHeader {
        /// The offending header name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An error envelope could not be converted to a structured value.
    #[error("failed to build payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// The codec rejected a structured payload.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A body handed to [`ResponseWriter::finish`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Bytes written as-is.
    Bytes(Bytes),
    /// UTF-8 text written as-is.
    Text(String),
    /// Structured value, encoded by the writer's codec.
    Structured(Value),
}

impl Payload {
    /// Drops diagnostic keys from a structured payload.
    pub fn strip_diagnostics(&mut self) {
        if let Self::Structured(value) = self {
            strip_diagnostics(value);
        }
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

/// Coordinator-owned response under construction.
///
/// # Example
///
/// ```
/// use hermes_core::ResponseWriter;
/// use http::StatusCode;
///
/// let mut writer = ResponseWriter::new();
/// writer.set_status(StatusCode::ACCEPTED).unwrap();
/// writer.set_header("x-hermes", "1").unwrap();
/// writer.finish(Some("queued".into())).unwrap();
///
/// assert!(writer.is_finished());
/// assert!(writer.write("late").is_err());
///
/// let response = writer.into_response();
/// assert_eq!(response.status(), StatusCode::ACCEPTED);
/// ```
pub struct ResponseWriter {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    finished: bool,
    codec: Arc<dyn StructuredCodec>,
    // Pins the writer to the thread that created it.
    _coordinator: PhantomData<*const ()>,
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("finished", &self.finished)
            .field("content_type", &self.codec.content_type())
            .finish()
    }
}

impl ResponseWriter {
    /// Creates an empty `200 OK` response encoding structured payloads as
    /// JSON.
    #[must_use]
    pub fn new() -> Self {
        Self::with_codec(Arc::new(JsonCodec))
    }

    /// Creates an empty `200 OK` response using `codec` for structured
    /// payloads.
    #[must_use]
    pub fn with_codec(codec: Arc<dyn StructuredCodec>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            finished: false,
            codec,
            _coordinator: PhantomData,
        }
    }

    /// Codec used for structured payloads.
    #[must_use]
    pub fn codec(&self) -> &dyn StructuredCodec {
        self.codec.as_ref()
    }

    /// Returns `true` once the response has been completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Current headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Body written so far.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Sets the response status.
    pub fn set_status(&mut self, status: StatusCode) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.status = status;
        Ok(())
    }

    /// Sets a header, replacing existing values.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Appends a header value.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        let (name, value) = parse_header(name, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Removes every value of a header.
    pub fn clear_header(&mut self, name: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.headers.remove(name);
        Ok(())
    }

    /// Appends a chunk to the body.
    pub fn write(&mut self, chunk: impl Into<Payload>) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.append(chunk.into())
    }

    /// Redirects and completes the response.
    pub fn redirect(&mut self, location: &str, status: StatusCode) -> Result<(), TransportError> {
        self.ensure_open()?;
        let value = HeaderValue::from_str(location).map_err(|e| TransportError::InvalidHeader {
            name: LOCATION.to_string(),
            reason: e.to_string(),
        })?;
        self.status = status;
        self.headers.insert(LOCATION, value);
        self.finish(None)
    }

    /// Completes the response with a JSON error body.
    pub fn send_error(&mut self, status: StatusCode, message: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.status = status;
        self.body.clear();
        let envelope = crate::HermesError::http(status, message).to_envelope(None);
        self.finish(Some(Payload::Structured(serde_json::to_value(envelope)?)))
    }

    /// Writes the optional final chunk and completes the response.
    pub fn finish(&mut self, payload: Option<Payload>) -> Result<(), TransportError> {
        self.ensure_open()?;
        if let Some(payload) = payload {
            self.append(payload)?;
        }
        self.finished = true;
        Ok(())
    }

    /// Converts into an HTTP response.
    #[must_use]
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.finished {
            Err(TransportError::AlreadyFinished)
        } else {
            Ok(())
        }
    }

    fn append(&mut self, payload: Payload) -> Result<(), TransportError> {
        match payload {
            Payload::Bytes(bytes) => self.body.extend_from_slice(&bytes),
            Payload::Text(text) => self.body.extend_from_slice(text.as_bytes()),
            Payload::Structured(mut value) => {
                strip_diagnostics(&mut value);
                let encoded = self.codec.encode(&value)?;
                self.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static(self.codec.content_type()));
                self.body.extend_from_slice(&encoded);
            }
        }
        Ok(())
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), TransportError> {
    let header_name =
        HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::InvalidHeader {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    let header_value = HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    Ok((header_name, header_value))
}
