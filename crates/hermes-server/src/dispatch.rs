//! Request decoding and the default RPC dispatch shape.
//!
//! [`IncomingRequest`] is the transport-neutral view of an HTTP request.
//! [`RequestArguments`] merges its query string and form (or JSON object)
//! body into one argument map, body values winning.
//!
//! The default dispatch shape reads the method from the `method` argument
//! and positional arguments from `args`, a JSON array. Everything else,
//! minus the reserved names, becomes a keyword argument.

use std::net::SocketAddr;

use bytes::Bytes;
use hermes_auth::{PeerCertificates, EXTRA_CREDENTIALS_ARG};
use hermes_core::{HermesError, HermesResult, JsonCodec, StructuredCodec};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method};
use serde_json::{Map, Value};

/// Argument carrying the method name.
pub const METHOD_ARG: &str = "method";

/// Argument carrying the positional arguments.
pub const ARGS_ARG: &str = "args";

/// Argument asking for an unencoded response body.
pub const RAW_CONTENT_ARG: &str = "rawContent";

const RESERVED: [&str; 4] = [METHOD_ARG, ARGS_ARG, RAW_CONTENT_ARG, EXTRA_CREDENTIALS_ARG];

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// A request as the lifecycle sees it.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    /// HTTP method.
    pub method: Method,
    /// URL path.
    pub path: String,
    /// Raw query string, without the `?`.
    pub query: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Collected body.
    pub body: Bytes,
    /// Remote address.
    pub peer: Option<SocketAddr>,
    /// Client certificate chain from an in-process TLS acceptor.
    pub peer_certificates: Option<PeerCertificates>,
}

impl IncomingRequest {
    /// Creates a request for `target` (`/path?query`).
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        Self {
            method,
            path: path.to_string(),
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            peer: None,
            peer_certificates: None,
        }
    }

    /// A `POST` with a form-encoded body.
    pub fn form(target: &str, fields: &[(&str, &str)]) -> Self {
        // String pairs always serialize.
        let body = serde_urlencoded::to_string(fields).unwrap_or_default();
        Self::new(Method::POST, target)
            .with_header(CONTENT_TYPE.as_str(), FORM_CONTENT_TYPE)
            .with_body(body)
    }

    /// Adds a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the remote address.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Sets the client certificate chain.
    pub fn with_peer_certificates(mut self, certificates: PeerCertificates) -> Self {
        self.peer_certificates = Some(certificates);
        self
    }

    fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }
}

/// Decoded request arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestArguments {
    path: String,
    values: Map<String, Value>,
}

impl RequestArguments {
    /// Wraps an already decoded argument map.
    pub fn new(path: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            path: path.into(),
            values,
        }
    }

    /// Decodes the query string and body of `request`.
    ///
    /// # Errors
    ///
    /// Returns a bad-request error for an undecodable form or a JSON body that
    /// is not an object.
    pub fn parse(request: &IncomingRequest) -> HermesResult<Self> {
        let mut values = Map::new();
        if let Some(query) = &request.query {
            insert_pairs(serde_urlencoded::from_str(query), &mut values)?;
        }

        if !request.body.is_empty() {
            match request.content_type() {
                Some(ct) if ct.eq_ignore_ascii_case(FORM_CONTENT_TYPE) => {
                    insert_pairs(serde_urlencoded::from_bytes(&request.body), &mut values)?;
                }
                Some(ct) if ct.eq_ignore_ascii_case(JSON_CONTENT_TYPE) => {
                    match JsonCodec.decode(&request.body) {
                        Ok(Value::Object(object)) => values.extend(object),
                        Ok(_) => {
                            return Err(HermesError::bad_request("JSON body must be an object"));
                        }
                        Err(e) => {
                            return Err(HermesError::bad_request(format!("Invalid JSON body: {e}")));
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(Self::new(request.path.clone(), values))
    }

    /// Request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Every argument.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Raw argument value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Argument as a string, if it is one.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    /// Whether the caller asked for an unencoded body.
    ///
    /// Any value other than an empty string, `0` or `false` counts.
    pub fn raw_content(&self) -> bool {
        match self.values.get(RAW_CONTENT_ARG) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(s)) => {
                let s = s.trim();
                !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
            }
            Some(Value::Number(n)) => n.as_f64() != Some(0.0),
            Some(_) => true,
        }
    }
}

// Later keys overwrite earlier ones.
fn insert_pairs(
    decoded: Result<Vec<(String, String)>, serde_urlencoded::de::Error>,
    values: &mut Map<String, Value>,
) -> HermesResult<()> {
    let pairs = decoded
        .map_err(|e| HermesError::bad_request(format!("Malformed argument encoding: {e}")))?;
    for (key, value) in pairs {
        values.insert(key, Value::String(value));
    }
    Ok(())
}

/// Default method name: the `method` argument.
///
/// # Errors
///
/// Returns a bad-request error when the argument is missing.
pub fn default_method_name(arguments: &RequestArguments) -> HermesResult<String> {
    arguments
        .get_str(METHOD_ARG)
        .map(str::to_string)
        .ok_or_else(|| HermesError::bad_request("Missing argument method"))
}

/// Default positional and keyword arguments.
///
/// `args` may be a JSON array or a string holding one; a missing `args`
/// means no positional arguments.
///
/// # Errors
///
/// Returns a bad-request error when `args` is not an array.
pub fn default_method_args(
    arguments: &RequestArguments,
) -> HermesResult<(Vec<Value>, Map<String, Value>)> {
    let args = match arguments.get(ARGS_ARG) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Array(items)) => items,
            Ok(_) => return Err(HermesError::bad_request("args must be a JSON array")),
            Err(e) => return Err(HermesError::bad_request(format!("Cannot decode args: {e}"))),
        },
        Some(_) => return Err(HermesError::bad_request("args must be a JSON array")),
    };

    let kwargs = arguments
        .as_map()
        .iter()
        .filter(|(name, _)| !RESERVED.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    Ok((args, kwargs))
}
