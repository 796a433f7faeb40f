//! Per-request state.
//!
//! A [`RequestContext`] is created when a request arrives and dropped when its
//! response is written. It moves to the worker thread for the business method
//! and comes back with the result; it is never shared between requests.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::credentials::CredentialRecord;
use crate::error::HermesError;

/// A unique identifier for each request, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new time-ordered request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State owned by a single request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    path: String,
    peer: Option<SocketAddr>,
    method: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    credentials: CredentialRecord,
    required_properties: Option<Vec<String>>,
    raw_content: bool,
    started_at: Instant,
}

impl RequestContext {
    /// Creates a context for a request on `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            path: path.into(),
            peer: None,
            method: String::new(),
            args: Vec::new(),
            kwargs: Map::new(),
            credentials: CredentialRecord::new(),
            required_properties: None,
            raw_content: false,
            started_at: Instant::now(),
        }
    }

    /// Sets the peer address.
    #[must_use]
    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }

    /// Request identifier.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Peer address, when the transport knows it.
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Externally visible method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Sets the resolved method name.
    pub fn set_method(&mut self, method: impl Into<String>) {
        self.method = method.into();
    }

    /// Positional arguments.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Keyword arguments.
    #[must_use]
    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    /// Sets the resolved arguments.
    pub fn set_arguments(&mut self, args: Vec<Value>, kwargs: Map<String, Value>) {
        self.args = args;
        self.kwargs = kwargs;
    }

    /// Decodes positional argument `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, HermesError> {
        let value = self.args.get(index).ok_or_else(|| {
            HermesError::bad_request(format!(
                "{} expects argument {index}, got {}",
                self.method,
                self.args.len()
            ))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            HermesError::bad_request(format!("{} argument {index}: {e}", self.method))
        })
    }

    /// Decodes keyword argument `name`, if present.
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, HermesError> {
        self.kwargs
            .get(name)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| {
                    HermesError::bad_request(format!("{} argument {name}: {e}", self.method))
                })
            })
            .transpose()
    }

    /// Resolved identity.
    #[must_use]
    pub fn credentials(&self) -> &CredentialRecord {
        &self.credentials
    }

    /// Mutable access to the resolved identity.
    pub fn credentials_mut(&mut self) -> &mut CredentialRecord {
        &mut self.credentials
    }

    /// Sets the resolved identity.
    pub fn set_credentials(&mut self, credentials: CredentialRecord) {
        self.credentials = credentials;
    }

    /// Properties required to call the method, if any were declared.
    #[must_use]
    pub fn required_properties(&self) -> Option<&[String]> {
        self.required_properties.as_deref()
    }

    /// Sets the required properties.
    pub fn set_required_properties(&mut self, properties: Option<Vec<String>>) {
        self.required_properties = properties;
    }

    /// Whether the caller asked for raw content.
    #[must_use]
    pub fn raw_content(&self) -> bool {
        self.raw_content
    }

    /// Sets the raw-content flag.
    pub fn set_raw_content(&mut self, raw: bool) {
        self.raw_content = raw;
    }

    /// Time since the request arrived.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Peer and identity formatted as `(ip:port)[group:username]`.
    ///
    /// IPv6 addresses are bracketed.
    #[must_use]
    pub fn formatted_remote_credentials(&self) -> String {
        let peer = match self.peer {
            Some(SocketAddr::V4(addr)) => format!("{}:{}", addr.ip(), addr.port()),
            Some(SocketAddr::V6(addr)) => format!("[{}]:{}", addr.ip(), addr.port()),
            None => "unknown".to_string(),
        };
        format!("({peer}){}", self.credentials.formatted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_arg_decoding() {
        let mut ctx = RequestContext::new("/DataManagement/FileCatalog");
        ctx.set_method("listDirectory");
        ctx.set_arguments(vec![json!("/lhcb"), json!(2)], Map::new());

        let path: String = ctx.arg(0).unwrap();
        let depth: u32 = ctx.arg(1).unwrap();
        assert_eq!(path, "/lhcb");
        assert_eq!(depth, 2);

        let missing = ctx.arg::<String>(5).unwrap_err();
        assert!(missing.to_string().contains("listDirectory expects argument 5"));

        let wrong = ctx.arg::<u32>(0).unwrap_err();
        assert_eq!(wrong.category(), crate::ErrorCategory::BadRequest);
    }

    #[test]
    fn test_kwarg_decoding() {
        let mut ctx = RequestContext::new("/");
        let mut kwargs = Map::new();
        kwargs.insert("recursive".to_string(), json!(true));
        ctx.set_arguments(Vec::new(), kwargs);

        assert_eq!(ctx.kwarg::<bool>("recursive").unwrap(), Some(true));
        assert_eq!(ctx.kwarg::<bool>("absent").unwrap(), None);
    }

    #[test]
    fn test_formatted_remote_credentials() {
        let ctx = RequestContext::new("/")
            .with_peer(Some("10.0.0.7:40112".parse().unwrap()));
        assert_eq!(
            ctx.formatted_remote_credentials(),
            "(10.0.0.7:40112)[visitor:anonymous]"
        );

        let mut v6 = RequestContext::new("/").with_peer(Some("[::1]:8443".parse().unwrap()));
        v6.set_credentials(
            CredentialRecord::new()
                .with_group("dteam")
                .with_username("jdoe"),
        );
        assert_eq!(v6.formatted_remote_credentials(), "([::1]:8443)[dteam:jdoe]");
    }
}
