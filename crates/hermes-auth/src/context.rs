//! What a grant gets to look at.

use http::HeaderMap;
use serde_json::{Map, Value};

use crate::provider::IssuerMap;

/// Request argument carrying opaque extra credentials.
pub const EXTRA_CREDENTIALS_ARG: &str = "extraCredentials";

/// Peer certificate chain captured by an in-process TLS acceptor.
///
/// Inserted as a request extension; PEM blocks in chain order, leaf first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerCertificates {
    chain: Vec<String>,
}

impl PeerCertificates {
    /// Wraps a PEM chain.
    #[must_use]
    pub fn new(chain: Vec<String>) -> Self {
        Self { chain }
    }

    /// Returns `true` if no certificate was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// The chain as one PEM document.
    #[must_use]
    pub fn as_pem(&self) -> String {
        self.chain.concat()
    }
}

/// Borrowed view of one request, shared by every grant in the chain.
#[derive(Debug, Clone, Copy)]
pub struct GrantContext<'a> {
    headers: &'a HeaderMap,
    peer_certificates: Option<&'a PeerCertificates>,
    arguments: &'a Map<String, Value>,
    issuers: &'a IssuerMap,
}

impl<'a> GrantContext<'a> {
    /// Creates a context over request headers, decoded arguments and the
    /// handler's loaded identity providers.
    #[must_use]
    pub fn new(
        headers: &'a HeaderMap,
        arguments: &'a Map<String, Value>,
        issuers: &'a IssuerMap,
    ) -> Self {
        Self {
            headers,
            peer_certificates: None,
            arguments,
            issuers,
        }
    }

    /// Attaches the TLS peer chain.
    #[must_use]
    pub fn with_peer_certificates(mut self, certificates: Option<&'a PeerCertificates>) -> Self {
        self.peer_certificates = certificates;
        self
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &'a HeaderMap {
        self.headers
    }

    /// A header as text; `None` if absent or not visible ASCII.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The TLS peer chain, if the connection carried one.
    #[must_use]
    pub fn peer_certificates(&self) -> Option<&'a PeerCertificates> {
        self.peer_certificates.filter(|c| !c.is_empty())
    }

    /// Decoded request arguments.
    #[must_use]
    pub fn arguments(&self) -> &'a Map<String, Value> {
        self.arguments
    }

    /// Identity providers keyed by normalized issuer.
    #[must_use]
    pub fn issuers(&self) -> &'a IssuerMap {
        self.issuers
    }

    /// The `extraCredentials` argument, decoded.
    ///
    /// JSON text is parsed; anything that does not parse is kept as a plain
    /// string. Empty values yield `None`.
    #[must_use]
    pub fn extra_credentials(&self) -> Option<Value> {
        match self.arguments.get(EXTRA_CREDENTIALS_ARG)? {
            Value::Null => None,
            Value::String(text) if text.is_empty() => None,
            Value::String(text) => {
                Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone())))
            }
            other => Some(other.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(EXTRA_CREDENTIALS_ARG.to_string(), value);
        map
    }

    #[test]
    fn test_extra_credentials_json() {
        let headers = HeaderMap::new();
        let issuers = IssuerMap::default();
        let arguments = args(json!(r#"{"proxy": true}"#));
        let ctx = GrantContext::new(&headers, &arguments, &issuers);
        assert_eq!(ctx.extra_credentials(), Some(json!({"proxy": true})));
    }

    #[test]
    fn test_extra_credentials_plain_string() {
        let headers = HeaderMap::new();
        let issuers = IssuerMap::default();
        let arguments = args(json!("hosts"));
        let ctx = GrantContext::new(&headers, &arguments, &issuers);
        assert_eq!(ctx.extra_credentials(), Some(json!("hosts")));
    }

    #[test]
    fn test_extra_credentials_empty() {
        let headers = HeaderMap::new();
        let issuers = IssuerMap::default();
        let arguments = args(json!(""));
        let ctx = GrantContext::new(&headers, &arguments, &issuers);
        assert_eq!(ctx.extra_credentials(), None);

        let none = Map::new();
        let ctx = GrantContext::new(&headers, &none, &issuers);
        assert_eq!(ctx.extra_credentials(), None);
    }

    #[test]
    fn test_empty_peer_chain_is_ignored() {
        let headers = HeaderMap::new();
        let issuers = IssuerMap::default();
        let arguments = Map::new();
        let empty = PeerCertificates::default();
        let ctx = GrantContext::new(&headers, &arguments, &issuers)
            .with_peer_certificates(Some(&empty));
        assert!(ctx.peer_certificates().is_none());
    }
}
