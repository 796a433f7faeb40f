//! Grants and the ordered grant chain.
//!
//! A grant is a named way of establishing who is calling. Handlers list the
//! grants they accept, in order; [`GrantChain::resolve`] tries them one by one
//! and returns the first identity it gets.
//!
//! ```
//! use hermes_auth::{GrantChain, GrantContext, IssuerMap};
//! use http::HeaderMap;
//! use serde_json::Map;
//!
//! let chain = GrantChain::with_builtin();
//! let headers = HeaderMap::new();
//! let args = Map::new();
//! let issuers = IssuerMap::default();
//! let ctx = GrantContext::new(&headers, &args, &issuers);
//!
//! let failure = chain.resolve(&["SSL", "JWT"], &ctx).unwrap_err();
//! assert_eq!(failure.reasons().len(), 2);
//!
//! let visitor = chain.resolve(&["SSL", "VISITOR"], &ctx).unwrap();
//! assert!(visitor.is_empty());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use hermes_core::CredentialRecord;
use tracing::debug;

use crate::certificate::CertificateGrant;
use crate::context::GrantContext;
use crate::error::{AuthenticationFailure, GrantError, GrantResult};
use crate::token::BearerTokenGrant;

/// Name of the certificate grant.
pub const SSL_GRANT: &str = "SSL";
/// Name of the bearer token grant.
pub const JWT_GRANT: &str = "JWT";
/// Name of the anonymous grant.
pub const VISITOR_GRANT: &str = "VISITOR";

/// A single authentication strategy.
pub trait Grant: Send + Sync {
    /// Tries to establish an identity for the request.
    ///
    /// # Errors
    ///
    /// Returns a [`GrantError`] describing why this strategy does not apply.
    fn authenticate(&self, ctx: &GrantContext<'_>) -> GrantResult<CredentialRecord>;
}

/// Anonymous access. Always succeeds with an empty record.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisitorGrant;

impl Grant for VisitorGrant {
    fn authenticate(&self, _ctx: &GrantContext<'_>) -> GrantResult<CredentialRecord> {
        Ok(CredentialRecord::new())
    }
}

/// Grants by name. Names are case-insensitive.
#[derive(Clone, Default)]
pub struct GrantRegistry {
    grants: HashMap<String, Arc<dyn Grant>>,
}

impl GrantRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in grants: `SSL` (alias `CERT`), `JWT` (alias `TOKEN`) and
    /// `VISITOR` (alias `ANONYMOUS`).
    #[must_use]
    pub fn with_builtin() -> Self {
        let ssl: Arc<dyn Grant> = Arc::new(CertificateGrant::default());
        let jwt: Arc<dyn Grant> = Arc::new(BearerTokenGrant);
        let visitor: Arc<dyn Grant> = Arc::new(VisitorGrant);

        let mut registry = Self::new();
        registry.register_arc(SSL_GRANT, Arc::clone(&ssl));
        registry.register_arc("CERT", ssl);
        registry.register_arc(JWT_GRANT, Arc::clone(&jwt));
        registry.register_arc("TOKEN", jwt);
        registry.register_arc(VISITOR_GRANT, Arc::clone(&visitor));
        registry.register_arc("ANONYMOUS", visitor);
        registry
    }

    /// Registers (or replaces) a grant.
    pub fn register<G: Grant + 'static>(&mut self, name: &str, grant: G) {
        self.register_arc(name, Arc::new(grant));
    }

    /// Registers (or replaces) a shared grant.
    pub fn register_arc(&mut self, name: &str, grant: Arc<dyn Grant>) {
        self.grants.insert(name.to_uppercase(), grant);
    }

    /// Looks a grant up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Grant>> {
        self.grants.get(&name.to_uppercase())
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.grants.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for GrantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantRegistry")
            .field("grants", &self.names())
            .finish()
    }
}

/// Ordered resolution over a [`GrantRegistry`].
#[derive(Debug, Clone)]
pub struct GrantChain {
    registry: Arc<GrantRegistry>,
}

impl GrantChain {
    /// Creates a chain over `registry`.
    #[must_use]
    pub fn new(registry: GrantRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// A chain over the built-in grants.
    #[must_use]
    pub fn with_builtin() -> Self {
        Self::new(GrantRegistry::with_builtin())
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &GrantRegistry {
        &self.registry
    }

    /// Tries each grant in order and returns the first identity obtained.
    ///
    /// An empty list means anonymous access. Unknown names count as a failed
    /// grant, not as a chain error.
    ///
    /// # Errors
    ///
    /// Returns [`AuthenticationFailure`] with one reason per grant when all of
    /// them fail.
    pub fn resolve<S: AsRef<str>>(
        &self,
        grants: &[S],
        ctx: &GrantContext<'_>,
    ) -> Result<CredentialRecord, AuthenticationFailure> {
        if grants.is_empty() {
            return Ok(CredentialRecord::new());
        }

        let mut reasons = Vec::new();
        for name in grants {
            let name = name.as_ref().to_uppercase();
            let outcome = self.registry.get(&name).map_or_else(
                || Err(GrantError::Unsupported(name.clone())),
                |grant| grant.authenticate(ctx),
            );

            match outcome {
                Ok(record) => {
                    for reason in &reasons {
                        debug!(reason = %reason, "Earlier grant did not apply");
                    }
                    debug!(grant = %name, "{name} authentication success.");
                    return Ok(record);
                }
                Err(e) => reasons.push(format!("{name} authentication: {e}")),
            }
        }

        Err(AuthenticationFailure::new(reasons))
    }
}

impl Default for GrantChain {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::tests::certificate_pem;
    use crate::certificate::{CERT_HEADER, VERIFY_HEADER};
    use crate::provider::IssuerMap;
    use http::header::AUTHORIZATION;
    use http::{HeaderMap, HeaderValue};
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resolve(
        chain: &GrantChain,
        grants: &[&str],
        headers: &HeaderMap,
    ) -> Result<CredentialRecord, AuthenticationFailure> {
        let args = Map::new();
        let issuers = IssuerMap::default();
        let ctx = GrantContext::new(headers, &args, &issuers);
        chain.resolve(grants, &ctx)
    }

    #[test]
    fn test_empty_chain_is_anonymous() {
        let record = resolve(&GrantChain::with_builtin(), &[], &HeaderMap::new()).unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn test_empty_chain_without_visitor_registered() {
        let chain = GrantChain::new(GrantRegistry::new());
        assert!(resolve(&chain, &[], &HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_all_fail_reports_every_reason() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer"));

        let failure = resolve(&GrantChain::with_builtin(), &["CERT", "TOKEN"], &headers).unwrap_err();
        assert_eq!(
            failure.reasons(),
            [
                "CERT authentication: Valid certificate not found.",
                "TOKEN authentication: Not found a bearer access token.",
            ]
        );
        assert!(failure.to_string().contains("; "));
    }

    #[test]
    fn test_unknown_grant_is_a_failed_step() {
        let record = resolve(
            &GrantChain::with_builtin(),
            &["kerberos", "visitor"],
            &HeaderMap::new(),
        )
        .unwrap();
        assert!(record.is_empty());

        let failure = resolve(&GrantChain::with_builtin(), &["kerberos"], &HeaderMap::new())
            .unwrap_err();
        assert_eq!(
            failure.reasons(),
            ["KERBEROS authentication: KERBEROS authentication type is not supported."]
        );
    }

    #[test]
    fn test_first_success_short_circuits() {
        struct Counting(Arc<AtomicUsize>);
        impl Grant for Counting {
            fn authenticate(&self, _: &GrantContext<'_>) -> GrantResult<CredentialRecord> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(CredentialRecord::new().with_username("later"))
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = GrantRegistry::with_builtin();
        registry.register("LATER", Counting(Arc::clone(&calls)));
        let chain = GrantChain::new(registry);

        let encoded = urlencoding::encode(&certificate_pem(&["Jane Doe"])).into_owned();
        let mut headers = HeaderMap::new();
        headers.insert(VERIFY_HEADER, HeaderValue::from_static("SUCCESS"));
        headers.insert(CERT_HEADER, HeaderValue::from_str(&encoded).unwrap());

        let record = resolve(&chain, &["SSL", "LATER"], &headers).unwrap();
        assert_eq!(record.dn(), Some("/O=Grid/CN=Jane Doe"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let record = resolve(&chain, &["JWT", "LATER"], &headers).unwrap();
        assert_eq!(record.username(), Some("later"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registry_names_are_case_insensitive() {
        let registry = GrantRegistry::with_builtin();
        assert!(registry.get("ssl").is_some());
        assert!(registry.get("Token").is_some());
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.names().len(), 6);
    }
}
