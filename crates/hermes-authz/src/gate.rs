//! The authorization gate.

use std::sync::Arc;

use hermes_core::{CredentialRecord, HermesError, HermesResult};
use tracing::warn;

use crate::engine::PolicyEngine;

/// Checks a resolved identity against the policy engine of one component.
///
/// Runs after the grant chain has produced a record (possibly empty) and
/// before the method is scheduled.
#[derive(Clone)]
pub struct AuthorizationGate {
    component: String,
    engine: Arc<dyn PolicyEngine>,
}

impl AuthorizationGate {
    /// Creates a gate for `component` backed by `engine`.
    pub fn new(component: impl Into<String>, engine: Arc<dyn PolicyEngine>) -> Self {
        Self {
            component: component.into(),
            engine,
        }
    }

    /// Component this gate guards.
    #[must_use]
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Picks the properties to pass to the engine: the method's own
    /// declaration, else the handler default, else none.
    #[must_use]
    pub fn required_properties<'a>(
        method_declared: Option<&'a [String]>,
        handler_default: Option<&'a [String]>,
    ) -> Option<&'a [String]> {
        method_declared.or(handler_default)
    }

    /// Authorizes a call.
    ///
    /// The engine may enrich `credentials`; the caller keeps the enriched
    /// record for the rest of the request.
    ///
    /// # Errors
    ///
    /// Returns [`HermesError::Authorization`] when the engine denies the call.
    pub fn check(
        &self,
        method: &str,
        path: &str,
        credentials: &mut CredentialRecord,
        required: Option<&[String]>,
    ) -> HermesResult<()> {
        if self.engine.authorize(method, credentials, required) {
            return Ok(());
        }

        warn!(
            component = %self.component,
            method,
            path,
            identity = %credentials.identity_fragment(),
            "Unauthorized access"
        );
        Err(HermesError::authorization_for_method(method))
    }
}

impl std::fmt::Debug for AuthorizationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationGate")
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AllowAll, DenyAll, PropertyPolicy};
    use hermes_core::ErrorCategory;

    #[test]
    fn test_required_properties_order() {
        let declared = vec!["FileCatalogManagement".to_string()];
        let default = vec!["authenticated".to_string()];

        assert_eq!(
            AuthorizationGate::required_properties(Some(declared.as_slice()), Some(default.as_slice())),
            Some(declared.as_slice())
        );
        assert_eq!(
            AuthorizationGate::required_properties(None, Some(default.as_slice())),
            Some(default.as_slice())
        );
        assert_eq!(AuthorizationGate::required_properties(None, None), None);
    }

    #[test]
    fn test_allow() {
        let gate = AuthorizationGate::new("Test/Ping", Arc::new(AllowAll));
        let mut credentials = CredentialRecord::new();
        assert!(gate.check("ping", "/Test/Ping", &mut credentials, None).is_ok());
    }

    #[test]
    fn test_deny_is_authorization_error() {
        let gate = AuthorizationGate::new("Test/Ping", Arc::new(DenyAll));
        let mut credentials = CredentialRecord::new().with_dn("/O=Grid/CN=Jane Doe");
        let err = gate
            .check("ping", "/Test/Ping", &mut credentials, None)
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Authorization);
        assert_eq!(err.to_string(), "Unauthorized query");
    }

    #[test]
    fn test_enrichment_is_kept() {
        let gate = AuthorizationGate::new("Test/Ping", Arc::new(PropertyPolicy::default()));
        let mut credentials = CredentialRecord::new().with_id("b9a1");
        let required = vec!["authenticated".to_string()];
        gate.check("ping", "/Test/Ping", &mut credentials, Some(required.as_slice()))
            .unwrap();
        assert_eq!(credentials.username(), Some("b9a1"));
    }
}
