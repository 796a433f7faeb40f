//! Error types for authentication.

use std::fmt;

use hermes_core::HermesError;
use thiserror::Error;

/// Result type for a single grant.
pub type GrantResult<T> = Result<T, GrantError>;

/// Why a single grant could not establish an identity.
///
/// The display text of each variant is what ends up in the aggregated
/// failure reason, prefixed with the grant name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum GrantError {
    /// No certificate in the TLS state nor in the proxy headers.
    #[error("Valid certificate not found.")]
    CertificateNotFound,

    /// A certificate was supplied but could not be read.
    #[error("Invalid certificate chain: {0}")]
    CertificateInvalid(String),

    /// No `Authorization` header, or not of the form `<scheme> <token>`.
    #[error("Not found a bearer access token.")]
    TokenNotFound,

    /// `Authorization` header with a scheme other than `Bearer`.
    #[error("Found a not bearer access token.")]
    WrongTokenType,

    /// The token could not be decoded far enough to read its issuer.
    #[error("Malformed access token: {0}")]
    MalformedToken(String),

    /// No identity provider is loaded for the token issuer.
    #[error("Identity provider for issuer {0} is not available.")]
    UnknownIssuer(String),

    /// The provider rejected the token.
    #[error("Token verification failed: {0}")]
    Verification(String),

    /// The provider accepted the token but could not map it to a group.
    #[error("{0}")]
    GroupResolution(String),

    /// The grant name is not registered.
    #[error("{0} authentication type is not supported.")]
    Unsupported(String),

    /// Any other grant-specific failure.
    #[error("{0}")]
    Other(String),
}

impl GrantError {
    /// Creates an invalid-certificate error.
    pub fn certificate_invalid(reason: impl Into<String>) -> Self {
        Self::CertificateInvalid(reason.into())
    }

    /// Creates a malformed-token error.
    pub fn malformed_token(reason: impl Into<String>) -> Self {
        Self::MalformedToken(reason.into())
    }

    /// Creates a verification error.
    pub fn verification(reason: impl Into<String>) -> Self {
        Self::Verification(reason.into())
    }

    /// Creates a group resolution error.
    pub fn group_resolution(reason: impl Into<String>) -> Self {
        Self::GroupResolution(reason.into())
    }
}

/// Every grant in the chain failed.
///
/// Carries one reason per attempted grant, in chain order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationFailure {
    reasons: Vec<String>,
}

impl AuthenticationFailure {
    pub(crate) fn new(reasons: Vec<String>) -> Self {
        Self { reasons }
    }

    /// Per-grant reasons, formatted as `<GRANT> authentication: <reason>`.
    #[must_use]
    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }
}

impl fmt::Display for AuthenticationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reasons.join("; "))
    }
}

impl std::error::Error for AuthenticationFailure {}

/// Client-facing message for a failed chain. Reasons are logged, not sent.
pub const AUTHENTICATION_FAILED: &str = "Unable to authenticate the request";

impl From<AuthenticationFailure> for HermesError {
    fn from(_: AuthenticationFailure) -> Self {
        Self::authentication(AUTHENTICATION_FAILED)
    }
}

/// Identity provider construction failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProviderError {
    /// No provider with that name is configured.
    #[error("identity provider not found: {0}")]
    NotFound(String),

    /// The configured algorithm is unknown.
    #[error("unsupported algorithm for provider {name}: {algorithm}")]
    UnsupportedAlgorithm {
        /// Provider name.
        name: String,
        /// Configured algorithm.
        algorithm: String,
    },

    /// Key material is missing or unreadable.
    #[error("invalid key for provider {name}: {reason}")]
    InvalidKey {
        /// Provider name.
        name: String,
        /// Reason.
        reason: String,
    },
}

impl ProviderError {
    /// Creates an invalid-key error.
    pub fn invalid_key(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::ErrorCategory;

    #[test]
    fn test_grant_error_messages() {
        assert_eq!(
            GrantError::CertificateNotFound.to_string(),
            "Valid certificate not found."
        );
        assert_eq!(
            GrantError::Unsupported("KERBEROS".into()).to_string(),
            "KERBEROS authentication type is not supported."
        );
        assert_eq!(
            GrantError::WrongTokenType.to_string(),
            "Found a not bearer access token."
        );
    }

    #[test]
    fn test_failure_joins_reasons() {
        let failure = AuthenticationFailure::new(vec![
            "SSL authentication: Valid certificate not found.".into(),
            "JWT authentication: Not found a bearer access token.".into(),
        ]);
        assert_eq!(
            failure.to_string(),
            "SSL authentication: Valid certificate not found.; JWT authentication: Not found a bearer access token."
        );
    }

    #[test]
    fn test_failure_converts_to_unauthenticated() {
        let failure = AuthenticationFailure::new(vec!["X authentication: nope".into()]);
        let err: HermesError = failure.into();
        assert_eq!(err.category(), ErrorCategory::Authentication);
        assert!(!err.to_string().contains("nope"));
    }
}
