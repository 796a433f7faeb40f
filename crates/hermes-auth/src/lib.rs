//! # Hermes Auth
//!
//! Establishes who is calling a Hermes service.
//!
//! - [`GrantChain`] - tries the handler's grants in order
//! - [`CertificateGrant`] - client certificate from TLS or proxy headers
//! - [`BearerTokenGrant`] - `Authorization: Bearer` verified by the issuer's provider
//! - [`VisitorGrant`] - anonymous access
//! - [`IdentityProvider`] / [`IdentityProviderRegistry`] - token issuers
//!
//! Grants run on the coordinator, before authorization. A failed chain is an
//! authentication failure (401), never an authorization failure.

#![doc(html_root_url = "https://docs.rs/hermes-auth/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod certificate;
mod context;
mod error;
mod grant;
mod provider;
mod token;

pub use certificate::{
    CertificateGrant, CertificateParser, DerSubjectParser, CERT_HEADER, VERIFY_HEADER,
};
pub use context::{GrantContext, PeerCertificates, EXTRA_CREDENTIALS_ARG};
pub use error::{
    AuthenticationFailure, GrantError, GrantResult, ProviderError, AUTHENTICATION_FAILED,
};
pub use grant::{
    Grant, GrantChain, GrantRegistry, VisitorGrant, JWT_GRANT, SSL_GRANT, VISITOR_GRANT,
};
pub use provider::{
    normalize_issuer, ConfiguredProviderRegistry, IdentityProvider, IdentityProviderRegistry,
    IssuerMap, JwtIdentityProvider, ID_PROVIDER_CATEGORY, TOKEN_LEEWAY_SECS,
};
pub use token::{unverified_issuer, BearerTokenGrant};
