//! # Hermes Authz
//!
//! Decides whether an authenticated caller may invoke a method.
//!
//! ```text
//!   CredentialRecord ──► AuthorizationGate ──► PolicyEngine (per component)
//!                              │                     │
//!                              │◄──── allow/deny ────┘
//!                              ▼
//!                      HermesError::Authorization (403)
//! ```
//!
//! Engines come from a [`PolicyProvider`], keyed by authorization section.
//! [`ConfiguredPolicyProvider`] builds [`PropertyPolicy`] engines from the
//! `authorization` configuration table.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use hermes_authz::{AuthorizationGate, ConfiguredPolicyProvider, PolicyProvider};
//! use hermes_config::AuthorizationSection;
//! use hermes_core::CredentialRecord;
//!
//! let section = AuthorizationSection {
//!     default: vec!["authenticated".into()],
//!     ..AuthorizationSection::default()
//! };
//! let provider = ConfiguredPolicyProvider::new(BTreeMap::from([
//!     ("Framework/Echo".to_string(), section),
//! ]));
//! let gate = AuthorizationGate::new("Framework/Echo", provider.engine_for("Framework/Echo")?);
//!
//! let mut caller = CredentialRecord::new().with_username("jdoe").with_group("users");
//! assert!(gate.check("echo", "/Framework/Echo", &mut caller, None).is_ok());
//!
//! let mut anonymous = CredentialRecord::new();
//! assert!(gate.check("echo", "/Framework/Echo", &mut anonymous, None).is_err());
//! # Ok::<(), hermes_authz::AuthzError>(())
//! ```

#![doc(html_root_url = "https://docs.rs/hermes-authz/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod engine;
pub mod error;
pub mod gate;

pub use engine::{
    parse_properties, AllowAll, ConfiguredPolicyProvider, DenyAll, PolicyEngine, PolicyProvider,
    PropertyPolicy, StaticPolicyProvider,
};
pub use error::{AuthzError, AuthzResult};
pub use gate::AuthorizationGate;
