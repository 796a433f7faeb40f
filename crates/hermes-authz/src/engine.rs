//! Policy engines.
//!
//! [`PropertyPolicy`] is the built-in engine: a caller may invoke a method when
//! it holds at least one of the properties the method requires.
//!
//! Required properties for a method are resolved in this order:
//!
//! 1. the section's `methods.<name>` entry
//! 2. the properties passed in by the gate (handler or method declaration)
//! 3. the section's `default`
//!
//! With none of these the call is denied.
//!
//! A few property tokens have special meaning:
//!
//! | Token | Allows |
//! |---|---|
//! | `all`, `any` | everyone, anonymous callers included |
//! | `authenticated` | any caller with an identity |
//! | `visitor` | callers without an identity |

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use hermes_config::AuthorizationSection;
use hermes_core::CredentialRecord;
use tracing::debug;

use crate::error::{AuthzError, AuthzResult};

/// Decides whether a caller may invoke a method.
pub trait PolicyEngine: Send + Sync {
    /// Returns `true` to allow the call.
    ///
    /// The engine may fill in missing parts of `credentials` (properties
    /// derived from the group, a username derived from the subject).
    fn authorize(
        &self,
        method: &str,
        credentials: &mut CredentialRecord,
        required: Option<&[String]>,
    ) -> bool;
}

/// Hands out the engine bound to an authorization section.
pub trait PolicyProvider: Send + Sync {
    /// Engine for `section` (usually the component's full name).
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError`] if the section cannot be turned into an engine.
    fn engine_for(&self, section: &str) -> AuthzResult<Arc<dyn PolicyEngine>>;
}

/// Allows every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PolicyEngine for AllowAll {
    fn authorize(&self, _: &str, _: &mut CredentialRecord, _: Option<&[String]>) -> bool {
        true
    }
}

/// Denies every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl PolicyEngine for DenyAll {
    fn authorize(&self, _: &str, _: &mut CredentialRecord, _: Option<&[String]>) -> bool {
        false
    }
}

/// Splits a comma-separated property list.
///
/// ```
/// assert_eq!(
///     hermes_authz::parse_properties(" NormalUser, , TrustedHost"),
///     vec!["NormalUser".to_string(), "TrustedHost".to_string()]
/// );
/// ```
#[must_use]
pub fn parse_properties(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Property matching against one authorization section.
#[derive(Debug, Clone, Default)]
pub struct PropertyPolicy {
    section: AuthorizationSection,
}

impl PropertyPolicy {
    /// Creates an engine for `section`.
    #[must_use]
    pub fn new(section: AuthorizationSection) -> Self {
        Self { section }
    }

    fn enrich(&self, credentials: &mut CredentialRecord) {
        if credentials.properties.is_empty() {
            if let Some(properties) = credentials
                .group()
                .and_then(|group| self.section.groups.get(group))
            {
                credentials.properties.clone_from(properties);
            }
        }
        if credentials.username.is_none() {
            credentials.username.clone_from(&credentials.id);
        }
    }

    fn effective<'a>(
        &'a self,
        method: &str,
        required: Option<&'a [String]>,
    ) -> Option<&'a [String]> {
        self.section
            .methods
            .get(method)
            .map(Vec::as_slice)
            .or(required)
            .filter(|props| !props.is_empty())
            .or_else(|| Some(self.section.default.as_slice()).filter(|d| !d.is_empty()))
    }
}

fn has_identity(credentials: &CredentialRecord) -> bool {
    credentials.username.is_some() || credentials.id.is_some() || credentials.dn.is_some()
}

impl PolicyEngine for PropertyPolicy {
    fn authorize(
        &self,
        method: &str,
        credentials: &mut CredentialRecord,
        required: Option<&[String]>,
    ) -> bool {
        self.enrich(credentials);

        let Some(required) = self.effective(method, required) else {
            debug!(method, "No properties defined; denying");
            return false;
        };

        let identified = has_identity(credentials);
        required.iter().any(|property| {
            match property.to_ascii_lowercase().as_str() {
                "all" | "any" => true,
                "authenticated" => identified,
                "visitor" => !identified,
                _ => credentials.has_property(property),
            }
        })
    }
}

/// Builds [`PropertyPolicy`] engines from configured sections, once per
/// section.
#[derive(Debug, Default)]
pub struct ConfiguredPolicyProvider {
    sections: BTreeMap<String, AuthorizationSection>,
    engines: DashMap<String, Arc<PropertyPolicy>>,
}

impl ConfiguredPolicyProvider {
    /// Creates a provider over the `authorization` configuration table.
    #[must_use]
    pub fn new(sections: BTreeMap<String, AuthorizationSection>) -> Self {
        Self {
            sections,
            engines: DashMap::new(),
        }
    }

    fn validate(name: &str, section: &AuthorizationSection) -> AuthzResult<()> {
        let lists = std::iter::once(&section.default)
            .chain(section.methods.values())
            .chain(section.groups.values());
        for list in lists {
            if list.iter().any(|p| p.trim().is_empty()) {
                return Err(AuthzError::invalid_section(name, "empty property name"));
            }
        }
        Ok(())
    }
}

impl PolicyProvider for ConfiguredPolicyProvider {
    fn engine_for(&self, section: &str) -> AuthzResult<Arc<dyn PolicyEngine>> {
        if let Some(engine) = self.engines.get(section) {
            let engine: Arc<dyn PolicyEngine> = engine.value().clone();
            return Ok(engine);
        }

        let config = self.sections.get(section).cloned().unwrap_or_default();
        Self::validate(section, &config)?;

        let engine: Arc<dyn PolicyEngine> = self
            .engines
            .entry(section.to_string())
            .or_insert_with(|| Arc::new(PropertyPolicy::new(config)))
            .value()
            .clone();
        Ok(engine)
    }
}

/// Hands out the same engine for every section.
#[derive(Clone)]
pub struct StaticPolicyProvider {
    engine: Arc<dyn PolicyEngine>,
}

impl StaticPolicyProvider {
    /// Wraps `engine`.
    pub fn new(engine: impl PolicyEngine + 'static) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

impl std::fmt::Debug for StaticPolicyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticPolicyProvider").finish_non_exhaustive()
    }
}

impl PolicyProvider for StaticPolicyProvider {
    fn engine_for(&self, _section: &str) -> AuthzResult<Arc<dyn PolicyEngine>> {
        Ok(Arc::clone(&self.engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| (*p).to_string()).collect()
    }

    fn section() -> AuthorizationSection {
        AuthorizationSection {
            default: props(&["authenticated"]),
            methods: BTreeMap::from([("removeFile".to_string(), props(&["FileCatalogManagement"]))]),
            groups: BTreeMap::from([
                ("lhcb_user".to_string(), props(&["NormalUser"])),
                ("lhcb_prod".to_string(), props(&["FileCatalogManagement"])),
            ]),
        }
    }

    fn user(group: &str) -> CredentialRecord {
        CredentialRecord::new().with_username("jdoe").with_group(group)
    }

    #[test]
    fn test_section_default_applies() {
        let policy = PropertyPolicy::new(section());
        assert!(policy.authorize("listDirectory", &mut user("lhcb_user"), None));
        assert!(!policy.authorize("listDirectory", &mut CredentialRecord::new(), None));
    }

    #[test]
    fn test_section_method_entry_wins() {
        let policy = PropertyPolicy::new(section());
        let handler_default = props(&["all"]);
        assert!(!policy.authorize("removeFile", &mut user("lhcb_user"), Some(handler_default.as_slice())));
        assert!(policy.authorize("removeFile", &mut user("lhcb_prod"), Some(handler_default.as_slice())));
    }

    #[test]
    fn test_required_properties_from_gate() {
        let policy = PropertyPolicy::new(section());
        let required = props(&["NormalUser"]);
        assert!(policy.authorize("ping", &mut user("lhcb_user"), Some(required.as_slice())));
        assert!(!policy.authorize("ping", &mut user("lhcb_prod"), Some(required.as_slice())));
    }

    #[test]
    fn test_no_properties_anywhere_denies() {
        let policy = PropertyPolicy::default();
        assert!(!policy.authorize("ping", &mut user("lhcb_user"), None));
        assert!(!policy.authorize("ping", &mut user("lhcb_user"), Some(&[][..])));
    }

    #[test]
    fn test_special_tokens() {
        let policy = PropertyPolicy::default();
        let any = props(&["Any"]);
        let visitor = props(&["visitor"]);
        assert!(policy.authorize("ping", &mut CredentialRecord::new(), Some(any.as_slice())));
        assert!(policy.authorize("ping", &mut CredentialRecord::new(), Some(visitor.as_slice())));
        assert!(!policy.authorize("ping", &mut user("x"), Some(visitor.as_slice())));
    }

    #[test]
    fn test_enrichment() {
        let policy = PropertyPolicy::new(section());
        let mut credentials = CredentialRecord::new().with_id("b9a1").with_group("lhcb_user");
        policy.authorize("ping", &mut credentials, None);
        assert_eq!(credentials.username(), Some("b9a1"));
        assert_eq!(credentials.properties(), ["NormalUser"]);

        let mut explicit = user("lhcb_user").with_properties(["Operator"]);
        policy.authorize("ping", &mut explicit, None);
        assert_eq!(explicit.properties(), ["Operator"]);
    }

    #[test]
    fn test_provider_caches_per_section() {
        let provider = ConfiguredPolicyProvider::new(BTreeMap::from([(
            "DataManagement/FileCatalog".to_string(),
            section(),
        )]));
        let a = provider.engine_for("DataManagement/FileCatalog").unwrap();
        let b = provider.engine_for("DataManagement/FileCatalog").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        // Unconfigured sections still get an engine; it only knows what the
        // gate passes in.
        let engine = provider.engine_for("Framework/Unknown").unwrap();
        assert!(!engine.authorize("ping", &mut user("lhcb_user"), None));
    }

    #[test]
    fn test_provider_rejects_empty_property() {
        let mut broken = section();
        broken.default.push("  ".to_string());
        let provider = ConfiguredPolicyProvider::new(BTreeMap::from([("Broken".to_string(), broken)]));
        assert!(matches!(
            provider.engine_for("Broken"),
            Err(AuthzError::InvalidSection { .. })
        ));
    }
}
