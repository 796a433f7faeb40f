//! Resolved caller identity.
//!
//! A [`CredentialRecord`] is what a grant produces and what the policy engine
//! consumes. An empty record stands for an anonymous visitor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Username reported for callers without one.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Group reported for callers without one.
pub const VISITOR_GROUP: &str = "visitor";

/// Identity resolved for a single request.
///
/// # Example
///
/// ```
/// use hermes_core::CredentialRecord;
///
/// let record = CredentialRecord::new()
///     .with_username("jdoe")
///     .with_group("lhcb_user")
///     .with_properties(["NormalUser"]);
///
/// assert!(record.is_registered_user());
/// assert_eq!(record.formatted(), "[lhcb_user:jdoe]");
/// assert!(CredentialRecord::new().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Certificate subject (distinguished name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dn: Option<String>,

    /// Token subject identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Registered username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Group the caller acts in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Properties granted to the caller.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<String>,

    /// Opaque extra credentials supplied with the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_credentials: Option<Value>,

    /// Anything else an extractor or policy engine attached.
    #[serde(default, flatten)]
    pub attributes: Map<String, Value>,
}

impl CredentialRecord {
    /// Creates an empty (anonymous) record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the certificate subject.
    #[must_use]
    pub fn with_dn(mut self, dn: impl Into<String>) -> Self {
        self.dn = Some(dn.into());
        self
    }

    /// Sets the token subject identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the username.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Replaces the granted properties.
    #[must_use]
    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = properties.into_iter().map(Into::into).collect();
        self
    }

    /// Returns `true` when no identity information is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dn.is_none()
            && self.id.is_none()
            && self.username.is_none()
            && self.group.is_none()
            && self.properties.is_empty()
            && self.extra_credentials.is_none()
            && self.attributes.is_empty()
    }

    /// Certificate subject, if any.
    #[must_use]
    pub fn dn(&self) -> Option<&str> {
        self.dn.as_deref()
    }

    /// Token subject identifier, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Username, if any.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Group, if any.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Granted properties.
    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    /// Returns `true` if the caller holds `property`.
    #[must_use]
    pub fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }

    /// Returns `true` for a known, non-anonymous user.
    #[must_use]
    pub fn is_registered_user(&self) -> bool {
        matches!(self.username(), Some(name) if !name.is_empty() && name != ANONYMOUS_USER)
    }

    /// Formats the record as `[group:username]`.
    #[must_use]
    pub fn formatted(&self) -> String {
        format!(
            "[{}:{}]",
            self.group().unwrap_or(VISITOR_GROUP),
            self.username().unwrap_or(ANONYMOUS_USER)
        )
    }

    /// The most specific identity fragment available, for log lines.
    ///
    /// Prefers `[group:username]`, then the token subject, then the
    /// certificate subject.
    #[must_use]
    pub fn identity_fragment(&self) -> String {
        if self.username.is_some() || self.group.is_some() {
            return self.formatted();
        }
        if let Some(id) = self.id() {
            return format!("ID: {id}");
        }
        if let Some(dn) = self.dn() {
            return format!("DN: {dn}");
        }
        self.formatted()
    }

    /// Stores the decoded extra credentials blob.
    pub fn merge_extra(&mut self, extra: Value) {
        self.extra_credentials = Some(extra);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_formats_as_visitor() {
        let record = CredentialRecord::new();
        assert!(record.is_empty());
        assert!(!record.is_registered_user());
        assert_eq!(record.formatted(), "[visitor:anonymous]");
    }

    #[test]
    fn test_anonymous_username_is_not_registered() {
        let record = CredentialRecord::new().with_username(ANONYMOUS_USER);
        assert!(!record.is_registered_user());
    }

    #[test]
    fn test_identity_fragment_prefers_group_and_user() {
        let record = CredentialRecord::new()
            .with_dn("/O=Grid/CN=jdoe")
            .with_id("abc-123")
            .with_group("dteam");
        assert_eq!(record.identity_fragment(), "[dteam:anonymous]");

        let token_only = CredentialRecord::new().with_id("abc-123");
        assert_eq!(token_only.identity_fragment(), "ID: abc-123");

        let cert_only = CredentialRecord::new().with_dn("/O=Grid/CN=jdoe");
        assert_eq!(cert_only.identity_fragment(), "DN: /O=Grid/CN=jdoe");
    }

    #[test]
    fn test_merge_extra_marks_record_non_empty() {
        let mut record = CredentialRecord::new();
        record.merge_extra(serde_json::json!({"delegated": true}));
        assert!(!record.is_empty());
        assert_eq!(record.extra_credentials.unwrap()["delegated"], true);
    }

    #[test]
    fn test_serialization_flattens_attributes() {
        let mut record = CredentialRecord::new().with_username("jdoe");
        record
            .attributes
            .insert("isProxy".to_string(), Value::Bool(true));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["username"], "jdoe");
        assert_eq!(json["isProxy"], true);
        assert!(json.get("dn").is_none());
    }
}
