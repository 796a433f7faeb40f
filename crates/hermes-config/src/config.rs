//! Root configuration type.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    AuthorizationSection, ConfigError, IdentityProviderConfig, LogFormat, ServerConfig,
    TelemetryConfigSection,
};

/// Complete Hermes configuration.
///
/// ```
/// use hermes_config::HermesConfig;
///
/// let config = HermesConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8443");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct HermesConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfigSection,

    /// Authorization rules keyed by component name (`System/Handler`).
    #[serde(default)]
    pub authorization: BTreeMap<String, AuthorizationSection>,

    /// Token issuers keyed by provider name.
    #[serde(default)]
    pub identity_providers: BTreeMap<String, IdentityProviderConfig>,

    /// Free-form component options keyed by system or component name.
    #[serde(default)]
    pub components: BTreeMap<String, Value>,
}

impl HermesConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Fails if the server or metrics address is not a socket address, an
    /// identity provider lacks an issuer or key material, or an authorization
    /// section lists an empty property.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if self.telemetry.metrics.enabled
            && self.telemetry.metrics.addr.parse::<SocketAddr>().is_err()
        {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", self.telemetry.metrics.addr),
            ));
        }

        for (name, provider) in &self.identity_providers {
            if provider.issuer.trim().is_empty() {
                return Err(ConfigError::identity_provider(name, "missing issuer"));
            }
            let hmac = provider.algorithm.to_uppercase().starts_with("HS");
            let has_key = if hmac {
                provider.secret.is_some()
            } else {
                provider.public_key_pem.is_some()
            };
            if !has_key {
                return Err(ConfigError::identity_provider(
                    name,
                    format!("no key material for algorithm {}", provider.algorithm),
                ));
            }
        }

        for (section, rules) in &self.authorization {
            let lists = std::iter::once(&rules.default)
                .chain(rules.methods.values())
                .chain(rules.groups.values());
            for list in lists {
                if list.iter().any(|p| p.trim().is_empty()) {
                    return Err(ConfigError::authorization(section, "empty property name"));
                }
            }
        }

        Ok(())
    }

    /// Development preset: pretty debug logs, metrics off.
    ///
    /// ```
    /// use hermes_config::{HermesConfig, LogFormat};
    ///
    /// let config = HermesConfig::development();
    /// assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.server.http_addr = "127.0.0.1:8443".to_string();
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.ansi_enabled = true;
        config
    }

    /// Production preset: JSON info logs, metrics on.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.metrics.enabled = true;
        config.server.worker_timeout_ms = 120_000;
        config
    }

    /// Authorization rules for a component, if configured.
    #[must_use]
    pub fn authorization_section(&self, component: &str) -> Option<&AuthorizationSection> {
        self.authorization.get(component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_http_addr() {
        let mut config = HermesConfig::default();
        config.server.http_addr = "not-an-address".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.http_addr"));
    }

    #[test]
    fn test_metrics_addr_checked_only_when_enabled() {
        let mut config = HermesConfig::default();
        config.telemetry.metrics.addr = "bogus".to_string();
        assert!(config.validate().is_ok());

        config.telemetry.metrics.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_without_key_material() {
        let mut config = HermesConfig::default();
        config.identity_providers.insert(
            "CheckIn".to_string(),
            IdentityProviderConfig {
                category: "Id".to_string(),
                issuer: "https://aai.example.org/oidc/".to_string(),
                algorithm: "RS256".to_string(),
                secret: Some("ignored for RSA".to_string()),
                public_key_pem: None,
                audience: None,
                group_claim: "groups".to_string(),
                default_group: None,
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("identity_providers.CheckIn"));
    }

    #[test]
    fn test_empty_property_rejected() {
        let mut config = HermesConfig::default();
        config.authorization.insert(
            "DataManagement/FileCatalog".to_string(),
            AuthorizationSection {
                default: vec!["authenticated".to_string(), " ".to_string()],
                ..AuthorizationSection::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Authorization { ref section, .. } if section == "DataManagement/FileCatalog"));
    }

    #[test]
    fn test_production_preset() {
        let config = HermesConfig::production();
        assert!(config.telemetry.metrics.enabled);
        assert_eq!(config.telemetry.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }
}
