//! Section types of the configuration document.
//!
//! Scalar sections use container-level `#[serde(default)]`, so any subset of
//! their keys may be given. Unknown keys are rejected everywhere.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `[server]`: listener and request limits.
///
/// ```
/// use hermes_config::ServerConfig;
///
/// let config = ServerConfig::default();
/// assert_eq!(config.http_addr, "0.0.0.0:8443");
/// assert_eq!(config.worker_timeout_ms, 0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listener address.
    pub http_addr: String,
    /// Seconds granted to open connections once shutdown starts.
    pub shutdown_timeout_secs: u64,
    /// Time allowed to read a request body, in milliseconds.
    pub request_timeout_ms: u64,
    /// Deadline for a business method on the worker pool. `0` disables it.
    pub worker_timeout_ms: u64,
    /// Largest accepted request body.
    pub max_body_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8443".to_string(),
            shutdown_timeout_secs: 30,
            request_timeout_ms: 30_000,
            worker_timeout_ms: 0,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable, multi-line.
    Pretty,
}

/// `[telemetry.logging]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Install a subscriber at all.
    pub enabled: bool,
    /// Filter directive (e.g. `info`, `hermes_server=debug`).
    pub level: String,
    /// Line format.
    pub format: LogFormat,
    /// Colors, pretty format only.
    pub ansi_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            ansi_enabled: false,
        }
    }
}

/// `[telemetry.metrics]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder.
    pub enabled: bool,
    /// Scrape listener address.
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// `[telemetry]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfigSection {
    /// Reported in the health probe and startup log line.
    pub service_name: String,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Metrics settings.
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfigSection {
    fn default() -> Self {
        Self {
            service_name: "hermes".to_string(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Authorization rules for one component.
///
/// ```toml
/// [authorization."DataManagement/FileCatalog"]
/// default = ["authenticated"]
///
/// [authorization."DataManagement/FileCatalog".methods]
/// removeFile = ["FileCatalogManagement"]
///
/// [authorization."DataManagement/FileCatalog".groups]
/// lhcb_prod = ["ProductionManagement", "FileCatalogManagement"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthorizationSection {
    /// Properties required when a method declares none.
    #[serde(default)]
    pub default: Vec<String>,

    /// Per-method overrides.
    #[serde(default)]
    pub methods: BTreeMap<String, Vec<String>>,

    /// Properties granted to members of each group.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
}

/// One token issuer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IdentityProviderConfig {
    /// Provider category.
    #[serde(default = "default_provider_category")]
    pub category: String,

    /// Issuer URL as it appears in the `iss` claim.
    pub issuer: String,

    /// Signature algorithm (`HS256`, `RS256`, `ES256`, ...).
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Shared secret for HMAC algorithms.
    #[serde(default)]
    pub secret: Option<String>,

    /// PEM public key for RSA/EC algorithms.
    #[serde(default)]
    pub public_key_pem: Option<String>,

    /// Expected audience.
    #[serde(default)]
    pub audience: Option<String>,

    /// Claim holding the caller's group(s).
    #[serde(default = "default_group_claim")]
    pub group_claim: String,

    /// Group used when the claim is absent.
    #[serde(default)]
    pub default_group: Option<String>,
}

fn default_provider_category() -> String {
    "Id".to_string()
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_group_claim() -> String {
    "groups".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_serialization() {
        let format: LogFormat = serde_json::from_str(r#""pretty""#).unwrap();
        assert_eq!(format, LogFormat::Pretty);
        assert_eq!(serde_json::to_string(&LogFormat::Json).unwrap(), r#""json""#);
    }

    #[test]
    fn test_identity_provider_defaults() {
        let provider: IdentityProviderConfig =
            serde_json::from_str(r#"{"issuer": "https://iam.example.org/", "secret": "s3cret"}"#)
                .unwrap();
        assert_eq!(provider.category, "Id");
        assert_eq!(provider.algorithm, "HS256");
        assert_eq!(provider.group_claim, "groups");
        assert!(provider.default_group.is_none());
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let server: ServerConfig = toml::from_str("worker_timeout_ms = 250").unwrap();
        assert_eq!(server.worker_timeout_ms, 250);
        assert_eq!(server.http_addr, "0.0.0.0:8443");
        assert_eq!(server.max_body_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_unknown_server_field_rejected() {
        let result: Result<ServerConfig, _> = serde_json::from_str(r#"{"http_adr": "x"}"#);
        assert!(result.is_err());
    }
}
