//! Layered loading of [`HermesConfig`].
//!
//! A loader starts from a preset, replaces it wholesale with a file or an
//! inline document, then patches individual settings from `PREFIX__*`
//! environment variables before validating the result.

use std::env;
use std::fs;
use std::path::Path;

use crate::{ConfigError, HermesConfig, LogFormat};

/// Document formats a configuration may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

impl Format {
    fn named(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    fn parse(self, content: &str) -> Result<HermesConfig, ConfigError> {
        Ok(match self {
            Self::Toml => toml::from_str(content)?,
            Self::Json => serde_json::from_str(content)?,
        })
    }
}

/// Builds a [`HermesConfig`] from presets, files and the environment.
///
/// ```no_run
/// use hermes_config::ConfigLoader;
///
/// # fn main() -> Result<(), hermes_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_file("/etc/hermes/hermes.toml")?
///     .with_env_prefix("HERMES")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: HermesConfig,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    /// A loader holding the built-in defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets to the built-in defaults.
    #[must_use]
    pub fn with_defaults(self) -> Self {
        self.with_preset(HermesConfig::default())
    }

    /// Resets to the development preset.
    #[must_use]
    pub fn with_development(self) -> Self {
        self.with_preset(HermesConfig::development())
    }

    /// Resets to the production preset.
    #[must_use]
    pub fn with_production(self) -> Self {
        self.with_preset(HermesConfig::production())
    }

    fn with_preset(mut self, preset: HermesConfig) -> Self {
        self.config = preset;
        self
    }

    /// Replaces the configuration with the contents of a `.toml` or `.json`
    /// file.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing or unreadable, has another extension, or
    /// does not deserialize (unknown fields included).
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::file_not_found(path));
        }
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Format::named)
            .ok_or_else(|| ConfigError::unsupported_format(path.display().to_string()))?;
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        self.config = format.parse(&content)?;
        Ok(self)
    }

    /// Like [`with_file`](Self::with_file), but a missing file leaves the
    /// configuration untouched.
    ///
    /// # Errors
    ///
    /// Fails if the file exists and cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            return self.with_file(path);
        }
        Ok(self)
    }

    /// Replaces the configuration with an inline `toml` or `json` document.
    ///
    /// ```
    /// use hermes_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[server]\nworker_timeout_ms = 500", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.worker_timeout_ms, 500);
    /// ```
    ///
    /// # Errors
    ///
    /// Fails on an unknown format name or a document that does not deserialize.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let format = Format::named(format).ok_or_else(|| ConfigError::unsupported_format(format))?;
        self.config = format.parse(content)?;
        Ok(self)
    }

    /// Enables environment overrides named `PREFIX__SECTION__KEY`, e.g.
    /// `HERMES__SERVER__WORKER_TIMEOUT_MS=5000`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Exports the variables of a `.env` file in the working directory, when
    /// one exists. Variables already set win.
    ///
    /// # Errors
    ///
    /// Currently infallible.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                tracing::warn!(error = %err, "Ignoring unreadable .env file");
            }
        }
        Ok(self)
    }

    /// Applies environment overrides and validates.
    ///
    /// # Errors
    ///
    /// Fails if an override does not parse or the result is invalid.
    pub fn load(mut self) -> Result<HermesConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let marker = format!("{prefix}__");
            let mut overrides: Vec<(String, String)> = env::vars()
                .filter(|(name, _)| name.starts_with(&marker))
                .collect();
            overrides.sort();
            for (name, value) in overrides {
                self.apply_env_var(&name, &value, &prefix)?;
            }
        }
        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration as it stands, skipping overrides and
    /// validation.
    #[must_use]
    pub fn load_unvalidated(self) -> HermesConfig {
        self.config
    }

    fn apply_env_var(&mut self, name: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(path) = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix("__"))
        else {
            return Err(ConfigError::env_parse_error(name, "invalid key format"));
        };
        let fail = |reason: &str| ConfigError::env_parse_error(name, reason);
        let number = || value.parse::<u64>().map_err(|_| fail("expected integer"));
        let flag = || parse_bool(value).ok_or_else(|| fail("expected boolean"));

        let server = &mut self.config.server;
        let telemetry = &mut self.config.telemetry;
        match path {
            "SERVER__HTTP_ADDR" => server.http_addr = value.to_string(),
            "SERVER__SHUTDOWN_TIMEOUT_SECS" => server.shutdown_timeout_secs = number()?,
            "SERVER__REQUEST_TIMEOUT_MS" => server.request_timeout_ms = number()?,
            "SERVER__WORKER_TIMEOUT_MS" => server.worker_timeout_ms = number()?,
            "SERVER__MAX_BODY_BYTES" => server.max_body_bytes = number()?,
            "TELEMETRY__SERVICE_NAME" => telemetry.service_name = value.to_string(),
            "TELEMETRY__LOGGING__ENABLED" => telemetry.logging.enabled = flag()?,
            "TELEMETRY__LOGGING__LEVEL" => telemetry.logging.level = value.to_string(),
            "TELEMETRY__LOGGING__ANSI_ENABLED" => telemetry.logging.ansi_enabled = flag()?,
            "TELEMETRY__LOGGING__FORMAT" => {
                telemetry.logging.format = match value.to_ascii_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => return Err(fail("expected json or pretty")),
                };
            }
            "TELEMETRY__METRICS__ENABLED" => telemetry.metrics.enabled = flag()?,
            "TELEMETRY__METRICS__ADDR" => telemetry.metrics.addr = value.to_string(),
            other => tracing::debug!(variable = name, key = other, "Unknown override ignored"),
        }
        Ok(())
    }
}

/// Accepts `true/false`, `1/0`, `yes/no` and `on/off` in any case.
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.server.http_addr, "0.0.0.0:8443");
    }

    #[test]
    fn test_loader_with_development() {
        let config = ConfigLoader::new().with_development().load().unwrap();
        assert_eq!(config.telemetry.logging.level, "debug");
        assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"server": {"http_addr": "127.0.0.1:3000", "worker_timeout_ms": 500}}"#;

        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.server.http_addr, "127.0.0.1:3000");
        assert_eq!(config.server.worker_timeout_ms, 500);
    }

    #[test]
    fn test_loader_rejects_unknown_format() {
        let result = ConfigLoader::new().with_string("a = 1", "yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/hermes.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/hermes.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.server.http_addr, "0.0.0.0:8443");
    }

    #[test]
    fn test_loader_with_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [server]
            http_addr = "127.0.0.1:9443"

            [authorization."DataManagement/FileCatalog"]
            default = ["authenticated"]

            [authorization."DataManagement/FileCatalog".methods]
            removeFile = ["FileCatalogManagement"]

            [components.DataManagement.FileCatalog]
            MaxListing = 500
            "#
        )
        .unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();

        assert_eq!(config.server.http_addr, "127.0.0.1:9443");
        let section = config.authorization_section("DataManagement/FileCatalog").unwrap();
        assert_eq!(section.default, vec!["authenticated"]);
        assert_eq!(section.methods["removeFile"], vec!["FileCatalogManagement"]);
        assert_eq!(
            config.components["DataManagement"]["FileCatalog"]["MaxListing"],
            serde_json::json!(500)
        );
    }

    #[test]
    fn test_loader_rejects_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let result = ConfigLoader::new().with_file(file.path());
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("Off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn test_apply_env_var_server() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__SERVER__HTTP_ADDR", "192.168.1.1:9000", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__SERVER__WORKER_TIMEOUT_MS", "2500", "TEST")
            .unwrap();
        assert_eq!(loader.config.server.http_addr, "192.168.1.1:9000");
        assert_eq!(loader.config.server.worker_timeout_ms, 2500);
    }

    #[test]
    fn test_apply_env_var_telemetry() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__TELEMETRY__LOGGING__FORMAT", "pretty", "TEST")
            .unwrap();
        loader
            .apply_env_var("TEST__TELEMETRY__METRICS__ENABLED", "yes", "TEST")
            .unwrap();
        assert_eq!(loader.config.telemetry.logging.format, LogFormat::Pretty);
        assert!(loader.config.telemetry.metrics.enabled);
    }

    #[test]
    fn test_apply_env_var_invalid_integer() {
        let mut loader = ConfigLoader::new();
        let result = loader.apply_env_var("TEST__SERVER__MAX_BODY_BYTES", "lots", "TEST");
        assert!(matches!(result, Err(ConfigError::EnvParse { .. })));
    }
}
