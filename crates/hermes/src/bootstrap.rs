//! Process startup from configuration.
//!
//! Configuration layers, later ones winning: built-in defaults, `.env`, the
//! configuration file, `HERMES__*` environment variables.

use std::path::Path;

use hermes_config::{ConfigError, ConfigLoader, HermesConfig, LogFormat};
use hermes_server::{ServerBuilder, ServerResult};
use hermes_telemetry::{LogConfig, MetricsConfig};
use tracing::info;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "HERMES";

/// Loads and validates the configuration.
///
/// A missing `path` file is not an error; defaults apply.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<HermesConfig, ConfigError> {
    let mut loader = ConfigLoader::new().with_defaults().with_dotenv()?;
    if let Some(path) = path {
        loader = loader.with_optional_file(path)?;
    }
    loader.with_env_prefix(ENV_PREFIX).load()
}

/// Logging settings for the telemetry crate.
pub fn log_config(config: &HermesConfig) -> LogConfig {
    let logging = &config.telemetry.logging;
    LogConfig {
        enabled: logging.enabled,
        level: logging.level.clone(),
        json_format: logging.format == LogFormat::Json,
        ansi: logging.ansi_enabled,
        thread_ids: logging.format == LogFormat::Pretty,
    }
}

/// Metrics settings for the telemetry crate.
pub fn metrics_config(config: &HermesConfig) -> MetricsConfig {
    MetricsConfig {
        enabled: config.telemetry.metrics.enabled,
        addr: config.telemetry.metrics.addr.clone(),
    }
}

/// Installs logging and metrics.
pub fn init_telemetry(config: &HermesConfig) -> ServerResult<()> {
    hermes_telemetry::init_telemetry(&log_config(config), &metrics_config(config))?;
    info!(
        service = %config.telemetry.service_name,
        addr = %config.server.http_addr,
        "Telemetry initialized"
    );
    Ok(())
}

/// Loads configuration from `path`, installs telemetry and returns a server
/// builder ready for handlers.
pub fn builder<P: AsRef<Path>>(path: Option<P>) -> ServerResult<ServerBuilder> {
    let config = load_config(path)?;
    init_telemetry(&config)?;
    Ok(ServerBuilder::from_config(&config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_follows_format() {
        let mut config = HermesConfig::default();
        config.telemetry.logging.level = "hermes_server=debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.ansi_enabled = true;

        let log = log_config(&config);
        assert_eq!(log.level, "hermes_server=debug");
        assert!(!log.json_format);
        assert!(log.ansi);
        assert!(log.thread_ids);

        config.telemetry.logging.format = LogFormat::Json;
        assert!(log_config(&config).json_format);
    }

    #[test]
    fn test_metrics_config_copied() {
        let mut config = HermesConfig::default();
        config.telemetry.metrics.enabled = true;
        config.telemetry.metrics.addr = "127.0.0.1:9191".to_string();

        let metrics = metrics_config(&config);
        assert!(metrics.enabled);
        assert_eq!(metrics.addr, "127.0.0.1:9191");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config(Some("/nonexistent/hermes.toml")).unwrap();
        assert_eq!(config.server, hermes_config::ServerConfig::default());
    }

    #[test]
    fn test_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hermes.toml");
        std::fs::write(
            &path,
            r#"
[server]
http_addr = "127.0.0.1:9443"
worker_timeout_ms = 2500

[telemetry]
service_name = "dirac-dm"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.http_addr, "127.0.0.1:9443");
        assert_eq!(config.server.worker_timeout_ms, 2500);
        assert_eq!(config.telemetry.service_name, "dirac-dm");
    }
}
