//! Prometheus metrics for Hermes.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `hermes_requests_total` | Counter | `component`, `method`, `outcome` | Requests served |
//! | `hermes_request_duration_seconds` | Histogram | `component`, `method` | Request latency |
//! | `hermes_activity_<name>` | Counter | `component` | Marks of a registered activity |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether to install the exporter.
    pub enabled: bool,

    /// Listener address for the Prometheus scrape endpoint.
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

/// Installs the Prometheus recorder and HTTP listener.
///
/// # Errors
///
/// Fails on an unparsable listener address or when a recorder is already
/// installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e: std::net::AddrParseError| TelemetryError::MetricsAddress {
            addr: config.addr.clone(),
            reason: e.to_string(),
        })?;

    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::Recorder(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    describe_counter!("hermes_requests_total", "Total number of requests served");
    describe_histogram!(
        "hermes_request_duration_seconds",
        "Request duration from arrival to completion, in seconds"
    );

    Ok(())
}

/// Renders metrics in Prometheus text format, if the exporter is installed.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Records a completed request.
pub fn record_request(component: &str, method: &str, outcome: &str, duration: Duration) {
    counter!(
        "hermes_requests_total",
        "component" => component.to_string(),
        "method" => method.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        "hermes_request_duration_seconds",
        "component" => component.to_string(),
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_disabled() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_address() {
        let config = MetricsConfig {
            enabled: true,
            addr: "nowhere".to_string(),
        };
        assert!(matches!(
            init_metrics(&config),
            Err(TelemetryError::MetricsAddress { .. })
        ));
    }

    #[test]
    fn test_record_without_recorder_does_not_panic() {
        record_request("Test/Handler", "ping", "ok", Duration::from_millis(3));
    }
}
