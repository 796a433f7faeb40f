//! Telemetry error types.

use thiserror::Error;

/// Telemetry bootstrap failures. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log filter directive does not parse.
    #[error("bad log filter {directive:?}: {reason}")]
    LogFilter {
        /// Directive as configured.
        directive: String,
        /// Parser message.
        reason: String,
    },

    /// Another global subscriber is already installed.
    #[error("log subscriber already installed: {0}")]
    SubscriberInstalled(String),

    /// The scrape listener address does not parse.
    #[error("bad metrics listener address {addr:?}: {reason}")]
    MetricsAddress {
        /// Address as configured.
        addr: String,
        /// Parser message.
        reason: String,
    },

    /// The Prometheus recorder could not be installed.
    #[error("metrics recorder unavailable: {0}")]
    Recorder(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_display() {
        let err = TelemetryError::LogFilter {
            directive: "hermes_server=loud".to_string(),
            reason: "invalid level".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "bad log filter \"hermes_server=loud\": invalid level"
        );
    }
}
