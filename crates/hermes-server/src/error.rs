//! Error types for the server crate.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised while building or running a server.
///
/// Per-request failures never show up here; they become error responses.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    /// The listen address is invalid or already in use.
    #[error("bind error: {0}")]
    Bind(String),

    /// Two handlers claim the same URL prefix.
    #[error("duplicate mount point: {0}")]
    DuplicateMount(String),

    /// I/O error while serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] hermes_config::ConfigError),

    /// Logging or metrics could not be installed.
    #[error(transparent)]
    Telemetry(#[from] hermes_telemetry::TelemetryError),
}

impl ServerError {
    /// Creates a bind error.
    pub fn bind(message: impl Into<String>) -> Self {
        Self::Bind(message.into())
    }
}
