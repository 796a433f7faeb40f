//! Error types for Hermes.
//!
//! [`HermesError`] is the error every stage of the request lifecycle reports
//! to the coordinator. Each variant belongs to an [`ErrorCategory`], and the
//! category decides the HTTP status the client sees.
//!
//! | `ErrorCategory` | Status | Code |
//! |---|---|---|
//! | `Initialization` | 500 | `INITIALIZATION_ERROR` |
//! | `Authentication` | 401 | `AUTHENTICATION_ERROR` |
//! | `Authorization` | 403 | `AUTHORIZATION_DENIED` |
//! | `NotImplemented` | 501 | `NOT_IMPLEMENTED` |
//! | `BadRequest` | 400 | `BAD_REQUEST` |
//! | `Internal` | 500 | `INTERNAL_ERROR` |
//! | `Http` | carried | `HTTP_ERROR` |
//!
//! Envelopes produced by [`HermesError::to_envelope`] contain a stable code and
//! a short message only. Sources, traces and aggregated authentication reasons
//! stay server-side.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`HermesError`].
pub type HermesResult<T> = Result<T, HermesError>;

/// Lifecycle stage an error comes from; fixes the default status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// One-time handler setup failed.
    Initialization,
    /// No configured grant could establish an identity.
    Authentication,
    /// Identity established but not allowed to call the method.
    Authorization,
    /// The requested method is not exported.
    NotImplemented,
    /// Arguments could not be decoded.
    BadRequest,
    /// Anything the business method raised that was not a typed HTTP error.
    Internal,
    /// A typed HTTP error raised on purpose; keeps its own status.
    Http,
}

impl ErrorCategory {
    /// Status used unless the error carries its own.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::Initialization | Self::Internal | Self::Http => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::BadRequest => StatusCode::BAD_REQUEST,
        }
    }
}

/// Standard error type for Hermes.
///
/// # Example
///
/// ```
/// use hermes_core::{ErrorCategory, HermesError};
///
/// fn lookup(name: &str) -> Result<(), HermesError> {
///     if name.is_empty() {
///         return Err(HermesError::bad_request("name must not be empty"));
///     }
///     Ok(())
/// }
///
/// let err = lookup("").unwrap_err();
/// assert_eq!(err.category(), ErrorCategory::BadRequest);
/// ```
#[derive(Error, Debug)]
pub enum HermesError {
    /// Handler initialization failed.
    #[error("Initialization failed for {component}: {message}")]
    Initialization {
        /// Component whose setup failed.
        component: String,
        /// Human-readable error message.
        message: String,
    },

    /// Authentication failed.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Client-visible message.
        message: String,
    },

    /// Authorization denied.
    #[error("Unauthorized query")]
    Authorization {
        /// The method that was denied.
        method: Option<String>,
    },

    /// Method not exported by the handler.
    #[error("Method {method} is not implemented")]
    NotImplemented {
        /// The externally visible method name.
        method: String,
    },

    /// Arguments could not be decoded.
    #[error("Bad request: {message}")]
    BadRequest {
        /// Human-readable error message.
        message: String,
    },

    /// Internal server error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// The underlying error (not exposed to clients).
        #[source]
        source: Option<anyhow::Error>,
    },

    /// A typed HTTP error with an explicit status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// Status sent to the client.
        status: StatusCode,
        /// Human-readable error message.
        message: String,
    },
}

impl HermesError {
    /// Creates an initialization error for a component.
    #[must_use]
    pub fn initialization(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Initialization {
            component: component.into(),
            message: message.into(),
        }
    }

    /// No grant produced an identity.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// The policy denied the call.
    #[must_use]
    pub fn authorization() -> Self {
        Self::Authorization { method: None }
    }

    /// Creates an authorization error naming the denied method.
    #[must_use]
    pub fn authorization_for_method(method: impl Into<String>) -> Self {
        Self::Authorization {
            method: Some(method.into()),
        }
    }

    /// Creates a not-implemented error.
    #[must_use]
    pub fn not_implemented(method: impl Into<String>) -> Self {
        Self::NotImplemented {
            method: method.into(),
        }
    }

    /// Undecodable arguments.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Opaque failure; the message stays in the logs.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Opaque failure wrapping its cause.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a typed HTTP error.
    #[must_use]
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Stage this error belongs to.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Initialization { .. } => ErrorCategory::Initialization,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Authorization { .. } => ErrorCategory::Authorization,
            Self::NotImplemented { .. } => ErrorCategory::NotImplemented,
            Self::BadRequest { .. } => ErrorCategory::BadRequest,
            Self::Internal { .. } => ErrorCategory::Internal,
            Self::Http { .. } => ErrorCategory::Http,
        }
    }

    /// Status sent to the client.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Http { status, .. } => *status,
            other => other.category().default_status_code(),
        }
    }

    /// Returns a clone suitable for replaying a cached failure.
    ///
    /// Sources are dropped; the message is kept.
    #[must_use]
    pub fn replay(&self) -> Self {
        match self {
            Self::Initialization { component, message } => {
                Self::initialization(component.clone(), message.clone())
            }
            Self::Authentication { message } => Self::authentication(message.clone()),
            Self::Authorization { method } => Self::Authorization {
                method: method.clone(),
            },
            Self::NotImplemented { method } => Self::not_implemented(method.clone()),
            Self::BadRequest { message } => Self::bad_request(message.clone()),
            Self::Internal { message, .. } => Self::internal(message.clone()),
            Self::Http { status, message } => Self::http(*status, message.clone()),
        }
    }

    /// Client-safe body for this error.
    #[must_use]
    pub fn to_envelope(&self, request_id: Option<&str>) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
                category: self.category(),
                details: self.error_details(),
            },
            request_id: request_id.map(ToString::to_string),
        }
    }

    /// Stable code clients may match on.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Initialization { .. } => "INITIALIZATION_ERROR",
            Self::Authentication { .. } => "AUTHENTICATION_ERROR",
            Self::Authorization { .. } => "AUTHORIZATION_DENIED",
            Self::NotImplemented { .. } => "NOT_IMPLEMENTED",
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::Internal { .. } => "INTERNAL_ERROR",
            Self::Http { .. } => "HTTP_ERROR",
        }
    }

    // Internal errors never echo the underlying text to the client.
    fn client_message(&self) -> String {
        match self {
            Self::Internal { .. } => "Internal server error".to_string(),
            Self::Initialization { component, .. } => {
                format!("Component {component} is not available")
            }
            other => other.to_string(),
        }
    }

    fn error_details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Authorization {
                method: Some(method),
            }
            | Self::NotImplemented { method } => Some(serde_json::json!({ "method": method })),
            Self::Http { status, .. } => Some(serde_json::json!({ "status": status.as_u16() })),
            _ => None,
        }
    }
}

/// JSON body of every framework-generated error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// What went wrong.
    pub error: ErrorDetail,
    /// Echoed `x-request-id` for log correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Body of [`ErrorEnvelope::error`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// See [`HermesError::error_code`].
    pub code: String,
    /// Client-safe message.
    pub message: String,
    /// Stage the error came from.
    pub category: ErrorCategory,
    /// Method name or explicit status, when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_is_401_and_authorization_is_403() {
        let authn = HermesError::authentication("no identity");
        let authz = HermesError::authorization();
        assert_eq!(authn.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(authz.status_code(), StatusCode::FORBIDDEN);
        assert_ne!(authn.error_code(), authz.error_code());
    }

    #[test]
    fn test_http_error_keeps_status() {
        let err = HermesError::http(StatusCode::CONFLICT, "already exists");
        assert_eq!(err.category(), ErrorCategory::Http);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let envelope = err.to_envelope(None);
        assert_eq!(envelope.error.details.unwrap()["status"], 409);
    }

    #[test]
    fn test_internal_envelope_hides_source_text() {
        let source = anyhow::anyhow!("database password is hunter2");
        let err = HermesError::internal_with_source("query failed", source);
        let json = serde_json::to_string(&err.to_envelope(Some("req-1"))).unwrap();
        assert!(json.contains("\"code\":\"INTERNAL_ERROR\""));
        assert!(json.contains("\"request_id\":\"req-1\""));
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("query failed"));
    }

    #[test]
    fn test_not_implemented_details() {
        let err = HermesError::not_implemented("ping");
        assert_eq!(err.status_code(), StatusCode::NOT_IMPLEMENTED);
        let envelope = err.to_envelope(None);
        assert_eq!(envelope.error.details.unwrap()["method"], "ping");
        assert_eq!(envelope.error.category, ErrorCategory::NotImplemented);
    }

    #[test]
    fn test_replay_preserves_category_and_message() {
        let err = HermesError::initialization("DataManagement/FileCatalog", "policy missing");
        let again = err.replay();
        assert_eq!(again.category(), ErrorCategory::Initialization);
        assert_eq!(again.to_string(), err.to_string());
    }

    #[test]
    fn test_every_category_maps_to_an_error_status() {
        let categories = [
            ErrorCategory::Initialization,
            ErrorCategory::Authentication,
            ErrorCategory::Authorization,
            ErrorCategory::NotImplemented,
            ErrorCategory::BadRequest,
            ErrorCategory::Internal,
            ErrorCategory::Http,
        ];

        for category in categories {
            let status = category.default_status_code();
            assert!(status.as_u16() >= 400, "{category:?} maps to {status}");
        }
    }
}
