//! Error types for the authorization crate.

use thiserror::Error;

/// Result type for authorization operations.
pub type AuthzResult<T> = Result<T, AuthzError>;

/// Errors raised while building policy engines.
///
/// Denials are not errors here; an engine answers `false` and the gate turns
/// that into an authorization failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthzError {
    /// An authorization section is malformed.
    #[error("invalid authorization section {section}: {reason}")]
    InvalidSection {
        /// Section name.
        section: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The policy backend could not be reached or loaded.
    #[error("policy engine unavailable: {0}")]
    Unavailable(String),
}

impl AuthzError {
    /// Creates an invalid-section error.
    pub fn invalid_section(section: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSection {
            section: section.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthzError::invalid_section("DataManagement/FileCatalog", "empty property");
        assert_eq!(
            err.to_string(),
            "invalid authorization section DataManagement/FileCatalog: empty property"
        );
    }
}
