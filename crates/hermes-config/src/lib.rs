//! Typed configuration for Hermes.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides (`HERMES__SECTION__KEY`)
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//! - Path lookup for free-form component options via [`ConfigSource`]
//!
//! # Example
//!
//! ```no_run
//! use hermes_config::ConfigLoader;
//!
//! # fn main() -> Result<(), hermes_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_dotenv()?
//!     .with_optional_file("hermes.toml")?
//!     .with_env_prefix("HERMES")
//!     .load()?;
//!
//! println!("listening on {}", config.server.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! http_addr = "0.0.0.0:8443"
//! worker_timeout_ms = 120000
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//!
//! [authorization."DataManagement/FileCatalog"]
//! default = ["authenticated"]
//!
//! [identity_providers.CheckIn]
//! issuer = "https://aai.example.org/oidc/"
//! algorithm = "HS256"
//! secret = "change-me"
//!
//! [components.DataManagement.FileCatalog]
//! MaxListing = 500
//! ```

#![doc(html_root_url = "https://docs.rs/hermes-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;
mod source;

pub use config::HermesConfig;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    AuthorizationSection, IdentityProviderConfig, LogFormat, LoggingConfig, MetricsConfig,
    ServerConfig, TelemetryConfigSection,
};
pub use source::{ConfigSource, ValueSource};
