//! # Hermes
//!
//! **Request-processing core for grid service handlers.**
//!
//! Hermes serves RPC-style handlers over HTTP:
//!
//! - **Lazy class initialization**: a handler type is set up once, on its first
//!   request, no matter how many requests arrive together
//! - **Grant chain**: certificate, bearer token or anonymous access, tried in
//!   the order the handler declares
//! - **Authorization**: every method is checked against a property policy
//! - **Worker execution**: business methods run on the blocking pool; the
//!   response is always completed back on the connection task
//! - **Deferred responses**: methods may record transport operations that are
//!   replayed when the response is finished
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hermes::prelude::*;
//!
//! mod data_management_system {
//!     pub struct FileCatalogHandler;
//! }
//!
//! impl RequestHandler for data_management_system::FileCatalogHandler {
//!     fn exports(table: &mut MethodTable<Self>) {
//!         table
//!             .export("listDirectory", |_, ctx| {
//!                 let path: String = ctx.arg(0)?;
//!                 Ok(returns::ok(serde_json::json!({ "path": path, "entries": [] })).into())
//!             })
//!             .auth(["authenticated"]);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = hermes::bootstrap::load_config(Some("hermes.toml"))?;
//!     hermes::bootstrap::init_telemetry(&config)?;
//!     ServerBuilder::from_config(&config)
//!         .handler(data_management_system::FileCatalogHandler)
//!         .build()?
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Request flow
//!
//! ```text
//! HTTP → route → init once → method → grants → authorize → args
//!                                                            ↓
//! response ← finish (coordinator) ← result ← worker pool ←───┘
//! ```

#![doc(html_root_url = "https://docs.rs/hermes/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod bootstrap;

// Re-export core types
pub use hermes_core as core;

// Re-export authentication
pub use hermes_auth as auth;

// Re-export authorization
pub use hermes_authz as authz;

// Re-export configuration
pub use hermes_config as config;

// Re-export telemetry
pub use hermes_telemetry as telemetry;

// Re-export server
pub use hermes_server as server;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use hermes::prelude::*;
/// ```
pub mod prelude {
    pub use hermes_core::{
        returns, CredentialRecord, DeferredResponse, HermesError, HermesResult, MethodResult,
        Payload, RequestContext, ResponseWriter, TransportAction,
    };

    pub use hermes_server::{
        ClassRegistry, HandlerService, IncomingRequest, InitContext, MethodTable,
        RequestArguments, RequestHandler, Server, ServerBuilder, Services, ShutdownSignal,
    };

    pub use hermes_auth::{JWT_GRANT, SSL_GRANT, VISITOR_GRANT};

    pub use hermes_config::{ConfigLoader, ConfigSource, HermesConfig};
}
