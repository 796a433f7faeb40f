//! # Hermes Server
//!
//! Request lifecycle and HTTP transport for Hermes service handlers.
//!
//! A request travels through these stages:
//!
//! 1. **Initialization**: the first request to a handler type builds its
//!    class runtime (authorization gate, monitoring, token issuers, method
//!    table) exactly once, even under concurrent first requests
//! 2. **Credentials**: the handler's grants are tried in order; the first
//!    success wins, every failure is reported together
//! 3. **Authorization**: the method's required properties are checked
//!    against the credentials
//! 4. **Dispatch**: the `method` argument selects an exported method
//! 5. **Execution**: the method runs on the blocking worker pool
//! 6. **Finishing**: back on the connection task, the result (or its
//!    deferred transport log) is written and the request is logged
//!
//! ## Example
//!
//! ```rust,ignore
//! use hermes_server::{MethodTable, RequestHandler, Server};
//!
//! mod data_management_system {
//!     pub struct FileCatalogHandler;
//! }
//!
//! impl RequestHandler for data_management_system::FileCatalogHandler {
//!     fn exports(table: &mut MethodTable<Self>) {
//!         table.export("ping", |_, _| Ok(serde_json::json!("pong").into()));
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Server::builder()
//!         .handler(data_management_system::FileCatalogHandler)
//!         .build()?
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/hermes-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod coordinator;
mod dispatch;
mod error;
pub mod finish;
mod handler;
mod health;
mod lifecycle;
pub mod naming;
mod server;
mod shutdown;

pub use coordinator::{normalize_error, Endpoint, EndpointFuture, HandlerService, HttpResponse};
pub use dispatch::{
    default_method_args, default_method_name, IncomingRequest, RequestArguments, ARGS_ARG,
    METHOD_ARG, RAW_CONTENT_ARG,
};
pub use error::{ServerError, ServerResult};
pub use handler::{
    Export, FinisherFn, MethodEntry, MethodFn, MethodTable, RequestHandler, DEFAULT_GRANTS,
    METHOD_PREFIX,
};
pub use health::{
    ComponentReadiness, HealthCheck, HealthStatus, ReadinessCheck, ReadinessStatus,
};
pub use lifecycle::{
    srv_option, ClassRegistry, ClassRuntime, ComponentInfo, HandlerClassState, InitContext,
    MonitorFactory, Services, QUERIES_ACTIVITY,
};
pub use server::{Server, ServerBuilder};
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownSignal};
