//! HTTP transport.
//!
//! A Hyper 1 HTTP/1.1 server. Each connection runs on its own task, which
//! acts as the coordinator for the requests on that connection. Requests are
//! routed by URL prefix to mounted handlers; `/health`, `/ready` and
//! `/metrics` are answered directly.
//!
//! ```rust,ignore
//! use hermes_server::Server;
//!
//! let server = Server::builder()
//!     .http_addr("0.0.0.0:8443")
//!     .handler(FileCatalogHandler::default())
//!     .build()?;
//! server.run().await?;
//! ```

use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hermes_auth::PeerCertificates;
use hermes_config::{HermesConfig, ServerConfig};
use hermes_core::{HermesError, ResponseWriter};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::coordinator::{Endpoint, HandlerService, HttpResponse};
use crate::dispatch::IncomingRequest;
use crate::error::{ServerError, ServerResult};
use crate::finish::finish_error;
use crate::handler::RequestHandler;
use crate::health::{HealthCheck, ReadinessCheck};
use crate::lifecycle::{ClassRegistry, Services};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

type Mounter = Box<dyn FnOnce(&Arc<Services>, &ClassRegistry) -> Arc<dyn Endpoint> + Send>;

/// The Hermes HTTP server.
pub struct Server {
    config: ServerConfig,
    endpoints: Vec<Arc<dyn Endpoint>>,
    health: HealthCheck,
    readiness: ReadinessCheck,
}

impl Server {
    /// Starts a builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Server settings.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Mount points, longest first.
    pub fn mounts(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.mount()).collect()
    }

    /// Readiness probe.
    pub fn readiness(&self) -> &ReadinessCheck {
        &self.readiness
    }

    /// Binds the configured address and serves until SIGTERM or SIGINT.
    pub async fn run(self) -> ServerResult<()> {
        let shutdown = ShutdownSignal::with_os_signals();
        self.run_with_shutdown(shutdown).await
    }

    /// Binds the configured address and serves until `shutdown` fires.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        let raw = &self.config.http_addr;
        let addr: SocketAddr = raw
            .parse()
            .map_err(|e| ServerError::bind(format!("invalid address '{raw}': {e}")))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(format!("failed to bind to {addr}: {e}")))?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` fires, then
    /// waits for open connections up to the shutdown timeout.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> ServerResult<()> {
        let local = listener.local_addr()?;
        info!(addr = %local, mounts = ?self.mounts(), "Server listening");

        let server = Arc::new(self);
        let tracker = ConnectionTracker::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&server);
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = server.serve_connection(stream, peer, shutdown).await {
                                debug!(peer = %peer, error = %e, "Connection error");
                            }
                            drop(token);
                        });
                    }
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
                () = shutdown.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        server.readiness.set_accepting(false);

        let timeout = Duration::from_secs(server.config.shutdown_timeout_secs);
        info!(
            timeout = ?timeout,
            connections = tracker.active_connections(),
            "Waiting for connections to close"
        );
        if tokio::time::timeout(timeout, tracker.drained()).await.is_err() {
            warn!(
                connections = tracker.active_connections(),
                "Shutdown timeout reached with connections still open"
            );
        }

        info!("Server stopped");
        Ok(())
    }

    async fn serve_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: ShutdownSignal,
    ) -> Result<(), hyper::Error> {
        let server = Arc::clone(self);
        let service = service_fn(move |req: Request<Incoming>| {
            let server = Arc::clone(&server);
            async move { Ok::<_, Infallible>(server.handle_http(req, peer).await) }
        });

        let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => result,
            () = shutdown.recv() => {
                debug!(peer = %peer, "Closing connection for shutdown");
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        }
    }

    async fn handle_http(&self, req: Request<Incoming>, peer: SocketAddr) -> HttpResponse {
        let (parts, body) = req.into_parts();
        let max_body = usize::try_from(self.config.max_body_bytes).unwrap_or(usize::MAX);

        let declared = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > self.config.max_body_bytes) {
            return error_response(&HermesError::http(
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large",
            ));
        }

        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let collected = tokio::time::timeout(timeout, Limited::new(body, max_body).collect()).await;
        let body = match collected {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return error_response(&HermesError::http(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Request body too large",
                ));
            }
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "Failed to read request body");
                return error_response(&HermesError::bad_request("Failed to read request body"));
            }
            Err(_) => {
                warn!(peer = %peer, "Request body read timed out");
                return error_response(&HermesError::http(
                    StatusCode::REQUEST_TIMEOUT,
                    "Request body read timed out",
                ));
            }
        };

        let mut request = IncomingRequest::new(parts.method, parts.uri.path());
        request.query = parts.uri.query().map(str::to_string);
        request.headers = parts.headers;
        request.body = body;
        request.peer = Some(peer);
        request.peer_certificates = parts.extensions.get::<PeerCertificates>().cloned();

        self.dispatch(request).await
    }

    /// Routes one request. Used by the HTTP loop and handy in tests.
    pub async fn dispatch(&self, request: IncomingRequest) -> HttpResponse {
        match (&request.method, request.path.as_str()) {
            (&Method::GET, "/health") => return self.health_response(),
            (&Method::GET, "/ready") => return self.ready_response(),
            (&Method::GET, "/metrics") => return metrics_response(),
            _ => {}
        }

        match self.route(&request.path) {
            Some(endpoint) => endpoint.call(request).await,
            None => {
                debug!(path = %request.path, "No handler mounted");
                error_response(&HermesError::http(StatusCode::NOT_FOUND, "Not Found"))
            }
        }
    }

    fn route(&self, path: &str) -> Option<&Arc<dyn Endpoint>> {
        // Endpoints are sorted longest mount first.
        self.endpoints.iter().find(|endpoint| {
            let mount = endpoint.mount();
            path.strip_prefix(mount)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    fn health_response(&self) -> HttpResponse {
        json_response(StatusCode::OK, serde_json::to_vec(&self.health.status()))
    }

    fn ready_response(&self) -> HttpResponse {
        let status = self.readiness.status(
            self.endpoints
                .iter()
                .map(|e| (e.component(), e.initialized().into())),
        );
        let code = if status.ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        json_response(code, serde_json::to_vec(&status))
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("mounts", &self.mounts())
            .finish_non_exhaustive()
    }
}

fn json_response(status: StatusCode, body: Result<Vec<u8>, serde_json::Error>) -> HttpResponse {
    let body = body.unwrap_or_else(|e| {
        error!(error = %e, "Failed to encode probe response");
        b"{}".to_vec()
    });
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static(hermes_core::STRUCTURED_CONTENT_TYPE),
    );
    response
}

fn metrics_response() -> HttpResponse {
    match hermes_telemetry::render_metrics() {
        Some(rendered) => {
            let mut response = Response::new(Full::new(Bytes::from(rendered)));
            response.headers_mut().insert(
                CONTENT_TYPE,
                http::HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        None => error_response(&HermesError::http(StatusCode::NOT_FOUND, "Metrics are disabled")),
    }
}

fn error_response(err: &HermesError) -> HttpResponse {
    let mut writer = ResponseWriter::new();
    if let Err(e) = finish_error(err, None, &mut writer) {
        error!(error = %e, "Failed to write error response");
    }
    writer.into_response()
}

/// Builds a [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    services: Services,
    registry: Arc<ClassRegistry>,
    service_name: String,
    mounters: Vec<Mounter>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Default settings, default collaborators and the process-wide class
    /// registry.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            services: Services::new(),
            registry: ClassRegistry::global(),
            service_name: "hermes".to_string(),
            mounters: Vec::new(),
        }
    }

    /// Settings and collaborators from a loaded configuration.
    pub fn from_config(config: &HermesConfig) -> Self {
        Self::new()
            .server_config(config.server.clone())
            .services(Services::from_config(config))
            .service_name(config.telemetry.service_name.clone())
    }

    /// Replaces the server settings.
    pub fn server_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the listen address.
    pub fn http_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.http_addr = addr.into();
        self
    }

    /// Sets the graceful shutdown timeout.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout_secs = timeout.as_secs();
        self
    }

    /// Sets the largest accepted request body.
    pub fn max_body_bytes(mut self, max: u64) -> Self {
        self.config.max_body_bytes = max;
        self
    }

    /// Replaces the collaborators.
    pub fn services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Uses a private class registry instead of the process-wide one.
    pub fn class_registry(mut self, registry: Arc<ClassRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Name reported by `/health`.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Mounts `handler` at `/<System>/<Handler>`.
    pub fn handler<H: RequestHandler>(mut self, handler: H) -> Self {
        self.mounters.push(Box::new(
            move |services: &Arc<Services>, registry: &ClassRegistry| -> Arc<dyn Endpoint> {
                Arc::new(HandlerService::new(handler, Arc::clone(services), registry))
            },
        ));
        self
    }

    /// Mounts `handler` at `mount`.
    pub fn handler_at<H: RequestHandler>(mut self, mount: impl Into<String>, handler: H) -> Self {
        let mount = mount.into();
        self.mounters.push(Box::new(
            move |services: &Arc<Services>, registry: &ClassRegistry| -> Arc<dyn Endpoint> {
                let service = HandlerService::new(handler, Arc::clone(services), registry);
                Arc::new(service.with_mount(mount))
            },
        ));
        self
    }

    /// Builds the server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::DuplicateMount`] if two handlers share a mount.
    pub fn build(self) -> ServerResult<Server> {
        let services = Arc::new(self.services);
        let mut endpoints: Vec<Arc<dyn Endpoint>> = self
            .mounters
            .into_iter()
            .map(|mount| mount(&services, &self.registry))
            .collect();

        let mut seen = HashSet::new();
        for endpoint in &endpoints {
            if !seen.insert(endpoint.mount()) {
                return Err(ServerError::DuplicateMount(endpoint.mount().to_string()));
            }
        }
        endpoints.sort_by(|a, b| b.mount().len().cmp(&a.mount().len()));

        Ok(Server {
            config: self.config,
            endpoints,
            health: HealthCheck::new(self.service_name, env!("CARGO_PKG_VERSION")),
            readiness: ReadinessCheck::new(),
        })
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("service_name", &self.service_name)
            .field("handlers", &self.mounters.len())
            .finish_non_exhaustive()
    }
}
