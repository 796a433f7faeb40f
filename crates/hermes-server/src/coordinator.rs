//! The request coordinator.
//!
//! [`HandlerService`] drives one request through the lifecycle:
//!
//! ```text
//! initialize -> resolve method -> authenticate -> authorize -> decode args
//!     -> run on worker -> finish on coordinator -> log
//! ```
//!
//! Every step but the method body runs on the async task that owns the
//! connection. The method body runs on tokio's blocking pool; the
//! coordinator only awaits the hand-off. First-use class initialization also
//! runs on the blocking pool, so a slow `initialize` never stalls a runtime
//! worker. The [`ResponseWriter`] is created
//! after the worker returns and never crosses a thread boundary.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use hermes_auth::GrantContext;
use hermes_authz::AuthorizationGate;
use hermes_core::{HermesError, HermesResult, MethodResult, RequestContext, ResponseWriter};
use http::Response;
use http_body_util::Full;
use tracing::{debug, error, info, warn};

use crate::dispatch::{IncomingRequest, RequestArguments};
use crate::finish::{classify, finish_error, finish_result};
use crate::handler::{MethodEntry, RequestHandler};
use crate::lifecycle::{ClassRegistry, ClassRuntime, HandlerClassState, Services};

/// Response type produced by the coordinator.
pub type HttpResponse = Response<Full<Bytes>>;

/// Boxed future returned by [`Endpoint::call`].
pub type EndpointFuture<'a> = Pin<Box<dyn Future<Output = HttpResponse> + Send + 'a>>;

/// A mounted handler, with its type erased.
pub trait Endpoint: Send + Sync {
    /// URL prefix the endpoint is mounted at.
    fn mount(&self) -> &str;

    /// `System/Handler` of the mounted handler.
    fn component(&self) -> String;

    /// Whether the handler class initialized successfully, `None` before
    /// first use.
    fn initialized(&self) -> Option<bool>;

    /// Serves one request.
    fn call(&self, request: IncomingRequest) -> EndpointFuture<'_>;
}

/// Runs requests for one handler.
pub struct HandlerService<H: RequestHandler> {
    handler: Arc<H>,
    state: Arc<HandlerClassState<H>>,
    services: Arc<Services>,
    mount: String,
}

struct Prepared<H> {
    runtime: Arc<ClassRuntime<H>>,
    entry: Arc<MethodEntry<H>>,
}

impl<H: RequestHandler> HandlerService<H> {
    /// Mounts `handler` at `/<System>/<Handler>`.
    pub fn new(handler: H, services: Arc<Services>, registry: &ClassRegistry) -> Self {
        Self {
            handler: Arc::new(handler),
            state: registry.state::<H>(),
            services,
            mount: format!("/{}", H::full_component_name()),
        }
    }

    /// Mounts at `mount` instead.
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        let mount = mount.into();
        self.mount = format!("/{}", mount.trim_matches('/'));
        self
    }

    /// The handler instance.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// The class state shared by every mount of `H`.
    pub fn class_state(&self) -> &Arc<HandlerClassState<H>> {
        &self.state
    }

    /// Serves one request.
    pub async fn handle(&self, request: IncomingRequest) -> HttpResponse {
        let mut ctx = RequestContext::new(request.path.clone()).with_peer(request.peer);

        let prepared = match self.initialized_runtime(&request.path).await {
            Ok(runtime) => self.prepare(runtime, &request, &mut ctx),
            Err(err) => Err(err),
        };
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return self.respond_error(&ctx, &err),
        };

        let (ctx, result) = self.execute(&prepared, ctx).await;

        self.respond(&prepared, &ctx, result)
    }

    /// The class runtime, initializing the class on the blocking pool if this
    /// is its first request.
    async fn initialized_runtime(&self, location: &str) -> HermesResult<Arc<ClassRuntime<H>>> {
        if self.state.is_ready() || self.state.has_failed() {
            return self
                .state
                .ensure_initialized(&self.handler, &self.services, location);
        }

        let state = Arc::clone(&self.state);
        let handler = Arc::clone(&self.handler);
        let services = Arc::clone(&self.services);
        let location = location.to_string();
        tokio::task::spawn_blocking(move || {
            state.ensure_initialized(&handler, &services, &location)
        })
        .await
        .unwrap_or_else(|join_error| {
            error!(
                component = %H::full_component_name(),
                error = %join_error,
                "Initialization task failed"
            );
            Err(HermesError::internal("Initialization failed"))
        })
    }

    fn prepare(
        &self,
        runtime: Arc<ClassRuntime<H>>,
        request: &IncomingRequest,
        ctx: &mut RequestContext,
    ) -> HermesResult<Prepared<H>> {
        let arguments = RequestArguments::parse(request)?;
        let method = self.handler.method_name(&arguments)?;
        ctx.set_method(method.as_str());

        let Some(entry) = runtime.methods().resolve(&method) else {
            error!(component = %runtime.info().full_name, method = %method, "Invalid method");
            return Err(HermesError::not_implemented(method));
        };

        runtime.monitor_request(&request.path);

        let grant_ctx = GrantContext::new(&request.headers, arguments.as_map(), runtime.issuers())
            .with_peer_certificates(request.peer_certificates.as_ref());
        let credentials = self
            .services
            .grants()
            .resolve(runtime.grants(), &grant_ctx)
            .map_err(|failure| {
                warn!(
                    component = %runtime.info().full_name,
                    path = %request.path,
                    peer = %ctx.formatted_remote_credentials(),
                    reasons = %failure,
                    "Error gathering credentials"
                );
                HermesError::from(failure)
            })?;
        ctx.set_credentials(credentials);

        let required = AuthorizationGate::required_properties(
            entry.required_properties(),
            runtime.default_authorization(),
        )
        .map(<[String]>::to_vec);
        runtime
            .gate()
            .check(&method, &request.path, ctx.credentials_mut(), required.as_deref())?;
        ctx.set_required_properties(required);

        let (args, kwargs) = self.handler.method_args(&arguments)?;
        ctx.set_arguments(args, kwargs);
        ctx.set_raw_content(arguments.raw_content());

        Ok(Prepared { runtime, entry })
    }

    async fn execute(
        &self,
        prepared: &Prepared<H>,
        ctx: RequestContext,
    ) -> (RequestContext, HermesResult<MethodResult>) {
        let component = prepared.runtime.info().full_name.clone();
        let handler = Arc::clone(&self.handler);
        let call = prepared.entry.call();
        let mut worker_ctx = ctx.clone();
        let worker_component = component.clone();

        let task = tokio::task::spawn_blocking(move || {
            debug!(
                component = %worker_component,
                method = %worker_ctx.method(),
                request_id = %worker_ctx.request_id(),
                credentials = %worker_ctx.formatted_remote_credentials(),
                "Incoming request"
            );
            let result = handler
                .initialize_request(&mut worker_ctx)
                .and_then(|()| (*call)(handler.as_ref(), &mut worker_ctx));
            (worker_ctx, result)
        });

        let joined = match self.services.worker_timeout() {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    error!(
                        component = %component,
                        method = %ctx.method(),
                        timeout = ?limit,
                        "Method execution timed out"
                    );
                    return (ctx, Err(HermesError::internal("Method execution timed out")));
                }
            },
            None => task.await,
        };

        match joined {
            Ok((worker_ctx, Ok(result))) => (worker_ctx, Ok(result)),
            Ok((worker_ctx, Err(err))) => {
                let err = normalize_error(err, &component, worker_ctx.method());
                (worker_ctx, Err(err))
            }
            Err(join_error) => {
                error!(
                    component = %component,
                    method = %ctx.method(),
                    error = %join_error,
                    "Worker task failed"
                );
                (ctx, Err(HermesError::internal("Method execution failed")))
            }
        }
    }

    fn respond(
        &self,
        prepared: &Prepared<H>,
        ctx: &RequestContext,
        result: HermesResult<MethodResult>,
    ) -> HttpResponse {
        let mut writer = ResponseWriter::new();

        let written = match result {
            Ok(mut result) => match prepared.entry.finisher() {
                Some(finisher) => {
                    result.strip_diagnostics();
                    (*finisher)(self.handler.as_ref(), ctx, result, &mut writer).map(|()| None)
                }
                None => finish_result(result, ctx.raw_content(), &mut writer),
            },
            Err(err) => return self.respond_error(ctx, &err),
        };

        let structured = match written {
            Ok(structured) => structured,
            Err(err) => {
                error!(
                    component = %prepared.runtime.info().full_name,
                    method = %ctx.method(),
                    error = %err,
                    "Failed to complete response"
                );
                if !writer.is_finished() {
                    writer = ResponseWriter::new();
                    let internal =
                        HermesError::internal_with_source("Failed to complete response", err);
                    self.write_error(ctx, &internal, &mut writer);
                }
                None
            }
        };

        if !writer.is_finished() {
            // A finisher that forgot to complete still produces a response.
            let _ = writer.finish(None);
        }

        self.log_outcome(ctx, writer.status(), structured.as_ref());
        writer.into_response()
    }

    fn respond_error(&self, ctx: &RequestContext, err: &HermesError) -> HttpResponse {
        let mut writer = ResponseWriter::new();
        self.write_error(ctx, err, &mut writer);
        self.log_outcome(ctx, writer.status(), None);
        writer.into_response()
    }

    fn write_error(&self, ctx: &RequestContext, err: &HermesError, writer: &mut ResponseWriter) {
        let request_id = ctx.request_id().to_string();
        if let Err(transport) = finish_error(err, Some(&request_id), writer) {
            error!(error = %transport, "Failed to write error response");
        }
    }

    fn log_outcome(
        &self,
        ctx: &RequestContext,
        status: http::StatusCode,
        structured: Option<&serde_json::Value>,
    ) {
        let component = H::full_component_name();
        let method = if ctx.method().is_empty() { "unknown" } else { ctx.method() };
        let elapsed = ctx.elapsed();
        let classification = classify(status, structured);
        let outcome = if status.as_u16() >= 400 || classification.starts_with("ERROR") {
            "error"
        } else {
            "ok"
        };

        hermes_telemetry::record_request(&component, method, outcome, elapsed);
        info!(
            component = %component,
            method,
            status = status.as_u16(),
            request_id = %ctx.request_id(),
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            "{:.2} ms {} {} {}",
            elapsed.as_secs_f64() * 1000.0,
            ctx.formatted_remote_credentials(),
            component,
            classification
        );
    }
}

/// Maps a business-method error to what the client sees.
///
/// Typed [`HermesError`]s keep their category and status. Anything else
/// becomes an internal error; the original text only reaches the log.
pub fn normalize_error(err: anyhow::Error, component: &str, method: &str) -> HermesError {
    match err.downcast::<HermesError>() {
        Ok(typed) => {
            warn!(component, method, error = %typed, "Method raised a typed error");
            typed
        }
        Err(other) => {
            error!(component, method, error = %format!("{other:#}"), "Exception serving request");
            HermesError::internal_with_source("Exception serving request", other)
        }
    }
}

impl<H: RequestHandler> Endpoint for HandlerService<H> {
    fn mount(&self) -> &str {
        &self.mount
    }

    fn component(&self) -> String {
        H::full_component_name()
    }

    fn initialized(&self) -> Option<bool> {
        if self.state.is_ready() {
            Some(true)
        } else if self.state.has_failed() {
            Some(false)
        } else {
            None
        }
    }

    fn call(&self, request: IncomingRequest) -> EndpointFuture<'_> {
        Box::pin(self.handle(request))
    }
}

impl<H: RequestHandler> fmt::Debug for HandlerService<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerService")
            .field("component", &H::full_component_name())
            .field("mount", &self.mount)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::ErrorCategory;
    use http::StatusCode;

    #[test]
    fn test_normalize_generic_error() {
        let err = normalize_error(anyhow::anyhow!("disk on fire"), "Test/Ping", "ping");
        assert_eq!(err.category(), ErrorCategory::Internal);
        let envelope = serde_json::to_string(&err.to_envelope(None)).unwrap();
        assert!(!envelope.contains("disk on fire"));
    }

    #[test]
    fn test_normalize_keeps_typed_errors() {
        let err = normalize_error(
            HermesError::http(StatusCode::CONFLICT, "file exists").into(),
            "Test/Ping",
            "ping",
        );
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err = normalize_error(HermesError::bad_request("bad lfn").into(), "Test/Ping", "ping");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_normalize_context_wrapped_error() {
        let err = anyhow::Error::new(std::io::Error::other("timeout")).context("reading replica");
        assert_eq!(
            normalize_error(err, "Test/Ping", "ping").category(),
            ErrorCategory::Internal
        );
    }
}
