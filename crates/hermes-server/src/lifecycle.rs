//! Once-per-class initialization.
//!
//! Every handler type gets exactly one [`HandlerClassState`], handed out by a
//! [`ClassRegistry`]. The first request that reaches a class initializes it;
//! concurrent first requests wait on the class lock and then observe either
//! the finished [`ClassRuntime`] or the cached failure.
//!
//! A failed initialization is not retried. Every later request to that class
//! fails with the same error until the process restarts.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hermes_auth::{
    ConfiguredProviderRegistry, GrantChain, IdentityProviderRegistry, IssuerMap,
    ID_PROVIDER_CATEGORY,
};
use hermes_authz::{AuthorizationGate, ConfiguredPolicyProvider, PolicyProvider};
use hermes_config::{ConfigSource, HermesConfig, ValueSource};
use hermes_core::{HermesError, HermesResult};
use hermes_telemetry::{Activity, ActivityKind, MetricsMonitor, MonitoringSink};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::handler::{MethodTable, RequestHandler};

/// Activity marked once per served request.
pub const QUERIES_ACTIVITY: &str = "Queries";

/// Builds the monitoring sink of a component, given its full name.
pub type MonitorFactory = Arc<dyn Fn(&str) -> Arc<dyn MonitoringSink> + Send + Sync>;

/// Collaborators shared by every handler of a server.
#[derive(Clone)]
pub struct Services {
    config: Arc<dyn ConfigSource>,
    policies: Arc<dyn PolicyProvider>,
    providers: Arc<dyn IdentityProviderRegistry>,
    grants: GrantChain,
    monitors: MonitorFactory,
    worker_timeout: Option<Duration>,
}

impl Services {
    /// Empty configuration, no policy sections, no identity providers and
    /// the built-in grants.
    pub fn new() -> Self {
        Self {
            config: Arc::new(ValueSource::default()),
            policies: Arc::new(ConfiguredPolicyProvider::default()),
            providers: Arc::new(ConfiguredProviderRegistry::default()),
            grants: GrantChain::with_builtin(),
            monitors: Arc::new(|_: &str| -> Arc<dyn MonitoringSink> {
                Arc::new(MetricsMonitor::new())
            }),
            worker_timeout: None,
        }
    }

    /// Collaborators built from a loaded configuration.
    pub fn from_config(config: &HermesConfig) -> Self {
        let worker_timeout = match config.server.worker_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        Self::new()
            .with_config_source(Arc::new(config.clone()))
            .with_policies(Arc::new(ConfiguredPolicyProvider::new(
                config.authorization.clone(),
            )))
            .with_identity_providers(Arc::new(ConfiguredProviderRegistry::new(
                config.identity_providers.clone(),
            )))
            .with_worker_timeout(worker_timeout)
    }

    /// Replaces the configuration source.
    pub fn with_config_source(mut self, config: Arc<dyn ConfigSource>) -> Self {
        self.config = config;
        self
    }

    /// Replaces the policy provider.
    pub fn with_policies(mut self, policies: Arc<dyn PolicyProvider>) -> Self {
        self.policies = policies;
        self
    }

    /// Replaces the identity provider registry.
    pub fn with_identity_providers(mut self, providers: Arc<dyn IdentityProviderRegistry>) -> Self {
        self.providers = providers;
        self
    }

    /// Replaces the grant chain.
    pub fn with_grant_chain(mut self, grants: GrantChain) -> Self {
        self.grants = grants;
        self
    }

    /// Replaces how monitoring sinks are built.
    pub fn with_monitor_factory(mut self, monitors: MonitorFactory) -> Self {
        self.monitors = monitors;
        self
    }

    /// Deadline for business methods. `None` waits forever.
    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Configuration source.
    pub fn config(&self) -> &dyn ConfigSource {
        self.config.as_ref()
    }

    /// Grant chain.
    pub fn grants(&self) -> &GrantChain {
        &self.grants
    }

    /// Worker deadline.
    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("grants", &self.grants)
            .field("worker_timeout", &self.worker_timeout)
            .finish_non_exhaustive()
    }
}

/// Facts about an initialized component, handed to the init hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentInfo {
    /// `System/Handler`.
    pub full_name: String,
    /// System half.
    pub system: String,
    /// Handler half.
    pub handler: String,
    /// When the class was initialized.
    pub start_time: DateTime<Utc>,
    /// URL that triggered initialization.
    pub location: String,
    /// Hermes version.
    pub version: String,
    /// `arch-os` of the running process.
    pub platform: String,
}

impl ComponentInfo {
    fn new<H: RequestHandler>(location: &str) -> Self {
        let system = H::system_name();
        let handler = H::handler_name();
        Self {
            full_name: crate::naming::full_name(&system, &handler),
            system,
            handler,
            start_time: Utc::now(),
            location: location.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS),
        }
    }
}

/// What the init hooks can see.
pub struct InitContext<'a> {
    info: &'a ComponentInfo,
    config: &'a dyn ConfigSource,
}

impl<'a> InitContext<'a> {
    /// Creates a context over `info` and `config`.
    pub fn new(info: &'a ComponentInfo, config: &'a dyn ConfigSource) -> Self {
        Self { info, config }
    }

    /// The component being initialized.
    pub fn info(&self) -> &ComponentInfo {
        self.info
    }

    /// The whole configuration tree.
    pub fn config(&self) -> &dyn ConfigSource {
        self.config
    }

    /// Reads a component option.
    ///
    /// An absolute `name` (leading `/`) is read as-is. Otherwise the
    /// component section is searched first, then the system section.
    pub fn srv_option(&self, name: &str, default: Value) -> Value {
        srv_option(self.config, &self.info.system, &self.info.handler, name, default)
    }
}

impl fmt::Debug for InitContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitContext")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Option lookup shared by [`InitContext::srv_option`].
pub fn srv_option(
    config: &dyn ConfigSource,
    system: &str,
    handler: &str,
    name: &str,
    default: Value,
) -> Value {
    if name.starts_with('/') {
        return config.get_value(name, default);
    }
    config
        .lookup(&format!("{system}/{handler}/{name}"))
        .or_else(|| config.lookup(&format!("{system}/{name}")))
        .unwrap_or(default)
}

/// Everything a class builds at first use.
pub struct ClassRuntime<H> {
    info: ComponentInfo,
    gate: AuthorizationGate,
    monitor: Arc<dyn MonitoringSink>,
    issuers: IssuerMap,
    methods: MethodTable<H>,
    grants: Vec<String>,
    default_authorization: Option<Vec<String>>,
    requests: AtomicU64,
}

impl<H> ClassRuntime<H> {
    /// Component facts.
    pub fn info(&self) -> &ComponentInfo {
        &self.info
    }

    /// Authorization gate bound to the component's section.
    pub fn gate(&self) -> &AuthorizationGate {
        &self.gate
    }

    /// Token issuers known to this class.
    pub fn issuers(&self) -> &IssuerMap {
        &self.issuers
    }

    /// Exported methods.
    pub fn methods(&self) -> &MethodTable<H> {
        &self.methods
    }

    /// Grant names, in order.
    pub fn grants(&self) -> &[String] {
        &self.grants
    }

    /// Handler-wide required properties.
    pub fn default_authorization(&self) -> Option<&[String]> {
        self.default_authorization.as_deref()
    }

    /// Requests seen so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Records one request against the monitor.
    pub(crate) fn monitor_request(&self, path: &str) {
        let served = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        self.monitor.set_location(path);
        self.monitor.set_extra_param("queries", json!(served));
        self.monitor.record_mark(QUERIES_ACTIVITY);
    }
}

impl<H> fmt::Debug for ClassRuntime<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRuntime")
            .field("info", &self.info)
            .field("methods", &self.methods)
            .field("grants", &self.grants)
            .field("requests", &self.requests())
            .finish_non_exhaustive()
    }
}

fn register_monitoring(monitor: &dyn MonitoringSink, info: &ComponentInfo) {
    monitor.set_component_type("service");
    monitor.set_component_name(&format!("Hermes/{}", info.full_name));
    monitor.set_location(&info.location);
    monitor.register_activity(Activity {
        name: QUERIES_ACTIVITY.to_string(),
        description: "Queries served".to_string(),
        category: "Framework".to_string(),
        unit: "queries".to_string(),
        kind: ActivityKind::Rate,
    });
    monitor.set_extra_param("version", json!(info.version));
    monitor.set_extra_param("platform", json!(info.platform));
    monitor.set_extra_param("start_time", json!(info.start_time.to_rfc3339()));
}

fn hook_failed(component: &str, hook: &str, err: &anyhow::Error) -> HermesError {
    HermesError::initialization(component, format!("{hook} failed: {err:#}"))
}

fn build_runtime<H: RequestHandler>(
    handler: &H,
    services: &Services,
    location: &str,
) -> HermesResult<ClassRuntime<H>> {
    let info = ComponentInfo::new::<H>(location);
    info!(component = %info.full_name, location, "First use, initializing");

    let section = H::authorization_section();
    let engine = services
        .policies
        .engine_for(&section)
        .map_err(|e| HermesError::initialization(&info.full_name, e.to_string()))?;
    let gate = AuthorizationGate::new(&info.full_name, engine);

    let monitor = (services.monitors)(&info.full_name);
    register_monitoring(monitor.as_ref(), &info);

    let init = InitContext::new(&info, services.config());
    handler
        .pre_initialize(&init)
        .map_err(|e| hook_failed(&info.full_name, "pre_initialize", &e))?;
    handler
        .initialize(&init)
        .map_err(|e| hook_failed(&info.full_name, "initialize", &e))?;

    let issuers = IssuerMap::load(services.providers.as_ref(), ID_PROVIDER_CATEGORY);

    let mut methods = MethodTable::new();
    H::exports(&mut methods);

    info!(
        component = %info.full_name,
        methods = methods.len(),
        issuers = issuers.len(),
        "Component initialized"
    );

    Ok(ClassRuntime {
        info,
        gate,
        monitor,
        issuers,
        methods,
        grants: H::grants(),
        default_authorization: H::default_authorization(),
        requests: AtomicU64::new(0),
    })
}

/// Initialization state of one handler type.
pub struct HandlerClassState<H> {
    ready: AtomicBool,
    lock: Mutex<()>,
    runtime: OnceLock<Arc<ClassRuntime<H>>>,
    failure: OnceLock<HermesError>,
    setups: AtomicUsize,
}

impl<H> Default for HandlerClassState<H> {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(false),
            lock: Mutex::new(()),
            runtime: OnceLock::new(),
            failure: OnceLock::new(),
            setups: AtomicUsize::new(0),
        }
    }
}

impl<H: RequestHandler> HandlerClassState<H> {
    /// Creates an uninitialized state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether initialization completed successfully.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Whether initialization ran and failed.
    pub fn has_failed(&self) -> bool {
        self.failure.get().is_some()
    }

    /// How many times setup actually ran. At most one.
    pub fn setup_count(&self) -> usize {
        self.setups.load(Ordering::Acquire)
    }

    /// The runtime, if initialized.
    pub fn runtime(&self) -> Option<Arc<ClassRuntime<H>>> {
        if self.is_ready() {
            self.runtime.get().cloned()
        } else {
            None
        }
    }

    /// Initializes the class on first use and returns its runtime.
    ///
    /// Returns without locking once the class is ready.
    ///
    /// # Errors
    ///
    /// Returns the initialization error, fresh on the first failure and
    /// replayed on every later call.
    pub fn ensure_initialized(
        &self,
        handler: &H,
        services: &Services,
        location: &str,
    ) -> HermesResult<Arc<ClassRuntime<H>>> {
        if let Some(runtime) = self.runtime() {
            return Ok(runtime);
        }

        let _guard = self.lock.lock();

        if let Some(runtime) = self.runtime() {
            return Ok(runtime);
        }
        if let Some(failure) = self.failure.get() {
            return Err(failure.replay());
        }

        self.setups.fetch_add(1, Ordering::AcqRel);
        match build_runtime(handler, services, location) {
            Ok(runtime) => {
                let runtime = Arc::new(runtime);
                // Only this thread, holding the lock, ever sets the cell.
                let runtime = Arc::clone(self.runtime.get_or_init(|| runtime));
                self.ready.store(true, Ordering::Release);
                Ok(runtime)
            }
            Err(err) => {
                error!(
                    component = %H::full_component_name(),
                    error = %err,
                    "Error in initialization"
                );
                let replay = err.replay();
                let _ = self.failure.set(err);
                Err(replay)
            }
        }
    }
}

impl<H> fmt::Debug for HandlerClassState<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerClassState")
            .field("ready", &self.ready.load(Ordering::Relaxed))
            .field("failed", &self.failure.get().is_some())
            .field("setups", &self.setups.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Hands out one [`HandlerClassState`] per handler type.
#[derive(Default)]
pub struct ClassRegistry {
    classes: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ClassRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<ClassRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// State of handler type `H`, created on first request.
    pub fn state<H: RequestHandler>(&self) -> Arc<HandlerClassState<H>> {
        let entry: Arc<dyn Any + Send + Sync> = self
            .classes
            .entry(TypeId::of::<H>())
            .or_insert_with(|| Arc::new(HandlerClassState::<H>::new()))
            .value()
            .clone();
        entry
            .downcast::<HandlerClassState<H>>()
            .unwrap_or_else(|_| unreachable!("class states are keyed by their handler type"))
    }

    /// Number of handler types seen.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether no handler type was seen yet.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.classes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    use hermes_core::{ErrorCategory, MethodResult};

    mod framework_system {
        use super::*;

        #[derive(Default)]
        pub struct CountingHandler {
            pub initialized: AtomicUsize,
            pub option: parking_lot::Mutex<Option<Value>>,
        }

        impl RequestHandler for CountingHandler {
            fn exports(table: &mut MethodTable<Self>) {
                table.export("ping", |_, _| Ok(MethodResult::Empty));
            }

            fn initialize(&self, init: &InitContext<'_>) -> anyhow::Result<()> {
                // Widen the race window.
                std::thread::sleep(Duration::from_millis(20));
                *self.option.lock() = Some(init.srv_option("MaxListing", json!(100)));
                self.initialized.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        #[derive(Default)]
        pub struct BrokenHandler {
            pub attempts: AtomicUsize,
        }

        impl RequestHandler for BrokenHandler {
            fn exports(table: &mut MethodTable<Self>) {
                table.export("ping", |_, _| Ok(MethodResult::Empty));
            }

            fn initialize(&self, _init: &InitContext<'_>) -> anyhow::Result<()> {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("database unreachable")
            }
        }
    }

    use framework_system::{BrokenHandler, CountingHandler};

    #[test]
    fn test_concurrent_first_use_initializes_once() {
        let registry = ClassRegistry::new();
        let state = registry.state::<CountingHandler>();
        let handler = Arc::new(CountingHandler::default());
        let services = Services::new();
        let barrier = Arc::new(Barrier::new(8));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                let handler = Arc::clone(&handler);
                let services = services.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let runtime = state
                        .ensure_initialized(&handler, &services, "/Framework/Counting")
                        .unwrap();
                    runtime.methods().len()
                })
            })
            .collect();

        for thread in threads {
            assert_eq!(thread.join().unwrap(), 1);
        }
        assert_eq!(handler.initialized.load(Ordering::SeqCst), 1);
        assert_eq!(state.setup_count(), 1);
        assert!(state.is_ready());
    }

    #[test]
    fn test_failure_is_cached() {
        let state = HandlerClassState::<BrokenHandler>::new();
        let handler = BrokenHandler::default();
        let services = Services::new();

        let first = state
            .ensure_initialized(&handler, &services, "/Framework/Broken")
            .unwrap_err();
        let second = state
            .ensure_initialized(&handler, &services, "/Framework/Broken")
            .unwrap_err();

        assert_eq!(first.category(), ErrorCategory::Initialization);
        assert_eq!(first.to_string(), second.to_string());
        assert!(first.to_string().contains("database unreachable"));
        assert_eq!(handler.attempts.load(Ordering::SeqCst), 1);
        assert!(!state.is_ready());
        assert!(state.has_failed());
        assert!(state.runtime().is_none());
    }

    #[test]
    fn test_registry_hands_out_one_state_per_type() {
        let registry = ClassRegistry::new();
        let a = registry.state::<CountingHandler>();
        let b = registry.state::<CountingHandler>();
        let c = registry.state::<BrokenHandler>();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!c.is_ready());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_monitoring_registration() {
        let monitor = MetricsMonitor::new();
        let shared = monitor.clone();
        let services = Services::new().with_monitor_factory(Arc::new(move |_: &str| -> Arc<dyn MonitoringSink> {
            Arc::new(shared.clone())
        }));
        let state = HandlerClassState::<CountingHandler>::new();
        let runtime = state
            .ensure_initialized(&CountingHandler::default(), &services, "https://host:8443/Framework/Counting")
            .unwrap();

        assert_eq!(monitor.component_type(), "service");
        assert_eq!(monitor.component_name(), "Hermes/Framework/Counting");
        assert_eq!(monitor.location(), "https://host:8443/Framework/Counting");
        assert_eq!(monitor.activities()[0].name, QUERIES_ACTIVITY);
        assert_eq!(monitor.extra_param("version"), Some(json!(env!("CARGO_PKG_VERSION"))));

        runtime.monitor_request("/Framework/Counting");
        runtime.monitor_request("/Framework/Counting");
        assert_eq!(runtime.requests(), 2);
        assert_eq!(monitor.marks(QUERIES_ACTIVITY), 2);
        assert_eq!(monitor.extra_param("queries"), Some(json!(2)));
        assert_eq!(monitor.location(), "/Framework/Counting");
    }

    #[test]
    fn test_srv_option_search_order() {
        let config = ValueSource::new(json!({
            "Framework": {
                "Timeout": 10,
                "MaxListing": 5,
                "Counting": { "MaxListing": 50 }
            },
            "Global": { "Site": "CERN" }
        }));
        let option = |name: &str| srv_option(&config, "Framework", "Counting", name, json!(null));

        assert_eq!(option("MaxListing"), json!(50));
        assert_eq!(option("Timeout"), json!(10));
        assert_eq!(option("Missing"), json!(null));
        assert_eq!(option("/Global/Site"), json!("CERN"));
    }

    #[test]
    fn test_init_hook_reads_options() {
        let config = ValueSource::new(json!({ "Framework": { "Counting": { "MaxListing": 7 } } }));
        let services = Services::new().with_config_source(Arc::new(config));
        let handler = CountingHandler::default();
        HandlerClassState::<CountingHandler>::new()
            .ensure_initialized(&handler, &services, "/Framework/Counting")
            .unwrap();
        assert_eq!(*handler.option.lock(), Some(json!(7)));
    }
}
