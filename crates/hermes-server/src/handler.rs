//! Request handlers and their method tables.
//!
//! A handler is a type implementing [`RequestHandler`]. It lists its
//! exported methods once, in [`RequestHandler::exports`]; the lifecycle
//! builds the [`MethodTable`] during class initialization and only looks
//! names up afterwards.
//!
//! ```
//! use hermes_core::{MethodResult, RequestContext};
//! use hermes_server::{MethodTable, RequestHandler};
//! use serde_json::json;
//!
//! mod framework_system {
//!     use super::*;
//!
//!     pub struct PingHandler;
//!
//!     impl PingHandler {
//!         fn export_ping(&self, _ctx: &mut RequestContext) -> anyhow::Result<MethodResult> {
//!             Ok(json!("pong").into())
//!         }
//!     }
//!
//!     impl RequestHandler for PingHandler {
//!         fn exports(table: &mut MethodTable<Self>) {
//!             table.export("ping", Self::export_ping).auth(["all"]);
//!         }
//!     }
//! }
//!
//! # fn main() {
//! use framework_system::PingHandler;
//! assert_eq!(PingHandler::full_component_name(), "Framework/Ping");
//!
//! let mut table = MethodTable::new();
//! PingHandler::exports(&mut table);
//! assert_eq!(table.resolve("ping").unwrap().export_name(), "export_ping");
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use hermes_auth::{JWT_GRANT, SSL_GRANT};
use hermes_core::{HermesResult, MethodResult, RequestContext, ResponseWriter, TransportError};
use serde_json::{Map, Value};

use crate::dispatch::{self, RequestArguments};
use crate::lifecycle::InitContext;
use crate::naming;

/// Prefix of the internal name of every exported method.
pub const METHOD_PREFIX: &str = "export_";

/// Grants tried when a handler does not choose its own.
pub const DEFAULT_GRANTS: [&str; 2] = [SSL_GRANT, JWT_GRANT];

/// A business method. Runs on a worker thread.
pub type MethodFn<H> =
    Arc<dyn Fn(&H, &mut RequestContext) -> anyhow::Result<MethodResult> + Send + Sync>;

/// A per-method finisher. Runs on the coordinator and completes the response
/// itself.
pub type FinisherFn<H> = Arc<
    dyn Fn(&H, &RequestContext, MethodResult, &mut ResponseWriter) -> Result<(), TransportError>
        + Send
        + Sync,
>;

/// A service handler.
///
/// Every hook has a default; only [`exports`](Self::exports) is required.
/// Associated functions without `self` describe the handler class; methods
/// taking `&self` run against the mounted instance.
pub trait RequestHandler: Send + Sync + Sized + 'static {
    /// System half of the component name.
    fn system_name() -> String {
        naming::system_name(std::any::type_name::<Self>())
    }

    /// Handler half of the component name.
    fn handler_name() -> String {
        naming::handler_name(std::any::type_name::<Self>())
    }

    /// `System/Handler`.
    fn full_component_name() -> String {
        naming::full_name(&Self::system_name(), &Self::handler_name())
    }

    /// Authorization section the policy engine is bound to.
    fn authorization_section() -> String {
        Self::full_component_name()
    }

    /// Grant names, tried in order. An empty list admits anonymous callers.
    fn grants() -> Vec<String> {
        DEFAULT_GRANTS.iter().map(|g| (*g).to_string()).collect()
    }

    /// Properties required by methods that do not declare their own.
    fn default_authorization() -> Option<Vec<String>> {
        None
    }

    /// Registers the exported methods.
    fn exports(table: &mut MethodTable<Self>);

    /// Framework-level setup, run once per class before [`initialize`](Self::initialize).
    fn pre_initialize(&self, _init: &InitContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handler setup, run once per class at first use.
    ///
    /// Runs on tokio's blocking pool, so it may block on I/O. Concurrent first
    /// requests wait for it to finish.
    fn initialize(&self, _init: &InitContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs on the worker before every method call.
    fn initialize_request(&self, _ctx: &mut RequestContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Picks the method to call.
    fn method_name(&self, arguments: &RequestArguments) -> HermesResult<String> {
        dispatch::default_method_name(arguments)
    }

    /// Decodes positional and keyword arguments.
    fn method_args(
        &self,
        arguments: &RequestArguments,
    ) -> HermesResult<(Vec<Value>, Map<String, Value>)> {
        dispatch::default_method_args(arguments)
    }
}

/// One exported method.
pub struct MethodEntry<H> {
    name: String,
    export_name: String,
    call: MethodFn<H>,
    required: Option<Vec<String>>,
    finisher: Option<FinisherFn<H>>,
}

impl<H> MethodEntry<H> {
    /// External method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Internal name, `export_<name>`.
    pub fn export_name(&self) -> &str {
        &self.export_name
    }

    /// Properties this method requires, if it declares any.
    pub fn required_properties(&self) -> Option<&[String]> {
        self.required.as_deref()
    }

    /// Whether the method completes its own response.
    pub fn has_finisher(&self) -> bool {
        self.finisher.is_some()
    }

    pub(crate) fn call(&self) -> MethodFn<H> {
        Arc::clone(&self.call)
    }

    pub(crate) fn finisher(&self) -> Option<&FinisherFn<H>> {
        self.finisher.as_ref()
    }
}

impl<H> fmt::Debug for MethodEntry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("export_name", &self.export_name)
            .field("required", &self.required)
            .field("finisher", &self.finisher.is_some())
            .finish_non_exhaustive()
    }
}

/// Exported methods of a handler, keyed by external name.
pub struct MethodTable<H> {
    entries: HashMap<String, Arc<MethodEntry<H>>>,
}

impl<H> Default for MethodTable<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<H> MethodTable<H> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports `call` under `name`. Re-exporting a name replaces it.
    pub fn export<F>(&mut self, name: &str, call: F) -> Export<'_, H>
    where
        F: Fn(&H, &mut RequestContext) -> anyhow::Result<MethodResult> + Send + Sync + 'static,
    {
        let entry = MethodEntry {
            name: name.to_string(),
            export_name: format!("{METHOD_PREFIX}{name}"),
            call: Arc::new(call),
            required: None,
            finisher: None,
        };
        self.entries.insert(name.to_string(), Arc::new(entry));
        Export {
            table: self,
            name: name.to_string(),
        }
    }

    /// Looks up an exported method.
    pub fn resolve(&self, name: &str) -> Option<Arc<MethodEntry<H>>> {
        self.entries.get(name).cloned()
    }

    /// Exported names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names = self.entries.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    /// Number of exported methods.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is exported.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut MethodEntry<H>> {
        self.entries.get_mut(name).and_then(Arc::get_mut)
    }
}

impl<H> fmt::Debug for MethodTable<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.names())
            .finish()
    }
}

/// Attaches requirements to a freshly exported method.
pub struct Export<'a, H> {
    table: &'a mut MethodTable<H>,
    name: String,
}

impl<H> Export<'_, H> {
    /// Properties required to call this method.
    pub fn auth<I, S>(self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let properties = properties.into_iter().map(Into::into).collect();
        if let Some(entry) = self.table.entry_mut(&self.name) {
            entry.required = Some(properties);
        }
        self
    }

    /// Same as [`auth`](Self::auth) from a comma-separated list.
    pub fn auth_list(self, list: &str) -> Self {
        self.auth(hermes_authz::parse_properties(list))
    }

    /// Completes the response with `finisher` instead of the default encoding.
    pub fn finish_with<F>(self, finisher: F) -> Self
    where
        F: Fn(&H, &RequestContext, MethodResult, &mut ResponseWriter) -> Result<(), TransportError>
            + Send
            + Sync
            + 'static,
    {
        if let Some(entry) = self.table.entry_mut(&self.name) {
            entry.finisher = Some(Arc::new(finisher));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    mod storage_management_system {
        use super::*;

        pub struct StorageElementHandler;

        impl RequestHandler for StorageElementHandler {
            fn exports(table: &mut MethodTable<Self>) {
                table
                    .export("getFile", |_, ctx| Ok(json!(ctx.args().len()).into()))
                    .auth_list("FileAccess, Operator")
                    .finish_with(|_, _, _, writer| writer.finish(Some("done".into())));
                table.export("ping", |_, _| Ok(MethodResult::Empty));
            }
        }
    }

    use storage_management_system::StorageElementHandler;

    #[test]
    fn test_derived_names() {
        assert_eq!(StorageElementHandler::system_name(), "StorageManagement");
        assert_eq!(StorageElementHandler::handler_name(), "StorageElement");
        assert_eq!(
            StorageElementHandler::full_component_name(),
            "StorageManagement/StorageElement"
        );
        assert_eq!(
            StorageElementHandler::authorization_section(),
            "StorageManagement/StorageElement"
        );
        assert_eq!(StorageElementHandler::grants(), vec!["SSL", "JWT"]);
        assert_eq!(StorageElementHandler::default_authorization(), None);
    }

    #[test]
    fn test_table() {
        let mut table = MethodTable::new();
        StorageElementHandler::exports(&mut table);

        assert_eq!(table.len(), 2);
        assert_eq!(table.names(), vec!["getFile", "ping"]);
        assert!(table.resolve("export_ping").is_none());
        assert!(table.resolve("missing").is_none());

        let get_file = table.resolve("getFile").unwrap();
        assert_eq!(get_file.export_name(), "export_getFile");
        assert_eq!(
            get_file.required_properties(),
            Some(["FileAccess".to_string(), "Operator".to_string()].as_slice())
        );
        assert!(get_file.has_finisher());

        let ping = table.resolve("ping").unwrap();
        assert_eq!(ping.required_properties(), None);
        assert!(!ping.has_finisher());
    }

    #[test]
    fn test_call_runs_method() {
        let mut table = MethodTable::new();
        StorageElementHandler::exports(&mut table);

        let mut ctx = RequestContext::new("/StorageManagement/StorageElement");
        ctx.set_arguments(vec![json!("a"), json!("b")], Map::new());
        let call = table.resolve("getFile").unwrap().call();
        match (*call)(&StorageElementHandler, &mut ctx).unwrap() {
            MethodResult::Value(v) => assert_eq!(v, json!(2)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_reexport_replaces() {
        let mut table = MethodTable::<StorageElementHandler>::new();
        table.export("ping", |_, _| Ok(MethodResult::Empty)).auth(["all"]);
        table.export("ping", |_, _| Ok(MethodResult::Empty));
        assert_eq!(table.len(), 1);
        assert_eq!(table.resolve("ping").unwrap().required_properties(), None);
    }
}
