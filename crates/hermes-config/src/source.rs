//! Path-based configuration lookup.
//!
//! Handlers read free-form options through [`ConfigSource`] using
//! `/`-separated paths, e.g. `DataManagement/FileCatalog/MaxListing`.

use serde_json::Value;

use crate::HermesConfig;

/// Read access to a configuration tree.
pub trait ConfigSource: Send + Sync {
    /// Looks up `path`; `None` if any segment is missing.
    fn lookup(&self, path: &str) -> Option<Value>;

    /// Looks up `path`, falling back to `default`.
    fn get_value(&self, path: &str, default: Value) -> Value {
        self.lookup(path).unwrap_or(default)
    }
}

impl ConfigSource for HermesConfig {
    fn lookup(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let first = segments.next()?;
        let root = self.components.get(first)?;
        walk(root, segments).cloned()
    }
}

/// An in-memory tree, handy for tests and embedded defaults.
#[derive(Debug, Clone, Default)]
pub struct ValueSource {
    root: Value,
}

impl ValueSource {
    /// Wraps a JSON tree.
    #[must_use]
    pub fn new(root: Value) -> Self {
        Self { root }
    }
}

impl ConfigSource for ValueSource {
    fn lookup(&self, path: &str) -> Option<Value> {
        walk(&self.root, path.split('/').filter(|s| !s.is_empty())).cloned()
    }
}

fn walk<'a, 'p>(mut node: &'a Value, segments: impl Iterator<Item = &'p str>) -> Option<&'a Value> {
    for segment in segments {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}
