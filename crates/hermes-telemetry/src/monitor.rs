//! Component monitoring.
//!
//! Each handler class registers itself once with a [`MonitoringSink`] during
//! initialization and then records a mark per served request.
//! [`MetricsMonitor`] forwards marks to the `metrics` facade and keeps the
//! descriptive state (location, extra parameters, mark counts) in memory so it
//! can be inspected.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

/// How an activity aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// Events per unit of time.
    Rate,
    /// Running total.
    Sum,
    /// Average of recorded values.
    Mean,
}

/// A registered activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Activity {
    /// Activity name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Grouping category.
    pub category: String,
    /// Unit label.
    pub unit: String,
    /// Aggregation.
    pub kind: ActivityKind,
}

/// Monitoring collaborator used by the lifecycle.
pub trait MonitoringSink: Send + Sync {
    /// Sets the component type (e.g. `service`).
    fn set_component_type(&self, component_type: &str);

    /// Sets the component name.
    fn set_component_name(&self, name: &str);

    /// Sets where the component is reachable.
    fn set_location(&self, location: &str);

    /// Declares an activity.
    fn register_activity(&self, activity: Activity);

    /// Records one occurrence of an activity.
    fn record_mark(&self, name: &str);

    /// Records a value for a `Mean` activity.
    fn record_value(&self, name: &str, value: f64);

    /// Publishes a descriptive parameter.
    fn set_extra_param(&self, key: &str, value: Value);
}

#[derive(Debug, Default)]
struct MonitorState {
    component_type: String,
    component_name: String,
    location: String,
    activities: Vec<Activity>,
    marks: HashMap<String, u64>,
    extra: HashMap<String, Value>,
}

/// `metrics`-backed monitoring sink.
///
/// ```
/// use hermes_telemetry::{Activity, ActivityKind, MetricsMonitor, MonitoringSink};
///
/// let monitor = MetricsMonitor::new();
/// monitor.set_component_name("Hermes/DataManagement/FileCatalog");
/// monitor.register_activity(Activity {
///     name: "Queries".into(),
///     description: "Queries served".into(),
///     category: "Framework".into(),
///     unit: "queries".into(),
///     kind: ActivityKind::Rate,
/// });
/// monitor.record_mark("Queries");
/// monitor.record_mark("Queries");
///
/// assert_eq!(monitor.marks("Queries"), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsMonitor {
    state: Arc<RwLock<MonitorState>>,
}

impl MetricsMonitor {
    /// Creates an empty monitor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Component type set so far.
    #[must_use]
    pub fn component_type(&self) -> String {
        self.state.read().component_type.clone()
    }

    /// Component name set so far.
    #[must_use]
    pub fn component_name(&self) -> String {
        self.state.read().component_name.clone()
    }

    /// Last location set.
    #[must_use]
    pub fn location(&self) -> String {
        self.state.read().location.clone()
    }

    /// Registered activities, in registration order.
    #[must_use]
    pub fn activities(&self) -> Vec<Activity> {
        self.state.read().activities.clone()
    }

    /// Marks recorded for an activity.
    #[must_use]
    pub fn marks(&self, name: &str) -> u64 {
        self.state.read().marks.get(name).copied().unwrap_or(0)
    }

    /// A published extra parameter.
    #[must_use]
    pub fn extra_param(&self, key: &str) -> Option<Value> {
        self.state.read().extra.get(key).cloned()
    }

    fn metric_name(activity: &str) -> String {
        format!("hermes_activity_{}", activity.to_lowercase())
    }
}

impl MonitoringSink for MetricsMonitor {
    fn set_component_type(&self, component_type: &str) {
        self.state.write().component_type = component_type.to_string();
    }

    fn set_component_name(&self, name: &str) {
        self.state.write().component_name = name.to_string();
    }

    fn set_location(&self, location: &str) {
        self.state.write().location = location.to_string();
    }

    fn register_activity(&self, activity: Activity) {
        let metric = Self::metric_name(&activity.name);
        match activity.kind {
            ActivityKind::Rate | ActivityKind::Sum => {
                describe_counter!(metric, activity.description.clone());
            }
            ActivityKind::Mean => {
                describe_histogram!(metric, activity.description.clone());
            }
        }
        self.state.write().activities.push(activity);
    }

    fn record_mark(&self, name: &str) {
        let component = {
            let mut state = self.state.write();
            *state.marks.entry(name.to_string()).or_insert(0) += 1;
            state.component_name.clone()
        };
        counter!(Self::metric_name(name), "component" => component).increment(1);
    }

    fn record_value(&self, name: &str, value: f64) {
        let component = self.state.read().component_name.clone();
        histogram!(Self::metric_name(name), "component" => component).record(value);
    }

    fn set_extra_param(&self, key: &str, value: Value) {
        self.state.write().extra.insert(key.to_string(), value);
    }
}
