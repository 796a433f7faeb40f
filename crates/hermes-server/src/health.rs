//! Liveness and readiness.
//!
//! - `/health` answers as long as the process serves HTTP.
//! - `/ready` fails while shutting down and reports every mounted component:
//!   `"ready"`, `"pending"` (not used yet) or `"failed"` (initialization
//!   failed; the component refuses requests until restart).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Body of `/health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    /// Always `healthy` when served.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
    /// Seconds since start.
    pub uptime_seconds: u64,
}

/// Liveness probe.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    service: String,
    version: String,
    started: Instant,
}

impl HealthCheck {
    /// Creates a probe for `service` at `version`.
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
            started: Instant::now(),
        }
    }

    /// Current status.
    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy".to_string(),
            service: self.service.clone(),
            version: self.version.clone(),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }
}

/// Initialization state of one component, as reported by `/ready`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentReadiness {
    /// Initialized.
    Ready,
    /// Not used yet; initializes on first request.
    Pending,
    /// Initialization failed.
    Failed,
}

impl From<Option<bool>> for ComponentReadiness {
    fn from(initialized: Option<bool>) -> Self {
        match initialized {
            Some(true) => Self::Ready,
            Some(false) => Self::Failed,
            None => Self::Pending,
        }
    }
}

/// Body of `/ready`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadinessStatus {
    /// Whether traffic should be routed here.
    pub ready: bool,
    /// Per-component state.
    pub components: BTreeMap<String, ComponentReadiness>,
}

/// Readiness probe.
///
/// Pending components do not make the server unready: they initialize on
/// demand. A failed component does.
#[derive(Debug, Clone)]
pub struct ReadinessCheck {
    accepting: Arc<AtomicBool>,
}

impl Default for ReadinessCheck {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessCheck {
    /// Creates a probe that accepts traffic.
    pub fn new() -> Self {
        Self {
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Stops (or resumes) accepting traffic.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Whether the server accepts traffic.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Status over the given component states.
    pub fn status<I>(&self, components: I) -> ReadinessStatus
    where
        I: IntoIterator<Item = (String, ComponentReadiness)>,
    {
        let components: BTreeMap<_, _> = components.into_iter().collect();
        let ready = self.is_accepting()
            && components.values().all(|c| *c != ComponentReadiness::Failed);
        ReadinessStatus { ready, components }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status() {
        let status = HealthCheck::new("hermes", "0.1.0").status();
        assert_eq!(status.status, "healthy");
        assert_eq!(status.service, "hermes");
        assert_eq!(status.version, "0.1.0");
    }

    #[test]
    fn test_component_readiness_mapping() {
        assert_eq!(ComponentReadiness::from(Some(true)), ComponentReadiness::Ready);
        assert_eq!(ComponentReadiness::from(Some(false)), ComponentReadiness::Failed);
        assert_eq!(ComponentReadiness::from(None), ComponentReadiness::Pending);
    }

    #[test]
    fn test_pending_is_ready_failed_is_not() {
        let check = ReadinessCheck::new();
        let status = check.status([
            ("Framework/Ping".to_string(), ComponentReadiness::Ready),
            ("Framework/Echo".to_string(), ComponentReadiness::Pending),
        ]);
        assert!(status.ready);

        let status = check.status([("Framework/Broken".to_string(), ComponentReadiness::Failed)]);
        assert!(!status.ready);
    }

    #[test]
    fn test_not_accepting() {
        let check = ReadinessCheck::new();
        let clone = check.clone();
        clone.set_accepting(false);
        assert!(!check.status(Vec::new()).ready);
    }

    #[test]
    fn test_status_serialization() {
        let status = ReadinessCheck::new()
            .status([("Framework/Ping".to_string(), ComponentReadiness::Pending)]);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["components"]["Framework/Ping"], "pending");
        assert_eq!(json["ready"], true);
    }
}
