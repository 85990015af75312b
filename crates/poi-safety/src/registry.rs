//! Monitor registry: maps monitor ids to detector instances.
//!
//! The registry is populated before pipeline construction and read-mostly
//! afterwards. Registration fails on an empty id and on a duplicate id.

use std::collections::HashMap;

use tracing::debug;

use crate::{Monitor, SafetyError, SafetyResult};

/// Registry of detector instances, keyed by monitor id
#[derive(Default)]
pub struct MonitorRegistry {
    monitors: HashMap<String, Box<dyn Monitor>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detector under its own id
    pub fn register(&mut self, monitor: Box<dyn Monitor>) -> SafetyResult<()> {
        let id = monitor.id().to_string();
        if id.is_empty() {
            return Err(SafetyError::EmptyMonitorId);
        }
        if self.monitors.contains_key(&id) {
            return Err(SafetyError::DuplicateMonitor(id));
        }
        debug!(monitor_id = %id, version = %monitor.version(), "monitor registered");
        self.monitors.insert(id, monitor);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.monitors.contains_key(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Box<dyn Monitor>> {
        self.monitors.get_mut(id)
    }

    /// Registered ids, sorted for deterministic iteration
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.monitors.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{monitor_result, MonitorCategory, MonitorContext, MonitorResult, TrustLevel};

    struct StubMonitor {
        id: String,
    }

    impl Monitor for StubMonitor {
        fn id(&self) -> &str {
            &self.id
        }
        fn version(&self) -> &str {
            "0.0.1"
        }
        fn category(&self) -> MonitorCategory {
            MonitorCategory::Action
        }
        fn trust_level(&self) -> TrustLevel {
            TrustLevel::Authoritative
        }
        fn threshold(&self) -> f64 {
            0.5
        }
        fn analyze(&mut self, _context: &MonitorContext<'_>) -> MonitorResult {
            monitor_result(self, 0.0, serde_json::json!({}))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = MonitorRegistry::new();
        registry
            .register(Box::new(StubMonitor { id: "stub".into() }))
            .unwrap();
        assert!(registry.contains("stub"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids(), vec!["stub".to_string()]);
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut registry = MonitorRegistry::new();
        let err = registry
            .register(Box::new(StubMonitor { id: String::new() }))
            .unwrap_err();
        assert!(matches!(err, SafetyError::EmptyMonitorId));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = MonitorRegistry::new();
        registry
            .register(Box::new(StubMonitor { id: "stub".into() }))
            .unwrap();
        let err = registry
            .register(Box::new(StubMonitor { id: "stub".into() }))
            .unwrap_err();
        assert!(matches!(err, SafetyError::DuplicateMonitor(id) if id == "stub"));
    }
}
