//! The status registry (spec.md §4 leaf 5): a process-wide map of
//! endpoint-id → last-state string, plus a bounded ring buffer of log
//! lines, read by the optional self-telemetry emitter.
//!
//! Modeled as an owned object created once at startup and passed around by
//! `Arc` reference rather than as an ambient global, per spec.md §9, which
//! keeps it trivially fakeable in tests.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::SystemTime;

const DEFAULT_RING_CAPACITY: usize = 500;

#[derive(Debug, Clone, serde::Serialize)]
pub struct LogLine {
    pub timestamp: SystemTime,
    pub endpoint_id: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<String, String>,
    ring: VecDeque<LogLine>,
}

/// Guarded by a single mutex (spec.md §3 "Ownership"): every scheduler and
/// the telemetry emitter share one instance.
pub struct StatusRegistry {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        StatusRegistry {
            capacity,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Record an endpoint's latest state ("OK; N metrics in Dt" or an error
    /// string) and append a log line to the ring, evicting the oldest entry
    /// once `capacity` is exceeded.
    pub fn record(&self, endpoint_id: &str, state: impl Into<String>) {
        let state = state.into();
        let mut inner = self.inner.lock().expect("status registry mutex poisoned");
        inner.ring.push_back(LogLine {
            timestamp: SystemTime::now(),
            endpoint_id: endpoint_id.to_owned(),
            message: state.clone(),
        });
        if inner.ring.len() > self.capacity {
            inner.ring.pop_front();
        }
        inner.states.insert(endpoint_id.to_owned(), state);
    }

    /// Remove an endpoint's entry. Called on `StopCollecting` regardless of
    /// whether the endpoint was ever recorded (spec.md §4.4).
    pub fn clear(&self, endpoint_id: &str) {
        let mut inner = self.inner.lock().expect("status registry mutex poisoned");
        inner.states.remove(endpoint_id);
    }

    pub fn clear_all(&self) {
        let mut inner = self.inner.lock().expect("status registry mutex poisoned");
        inner.states.clear();
    }

    pub fn state_of(&self, endpoint_id: &str) -> Option<String> {
        let inner = self.inner.lock().expect("status registry mutex poisoned");
        inner.states.get(endpoint_id).cloned()
    }

    pub fn snapshot_states(&self) -> HashMap<String, String> {
        let inner = self.inner.lock().expect("status registry mutex poisoned");
        inner.states.clone()
    }

    pub fn snapshot_log(&self) -> Vec<LogLine> {
        let inner = self.inner.lock().expect("status registry mutex poisoned");
        inner.ring.iter().cloned().collect()
    }
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_record_and_clear() {
        let registry = StatusRegistry::new();
        registry.record("ep1", "OK; 3 metrics in 12ms");
        assert_eq!(registry.state_of("ep1").as_deref(), Some("OK; 3 metrics in 12ms"));
        registry.clear("ep1");
        assert_eq!(registry.state_of("ep1"), None);
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let registry = StatusRegistry::with_capacity(2);
        registry.record("ep1", "a");
        registry.record("ep1", "b");
        registry.record("ep1", "c");
        let log = registry.snapshot_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].message, "b");
        assert_eq!(log[1].message, "c");
    }

    #[test]
    fn test_clear_all() {
        let registry = StatusRegistry::new();
        registry.record("ep1", "OK");
        registry.record("ep2", "OK");
        registry.clear_all();
        assert!(registry.snapshot_states().is_empty());
    }
}
