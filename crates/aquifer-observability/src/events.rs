//! In-memory event monitor (part of C8: "structured metrics, event
//! monitor, query profiler").
//!
//! Every long-lived task logs structured events with `component`
//! binding via `tracing`; `EventMonitor` additionally keeps a bounded
//! recent-history buffer so a caller can ask "what happened" without
//! scraping log output, mirroring the teacher's observer `event.rs`
//! module pattern of a typed event plus a queryable recent buffer.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// One structured event recorded by a component.
#[derive(Debug, Clone)]
pub struct Event {
    /// Owning component (`"quorum"`, `"federation"`, `"stream"`, ...).
    pub component: String,
    /// Short event name (`"node_unhealthy"`, `"scale_up"`, ...).
    pub name:      String,
    /// Free-form human-readable detail.
    pub message:   String,
    /// When the event was recorded.
    pub at:        DateTime<Utc>,
}

/// Bounded ring of recent events, kept per-process for diagnostics.
///
/// Not itself a spec-mandated port (spec §6 only requires metrics and
/// clock ports); this is the C8 "event monitor" the component table
/// names, sized to avoid unbounded growth.
pub struct EventMonitor {
    capacity: usize,
    events:   Mutex<VecDeque<Event>>,
}

impl EventMonitor {
    /// A monitor retaining at most `capacity` most-recent events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity, events: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// Record a structured event, evicting the oldest if at capacity.
    pub fn record(&self, component: impl Into<String>, name: impl Into<String>, message: impl Into<String>, at: DateTime<Utc>) {
        let event = Event { component: component.into(), name: name.into(), message: message.into(), at };
        tracing::info!(component = %event.component, event = %event.name, message = %event.message, "event recorded");
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot of every retained event, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().iter().cloned().collect()
    }

    /// Snapshot filtered to a single component.
    #[must_use]
    pub fn snapshot_for(&self, component: &str) -> Vec<Event> {
        self.events.lock().iter().filter(|e| e.component == component).cloned().collect()
    }
}

impl Default for EventMonitor {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_evicts_oldest_past_capacity() {
        let monitor = EventMonitor::new(2);
        let now = Utc::now();
        monitor.record("quorum", "write", "wrote k1", now);
        monitor.record("quorum", "write", "wrote k2", now);
        monitor.record("quorum", "write", "wrote k3", now);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].message, "wrote k2");
        assert_eq!(snapshot[1].message, "wrote k3");
    }

    #[test]
    fn snapshot_for_filters_by_component() {
        let monitor = EventMonitor::new(10);
        let now = Utc::now();
        monitor.record("quorum", "write", "a", now);
        monitor.record("scaler", "scale_up", "b", now);
        assert_eq!(monitor.snapshot_for("scaler").len(), 1);
    }
}
