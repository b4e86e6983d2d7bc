//! `MetricsSink.increment/observe(name, labels)` port (spec §6).
//!
//! Metrics are namespaced `query.*`, `federation.*`, `stream.*`,
//! `quorum.*`, `scaler.*` (spec §4.8). Publication is non-blocking and
//! a sink failure must never affect the caller; callers therefore
//! treat every `MetricsSink` method as infallible (mirroring the
//! teacher's `MetricsRegistry` no-op fallback in
//! `fraiseql-observers::metrics`), with any internal error swallowed
//! and logged by the sink implementation itself.

use std::collections::BTreeMap;

use async_trait::async_trait;

/// Label set attached to a metric observation.
pub type Labels = BTreeMap<String, String>;

/// Convenience constructor for a label set from `(key, value)` pairs.
#[must_use]
pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

/// Sink that every long-lived task and request-path operator
/// publishes metrics through. Implementations must not panic and
/// must not block the caller on a slow backend.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Increment a monotonic counter by `value` (usually 1).
    async fn increment(&self, name: &str, value: u64, labels: &Labels);

    /// Record one observation of a gauge/histogram metric.
    async fn observe(&self, name: &str, value: f64, labels: &Labels);
}

/// Sink that discards every metric. Useful as a default when no
/// observability backend is wired up, and in unit tests that don't
/// assert on metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

#[async_trait]
impl MetricsSink for NoopMetricsSink {
    async fn increment(&self, _name: &str, _value: u64, _labels: &Labels) {}

    async fn observe(&self, _name: &str, _value: f64, _labels: &Labels) {}
}

/// In-memory sink that records every call, for tests that assert on
/// emitted metrics without standing up a real backend.
#[derive(Debug, Default)]
pub struct RecordingMetricsSink {
    inner: parking_lot::Mutex<RecordingState>,
}

#[derive(Debug, Default)]
struct RecordingState {
    counters:     Vec<(String, u64, Labels)>,
    observations: Vec<(String, f64, Labels)>,
}

impl RecordingMetricsSink {
    /// A fresh recorder with no observations yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of every `increment` recorded under `name`, across all
    /// label sets.
    #[must_use]
    pub fn counter_total(&self, name: &str) -> u64 {
        self.inner.lock().counters.iter().filter(|(n, ..)| n == name).map(|(_, v, _)| v).sum()
    }

    /// Every observation recorded under `name`, in call order.
    #[must_use]
    pub fn observations(&self, name: &str) -> Vec<f64> {
        self.inner.lock().observations.iter().filter(|(n, ..)| n == name).map(|(_, v, _)| *v).collect()
    }
}

#[async_trait]
impl MetricsSink for RecordingMetricsSink {
    async fn increment(&self, name: &str, value: u64, labels: &Labels) {
        self.inner.lock().counters.push((name.to_string(), value, labels.clone()));
    }

    async fn observe(&self, name: &str, value: f64, labels: &Labels) {
        self.inner.lock().observations.push((name.to_string(), value, labels.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sink_accumulates_counters() {
        let sink = RecordingMetricsSink::new();
        sink.increment("quorum.write.ack", 1, &labels(&[("node", "n1")])).await;
        sink.increment("quorum.write.ack", 1, &labels(&[("node", "n2")])).await;
        assert_eq!(sink.counter_total("quorum.write.ack"), 2);
    }

    #[tokio::test]
    async fn recording_sink_keeps_observation_order() {
        let sink = RecordingMetricsSink::new();
        sink.observe("federation.merge.rows", 10.0, &Labels::new()).await;
        sink.observe("federation.merge.rows", 20.0, &Labels::new()).await;
        assert_eq!(sink.observations("federation.merge.rows"), vec![10.0, 20.0]);
    }

    #[tokio::test]
    async fn noop_sink_never_panics() {
        let sink = NoopMetricsSink;
        sink.increment("stream.window.slide", 1, &Labels::new()).await;
        sink.observe("stream.window.slide", 1.0, &Labels::new()).await;
    }
}
