//! Per-query metrics (spec §3 "Query Metrics", §4.5 "Monitoring").
//!
//! `update` is additive for the counter fields (`io_*`, `cache_*`,
//! `errors`) and last-write-wins for the gauge fields (`cpu_usage`,
//! `memory_usage`), matching the coordinator's `update_query_metrics`
//! contract. `finish` is idempotent — a second call leaves `end_time`
//! untouched.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-source counters folded into one query's metrics via
/// `QueryMetrics::update_source` (`update_source_metrics` in spec §4.5).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub avg_response_time_ms: f64,
    pub error_rate:           f64,
    pub throughput_qps:       f64,
}

/// Counters accumulated while merging partial results from every
/// dispatched source.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MergeMetrics {
    pub rows_merged:   u64,
    pub merge_time_ms: f64,
}

/// One update batch: counters are deltas, gauges are absolute
/// readings. `None` leaves the corresponding gauge unchanged.
#[derive(Debug, Clone, Default)]
pub struct MetricsDelta {
    pub io_reads:                 u64,
    pub io_writes:                u64,
    pub network_bytes_sent:       u64,
    pub network_bytes_received:   u64,
    pub cache_hits:               u64,
    pub cache_misses:             u64,
    pub errors:                   Vec<String>,
    pub cpu_usage_percent:        Option<f64>,
    pub memory_usage_mb:          Option<f64>,
}

/// A query's full metrics lifecycle: created on `start_query`,
/// mutated in place by operators as the query runs, finalized on
/// `end_query`, then moved into a rolling 24 h history and discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub query_id:                String,
    pub start_time:               DateTime<Utc>,
    pub end_time:                 Option<DateTime<Utc>>,
    pub execution_time_ms:        Option<f64>,
    pub cpu_usage_percent:        f64,
    pub memory_usage_mb:          f64,
    pub io_reads:                 u64,
    pub io_writes:                u64,
    pub network_bytes_sent:       u64,
    pub network_bytes_received:   u64,
    pub cache_hits:               u64,
    pub cache_misses:             u64,
    pub error_count:              u64,
    pub source_metrics:           HashMap<String, SourceMetrics>,
    pub merge_metrics:            Option<MergeMetrics>,
    pub errors:                   Vec<String>,
}

impl QueryMetrics {
    /// A freshly created metrics record, as `start_query` produces it.
    #[must_use]
    pub fn start(query_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            query_id: query_id.into(),
            start_time: now,
            end_time: None,
            execution_time_ms: None,
            cpu_usage_percent: 0.0,
            memory_usage_mb: 0.0,
            io_reads: 0,
            io_writes: 0,
            network_bytes_sent: 0,
            network_bytes_received: 0,
            cache_hits: 0,
            cache_misses: 0,
            error_count: 0,
            source_metrics: HashMap::new(),
            merge_metrics: None,
            errors: Vec::new(),
        }
    }

    /// Folds one delta into the running totals.
    pub fn update(&mut self, delta: &MetricsDelta) {
        self.io_reads += delta.io_reads;
        self.io_writes += delta.io_writes;
        self.network_bytes_sent += delta.network_bytes_sent;
        self.network_bytes_received += delta.network_bytes_received;
        self.cache_hits += delta.cache_hits;
        self.cache_misses += delta.cache_misses;
        self.error_count += delta.errors.len() as u64;
        self.errors.extend(delta.errors.iter().cloned());
        if let Some(cpu) = delta.cpu_usage_percent {
            self.cpu_usage_percent = cpu;
        }
        if let Some(memory) = delta.memory_usage_mb {
            self.memory_usage_mb = memory;
        }
    }

    /// Records (overwrites) one source's current metrics snapshot.
    pub fn update_source(&mut self, source_id: impl Into<String>, metrics: SourceMetrics) {
        self.source_metrics.insert(source_id.into(), metrics);
    }

    /// Sets `merge_metrics` once the centralized merge stage completes.
    pub fn record_merge(&mut self, metrics: MergeMetrics) {
        self.merge_metrics = Some(metrics);
    }

    /// Finalizes `end_time`/`execution_time_ms`. A second call is a
    /// no-op.
    pub fn finish(&mut self, now: DateTime<Utc>) {
        if self.end_time.is_some() {
            return;
        }
        self.end_time = Some(now);
        #[allow(clippy::cast_precision_loss)]
        let millis = (now - self.start_time).num_milliseconds() as f64;
        self.execution_time_ms = Some(millis);
    }
}
