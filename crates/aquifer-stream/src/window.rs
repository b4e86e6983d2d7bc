//! Windowed aggregation operator (spec §4.4 "Windowed aggregation").
//!
//! A sliding window over one stream. On each slide it emits one
//! record containing every declared aggregate computed over the
//! current window contents. `avg`/`min`/`max` on an empty window emit
//! `null`; `count` emits `0`. Late arrivals (event timestamp before
//! the current window start) are dropped silently and counted.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use crate::buffer::StreamBuffer;

/// One of the aggregate functions spec §3 names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

/// One declared aggregate: `function(column) AS alias`.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub function: AggregateFn,
    pub column:   String,
    pub alias:    String,
}

impl AggregateSpec {
    #[must_use]
    pub fn new(function: AggregateFn, column: impl Into<String>, alias: impl Into<String>) -> Self {
        Self { function, column: column.into(), alias: alias.into() }
    }
}

/// Configuration for one windowed aggregation operator instance.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub window_size:   Duration,
    pub slide_interval: Duration,
    pub aggregates:    Vec<AggregateSpec>,
}

/// Sliding-window aggregator over a single stream's buffer.
///
/// The operator itself holds no buffer — it is handed the
/// `StreamBuffer` registered in the owning
/// [`crate::context::StreamContext`] for its input stream, so the
/// buffer's own size/age eviction (spec §4.4 "Buffer semantics")
/// already keeps it within the window by the time `slide` runs.
pub struct WindowedAggregator {
    config:        WindowConfig,
    late_arrivals: AtomicU64,
}

impl WindowedAggregator {
    #[must_use]
    pub fn new(config: WindowConfig) -> Self {
        Self { config, late_arrivals: AtomicU64::new(0) }
    }

    /// Admit `record` timestamped `ts` into `buffer`, given the
    /// current window start `window_start = now - window_size`.
    /// Returns `false` (and increments the late-arrival counter)
    /// if `ts` precedes `window_start`.
    pub fn ingest(&self, buffer: &mut StreamBuffer, record: Value, ts: DateTime<Utc>, window_start: DateTime<Utc>) -> bool {
        if ts < window_start {
            self.late_arrivals.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        buffer.push(record, ts);
        true
    }

    /// Number of records dropped for arriving before the current
    /// window start.
    #[must_use]
    pub fn late_arrival_count(&self) -> u64 {
        self.late_arrivals.load(Ordering::Relaxed)
    }

    /// Compute one aggregate record over `buffer`'s current contents.
    /// Called on each slide tick by the scheduler.
    #[must_use]
    pub fn slide(&self, buffer: &StreamBuffer) -> Value {
        let mut out = Map::new();
        for spec in &self.config.aggregates {
            let values: Vec<f64> = buffer.iter().filter_map(|e| e.record.get(&spec.column)).filter_map(Value::as_f64).collect();
            let result = match spec.function {
                AggregateFn::Count => Value::from(buffer.len() as u64),
                AggregateFn::Sum => Value::from(values.iter().sum::<f64>()),
                AggregateFn::Avg => {
                    if values.is_empty() {
                        Value::Null
                    } else {
                        Value::from(values.iter().sum::<f64>() / values.len() as f64)
                    }
                },
                AggregateFn::Min => values.iter().copied().fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v)))).map_or(Value::Null, Value::from),
                AggregateFn::Max => values.iter().copied().fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v)))).map_or(Value::Null, Value::from),
            };
            out.insert(spec.alias.clone(), result);
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn t(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn sum_config() -> WindowConfig {
        WindowConfig { window_size: Duration::seconds(5), slide_interval: Duration::seconds(1), aggregates: vec![AggregateSpec::new(AggregateFn::Sum, "v", "total")] }
    }

    #[test]
    fn sum_of_three_records_within_window() {
        let aggregator = WindowedAggregator::new(sum_config());
        let mut buffer = StreamBuffer::new(1_000, Duration::seconds(5));
        for (i, v) in [1, 2, 3].into_iter().enumerate() {
            aggregator.ingest(&mut buffer, json!({"v": v}), t(i as i64 * 100), t(0));
        }
        let emitted = aggregator.slide(&buffer);
        assert_eq!(emitted["total"], 6.0);
    }

    #[test]
    fn avg_min_max_on_empty_window_are_null_count_is_zero() {
        let config = WindowConfig {
            window_size: Duration::seconds(5),
            slide_interval: Duration::seconds(1),
            aggregates: vec![
                AggregateSpec::new(AggregateFn::Avg, "v", "avg_v"),
                AggregateSpec::new(AggregateFn::Min, "v", "min_v"),
                AggregateSpec::new(AggregateFn::Max, "v", "max_v"),
                AggregateSpec::new(AggregateFn::Count, "v", "count_v"),
            ],
        };
        let aggregator = WindowedAggregator::new(config);
        let buffer = StreamBuffer::new(10, Duration::seconds(5));
        let emitted = aggregator.slide(&buffer);
        assert_eq!(emitted["avg_v"], Value::Null);
        assert_eq!(emitted["min_v"], Value::Null);
        assert_eq!(emitted["max_v"], Value::Null);
        assert_eq!(emitted["count_v"], 0);
    }

    #[test]
    fn late_arrivals_are_dropped_and_counted() {
        let aggregator = WindowedAggregator::new(sum_config());
        let mut buffer = StreamBuffer::new(1_000, Duration::seconds(5));
        let window_start = t(10_000);
        let accepted = aggregator.ingest(&mut buffer, json!({"v": 1}), t(1_000), window_start);
        assert!(!accepted);
        assert_eq!(aggregator.late_arrival_count(), 1);
        assert_eq!(buffer.len(), 0);
    }
}
