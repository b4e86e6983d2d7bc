//! Stream buffer (spec §3 "Stream Buffer", §4.4 "Buffer semantics").
//!
//! A bounded FIFO ring of `(timestamp, record)` pairs with two
//! eviction rules enforced jointly on every mutation: `size ≤
//! max_size` and `age ≤ window_size`. Oldest entries are evicted
//! first under either rule, matching spec §8 invariant 3.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

/// One retained record, timestamped at insertion.
#[derive(Debug, Clone)]
pub struct BufferEntry {
    /// When this record was admitted (spec: "local monotonic clock",
    /// realized here as the injected `Clock`'s UTC instant).
    pub timestamp: DateTime<Utc>,
    /// The record itself.
    pub record:    Value,
}

/// Bounded deque enforcing `size ≤ max_size ∧ max_age ≤ window_size`
/// after every push, and on demand via [`StreamBuffer::evict_stale`]
/// for callers that need the invariant to hold even when nothing new
/// has arrived.
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    max_size: usize,
    window:   Duration,
    entries:  VecDeque<BufferEntry>,
}

impl StreamBuffer {
    /// A new, empty buffer with the given size and age limits.
    #[must_use]
    pub fn new(max_size: usize, window: Duration) -> Self {
        Self { max_size, window, entries: VecDeque::new() }
    }

    /// Admit `record` timestamped `at`, then evict down to the size
    /// and age limits.
    pub fn push(&mut self, record: Value, at: DateTime<Utc>) {
        self.entries.push_back(BufferEntry { timestamp: at, record });
        self.evict_stale(at);
    }

    /// Enforce the size and age limits relative to `now`, evicting
    /// the oldest entries first. Idempotent; safe to call even if
    /// nothing was pushed since the last call.
    pub fn evict_stale(&mut self, now: DateTime<Utc>) {
        while self.entries.len() > self.max_size {
            self.entries.pop_front();
        }
        while let Some(front) = self.entries.front() {
            if now - front.timestamp > self.window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of entries currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate retained entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &BufferEntry> {
        self.entries.iter()
    }

    /// The configured window (age) limit.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// The configured size limit.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Age of the oldest retained entry relative to `now`, if any.
    #[must_use]
    pub fn max_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.entries.front().map(|e| now - e.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn t(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn evicts_oldest_on_size_overflow() {
        let mut buf = StreamBuffer::new(2, Duration::seconds(100));
        buf.push(json!({"v": 1}), t(0));
        buf.push(json!({"v": 2}), t(1));
        buf.push(json!({"v": 3}), t(2));
        assert_eq!(buf.len(), 2);
        let values: Vec<_> = buf.iter().map(|e| e.record["v"].as_i64().unwrap()).collect();
        assert_eq!(values, vec![2, 3]);
    }

    #[test]
    fn evicts_entries_older_than_window() {
        let mut buf = StreamBuffer::new(100, Duration::milliseconds(50));
        buf.push(json!({"v": 1}), t(0));
        buf.push(json!({"v": 2}), t(10));
        buf.push(json!({"v": 3}), t(60));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.iter().next().unwrap().record["v"], 3);
    }

    #[test]
    fn evict_stale_applies_age_limit_without_a_new_push() {
        let mut buf = StreamBuffer::new(100, Duration::milliseconds(50));
        buf.push(json!({"v": 1}), t(0));
        assert_eq!(buf.len(), 1);
        buf.evict_stale(t(200));
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn invariant_holds_after_every_push() {
        let mut buf = StreamBuffer::new(3, Duration::milliseconds(100));
        for i in 0..20 {
            buf.push(json!({"v": i}), t(i * 10));
            let now = t(i * 10);
            assert!(buf.len() <= buf.max_size());
            assert!(buf.max_age(now).map_or(true, |age| age <= buf.window()));
        }
    }
}
