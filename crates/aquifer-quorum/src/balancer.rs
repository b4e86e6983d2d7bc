//! Load balancer (spec §4.7 "Load balancer").
//!
//! Keeps per-node [`NodeStats`] plus a bounded rolling history of
//! `(timestamp, op, duration)` samples, and ranks healthy candidate
//! nodes by [`NodeStats::score`], tie-broken by lower `total_keys`
//! (spec §4.7).

use std::{collections::VecDeque, time::Duration as StdDuration};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::node::NodeStats;

/// One sampled operation, used to derive `latency` before
/// aggregation (see `SPEC_FULL.md` §3 supplement).
#[derive(Debug, Clone)]
pub struct OperationSample {
    pub at:       DateTime<Utc>,
    pub op:       String,
    pub duration: StdDuration,
}

/// Per-node stats, health flags, and rolling operation history for
/// the whole cluster view.
pub struct LoadBalancer {
    stats:          DashMap<String, NodeStats>,
    healthy:        DashMap<String, bool>,
    history:        DashMap<String, VecDeque<OperationSample>>,
    history_window: Duration,
}

impl LoadBalancer {
    /// A balancer retaining operation history for `history_window`
    /// (spec default: 1 hour).
    #[must_use]
    pub fn new(history_window: Duration) -> Self {
        Self { stats: DashMap::new(), healthy: DashMap::new(), history: DashMap::new(), history_window }
    }

    /// Replace `node_id`'s stats wholesale (last-write-wins, matching
    /// the federation coordinator's gauge semantics in spec §4.5).
    pub fn update_stats(&self, node_id: impl Into<String>, stats: NodeStats) {
        self.stats.insert(node_id.into(), stats);
    }

    /// Mark `node_id` healthy or unhealthy, as decided by the health
    /// checker's ping result (spec §4.6).
    pub fn set_healthy(&self, node_id: impl Into<String>, healthy: bool) {
        self.healthy.insert(node_id.into(), healthy);
    }

    /// Whether `node_id` is currently considered healthy. Unknown
    /// nodes are optimistically healthy until the first health check
    /// runs.
    #[must_use]
    pub fn is_healthy(&self, node_id: &str) -> bool {
        self.healthy.get(node_id).map_or(true, |h| *h)
    }

    /// Record one operation sample, pruning anything older than
    /// `history_window`.
    pub fn record_operation(&self, node_id: impl Into<String>, op: impl Into<String>, duration: StdDuration, now: DateTime<Utc>) {
        let mut samples = self.history.entry(node_id.into()).or_default();
        samples.push_back(OperationSample { at: now, op: op.into(), duration });
        while samples.front().is_some_and(|s| now - s.at > self.history_window) {
            samples.pop_front();
        }
    }

    /// Increment `node_id`'s error counter (spec §4.6 "On node error:
    /// increment its error_count and log").
    pub fn record_error(&self, node_id: &str, now: DateTime<Utc>) {
        let mut entry = self.stats.entry(node_id.to_string()).or_insert_with(|| NodeStats::new(now));
        entry.error_count += 1;
        entry.last_update = now;
        tracing::warn!(component = "quorum", node_id, error_count = entry.error_count, "node error recorded");
    }

    /// `node_id`'s current score, if its stats are known.
    #[must_use]
    pub fn score(&self, node_id: &str) -> Option<f64> {
        self.stats.get(node_id).map(|s| s.score())
    }

    /// Every node currently marked healthy.
    #[must_use]
    pub fn healthy_nodes(&self) -> Vec<String> {
        self.healthy.iter().filter(|e| *e.value()).map(|e| e.key().clone()).collect()
    }

    /// `candidates` ranked by descending score, ties broken by lower
    /// `total_keys`. Candidates with no recorded stats sort last.
    #[must_use]
    pub fn rank(&self, candidates: &[String]) -> Vec<String> {
        let mut ranked: Vec<(String, f64, u64)> = candidates
            .iter()
            .map(|id| {
                self.stats.get(id).map_or((id.clone(), f64::MIN, u64::MAX), |s| (id.clone(), s.score(), s.total_keys))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.2.cmp(&b.2)));
        ranked.into_iter().map(|(id, ..)| id).collect()
    }

    /// Drop all tracked state for a node that has left the cluster.
    pub fn remove_node(&self, node_id: &str) {
        self.stats.remove(node_id);
        self.healthy.remove(node_id);
        self.history.remove(node_id);
    }

    /// Snapshot of a node's stats, if known.
    #[must_use]
    pub fn stats_of(&self, node_id: &str) -> Option<NodeStats> {
        self.stats.get(node_id).map(|s| s.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_orders_by_score_descending() {
        let balancer = LoadBalancer::new(Duration::hours(1));
        let now = Utc::now();
        balancer.update_stats("a", NodeStats { latency: 100.0, ..NodeStats::new(now) });
        balancer.update_stats("b", NodeStats { latency: 1.0, ..NodeStats::new(now) });
        let ranked = balancer.rank(&["a".to_string(), "b".to_string()]);
        assert_eq!(ranked, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn rank_ties_break_on_lower_total_keys() {
        let balancer = LoadBalancer::new(Duration::hours(1));
        let now = Utc::now();
        balancer.update_stats("a", NodeStats { total_keys: 50, ..NodeStats::new(now) });
        balancer.update_stats("b", NodeStats { total_keys: 10, ..NodeStats::new(now) });
        let ranked = balancer.rank(&["a".to_string(), "b".to_string()]);
        assert_eq!(ranked, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn unknown_nodes_are_optimistically_healthy() {
        let balancer = LoadBalancer::new(Duration::hours(1));
        assert!(balancer.is_healthy("never-seen"));
        balancer.set_healthy("never-seen", false);
        assert!(!balancer.is_healthy("never-seen"));
    }

    #[test]
    fn operation_history_is_pruned_by_window() {
        let balancer = LoadBalancer::new(Duration::milliseconds(50));
        let base = Utc::now();
        balancer.record_operation("a", "write", StdDuration::from_millis(1), base);
        balancer.record_operation("a", "write", StdDuration::from_millis(1), base + Duration::milliseconds(100));
        let samples = balancer.history.get("a").unwrap();
        assert_eq!(samples.len(), 1);
    }
}
