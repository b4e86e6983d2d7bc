//! `KVNode` port and `NodeStats` (spec §3 "Node Stats", §6 "Ports").
//!
//! Each replica is an injected `KVNode`; the core never talks to a
//! concrete backing database. `dump`/`restore` from the original
//! source are replaced by an opaque `snapshot`/`install` pair per
//! spec §9 Open Question 5 (see `SPEC_FULL.md` §4.6/4.7).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use aquifer_error::Result;

/// A single replica the quorum store can target. Implementations are
/// the excluded "concrete backing database driver" collaborator (spec
/// §1); this crate only calls through the trait.
#[async_trait]
pub trait KVNode: Send + Sync {
    /// Stable identifier for this node within the cluster view.
    fn id(&self) -> &str;

    /// Store `value` under `key`, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<bool>;

    /// Fetch the current value for `key`, if present.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Remove `key`.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Current resource/latency stats for this node.
    async fn info(&self) -> Result<NodeStats>;

    /// Opaque snapshot of `key`'s value and TTL, for rebalance/repair
    /// streaming (spec §9 Open Question 5).
    async fn snapshot(&self, key: &str) -> Result<Bytes>;

    /// Install a snapshot produced by [`KVNode::snapshot`] under `key`.
    async fn install(&self, key: &str, snapshot: Bytes, ttl: Option<Duration>) -> Result<bool>;

    /// Liveness check.
    async fn ping(&self) -> Result<bool>;
}

/// Derived health classification (spec §3 "Health is derived").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Per-replica statistics (spec §3 "Node Stats").
#[derive(Debug, Clone, Copy)]
pub struct NodeStats {
    pub total_keys:  u64,
    pub memory_used: f64,
    pub cpu_usage:   f64,
    pub network_in:  u64,
    pub network_out: u64,
    pub latency:     f64,
    pub error_count: u64,
    pub last_update: DateTime<Utc>,
}

impl NodeStats {
    /// A fresh, zeroed stats record timestamped `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { total_keys: 0, memory_used: 0.0, cpu_usage: 0.0, network_in: 0, network_out: 0, latency: 0.0, error_count: 0, last_update: now }
    }

    /// Load-balancer score (spec §3): higher is better.
    ///
    /// `0.4·(1/(1+latency)) + 0.4·(1/(1+error_count)) + 0.2·(1 − cpu_usage/100)`
    #[must_use]
    pub fn score(&self) -> f64 {
        0.4 * (1.0 / (1.0 + self.latency)) + 0.4 * (1.0 / (1.0 + self.error_count as f64)) + 0.2 * (1.0 - self.cpu_usage / 100.0)
    }

    /// Derived health per spec §3: `error_rate` here is
    /// `error_count` normalized against a caller-supplied request
    /// count; source descriptors (§4.5) already carry a rate, but
    /// node stats track raw counts, so the federation-style
    /// thresholds apply to the rate computed by the caller.
    #[must_use]
    pub fn health(&self, error_rate: f64, avg_response_time_ms: f64) -> NodeHealth {
        if error_rate > 0.10 {
            NodeHealth::Unhealthy
        } else if error_rate > 0.01 || avg_response_time_ms > 1000.0 {
            NodeHealth::Degraded
        } else {
            NodeHealth::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_rewards_low_latency_low_errors_low_cpu() {
        let now = Utc::now();
        let good = NodeStats { latency: 1.0, error_count: 0, cpu_usage: 10.0, ..NodeStats::new(now) };
        let bad = NodeStats { latency: 100.0, error_count: 20, cpu_usage: 95.0, ..NodeStats::new(now) };
        assert!(good.score() > bad.score());
    }

    #[test]
    fn health_thresholds_match_spec() {
        let now = Utc::now();
        let stats = NodeStats::new(now);
        assert_eq!(stats.health(0.0, 10.0), NodeHealth::Healthy);
        assert_eq!(stats.health(0.02, 10.0), NodeHealth::Degraded);
        assert_eq!(stats.health(0.0, 1500.0), NodeHealth::Degraded);
        assert_eq!(stats.health(0.11, 10.0), NodeHealth::Unhealthy);
    }
}
