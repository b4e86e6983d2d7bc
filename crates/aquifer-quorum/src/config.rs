//! Quorum store configuration (spec §4.6, §9 Open Question 2).

use std::time::Duration;

/// Operator-supplied quorum sizes and timing. Construction never
/// fails on `W + R <= N`; [`QuorumConfig::is_strict_quorum`] lets
/// callers assert the stronger property themselves (see
/// `SPEC_FULL.md` §4.6 decision).
#[derive(Debug, Clone)]
pub struct QuorumConfig {
    /// Read quorum size.
    pub r:                usize,
    /// Write quorum size.
    pub w:                usize,
    /// How often the health checker pings every node (default 60s).
    pub health_interval:  Duration,
    /// How often the repair/rebalance cycle runs (default 1h).
    pub repair_interval:  Duration,
    /// Per-node ping timeout (default 5s).
    pub ping_timeout:     Duration,
    /// Per-node read/write RPC timeout (default 2s).
    pub rpc_timeout:      Duration,
    /// Federated sub-query timeout is a separate spec §4.5 concern;
    /// not part of this config.
    pub overload_factor:  f64,
    pub underload_factor: f64,
}

impl QuorumConfig {
    /// A config with the given R/W sizes and every other field at its
    /// spec-documented default.
    #[must_use]
    pub fn new(r: usize, w: usize) -> Self {
        Self { r, w, ..Self::default() }
    }

    /// Whether `w + r > n` holds for a cluster of `n` nodes — the
    /// strongly-recommended-but-unenforced invariant from spec §4.6.
    #[must_use]
    pub fn is_strict_quorum(&self, n: usize) -> bool {
        self.w + self.r > n
    }
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            r:                1,
            w:                1,
            health_interval:  Duration::from_secs(60),
            repair_interval:  Duration::from_secs(3600),
            ping_timeout:     Duration::from_secs(5),
            rpc_timeout:      Duration::from_secs(2),
            overload_factor:  1.10,
            underload_factor: 0.90,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_quorum_check() {
        let config = QuorumConfig::new(2, 2);
        assert!(config.is_strict_quorum(3));
        assert!(!config.is_strict_quorum(4));
    }
}
