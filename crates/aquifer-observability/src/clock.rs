//! `Clock.now() -> instant` port (spec §6).
//!
//! Every component that needs wall-clock time (stream buffer
//! eviction, node health timestamps, profiler stage timing, quorum
//! TTLs) goes through this trait instead of calling
//! `chrono::Utc::now()` directly, so tests can supply a deterministic
//! clock.

use chrono::{DateTime, Utc};

/// Source of UTC wall-clock time, injected into every component that
/// needs to timestamp an event.
pub trait Clock: Send + Sync {
    /// Current UTC instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Production `Clock` backed by the OS wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clocks for use in this workspace's tests. Not
/// `cfg(test)`-gated so downstream crates (`aquifer-stream`,
/// `aquifer-quorum`, `aquifer-federation`) can depend on
/// `aquifer-observability` as a regular dependency and still build a
/// `FakeClock` in their own `#[cfg(test)]` modules.
pub mod testing {
    use std::sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    };

    use chrono::TimeZone;

    use super::{Clock, DateTime, Utc};

    /// Clock that only advances when told to, for deterministic
    /// window/TTL/timeout tests.
    #[derive(Debug, Clone)]
    pub struct FakeClock {
        millis: Arc<AtomicI64>,
    }

    impl FakeClock {
        /// A fake clock starting at `start_millis` since the Unix epoch.
        pub fn new(start_millis: i64) -> Self {
            Self { millis: Arc::new(AtomicI64::new(start_millis)) }
        }

        /// Advance the clock by `millis` (may be negative).
        pub fn advance(&self, millis: i64) {
            self.millis.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst)).unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::FakeClock, *};

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let t1 = clock.now();
        let t2 = clock.now();
        assert!(t2 >= t1);
    }

    #[test]
    fn fake_clock_is_deterministic_until_advanced() {
        let clock = FakeClock::new(1_000);
        let t1 = clock.now();
        let t2 = clock.now();
        assert_eq!(t1, t2);
        clock.advance(500);
        assert!(clock.now() > t1);
    }
}
