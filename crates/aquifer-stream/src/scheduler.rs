//! Cooperative scheduler (spec §4.4 "Scheduler", §5).
//!
//! A single-threaded cooperative loop per engine instance drives
//! every registered operator's `process_stream` task. Tasks yield at
//! least every 100 ms and accept cooperative, idempotent cancellation
//! via a [`CancellationToken`]; on cancel an operator flushes nothing
//! and exits (spec §5 "Cancellation"). Multiple `Scheduler`s may run
//! in parallel on disjoint streams — there is no shared state between
//! instances.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// The minimum yield cadence spec §4.4 requires of every operator.
pub const MIN_YIELD_INTERVAL: Duration = Duration::from_millis(100);

/// An operator the scheduler can drive. Implementations loop until
/// `cancel` fires, yielding at least every [`MIN_YIELD_INTERVAL`].
#[async_trait]
pub trait StreamOperatorTask: Send + Sync {
    /// Run until `cancel` is triggered, then return without flushing
    /// any partial state.
    async fn process_stream(&self, cancel: CancellationToken);
}

/// Owns the cancellation token and join handles for one engine
/// instance's operator tasks.
#[derive(Default)]
pub struct Scheduler {
    cancel: CancellationToken,
    tasks:  Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// A scheduler with no tasks yet spawned.
    #[must_use]
    pub fn new() -> Self {
        Self { cancel: CancellationToken::new(), tasks: Vec::new() }
    }

    /// Spawn `task` under this scheduler's cancellation token. The
    /// task's own child token is cancelled both when the whole
    /// scheduler is cancelled and if cancelled individually via the
    /// returned token.
    pub fn spawn(&mut self, task: Arc<dyn StreamOperatorTask>) -> CancellationToken {
        let token = self.cancel.child_token();
        let task_token = token.clone();
        let span = tracing::info_span!("stream_operator", component = "stream");
        let handle = tokio::spawn(
            async move {
                task.process_stream(task_token).await;
                tracing::debug!(component = "stream", "operator task exited");
            }
            .instrument(span),
        );
        self.tasks.push(handle);
        token
    }

    /// Cancel every task spawned under this scheduler. Idempotent.
    pub fn cancel_all(&self) {
        tracing::info!(component = "stream", task_count = self.tasks.len(), "cancelling all operator tasks");
        self.cancel.cancel();
    }

    /// Take ownership of every tracked join handle, leaving this
    /// scheduler's own list empty. Used by callers (e.g.
    /// [`crate::engine::StreamEngine`]) that need to await shutdown
    /// without holding a lock on the scheduler across the await point.
    pub(crate) fn drain(&mut self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.tasks)
    }

    /// Await every spawned task's completion. Call after
    /// [`Scheduler::cancel_all`] to ensure a clean shutdown.
    pub async fn join_all(&mut self) {
        for handle in self.tasks.drain(..) {
            let _ = handle.await;
        }
    }

    /// Number of tasks currently tracked (not necessarily still running).
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

/// Helper that periodically invokes `tick` (e.g. a window slide or a
/// health/rebalance cycle) until cancelled, sleeping `interval`
/// between ticks but never longer than [`MIN_YIELD_INTERVAL`] at a
/// stretch so cancellation is observed promptly.
pub async fn run_periodic<F, Fut>(cancel: &CancellationToken, interval: Duration, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let step = interval.min(MIN_YIELD_INTERVAL).max(Duration::from_millis(1));
    let mut elapsed = Duration::ZERO;
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(step) => {},
        }
        elapsed += step;
        if elapsed >= interval {
            elapsed = Duration::ZERO;
            tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingTask {
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StreamOperatorTask for CountingTask {
        async fn process_stream(&self, cancel: CancellationToken) {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(Duration::from_millis(5)) => {
                        self.counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn scheduler_runs_until_cancelled() {
        let mut scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.spawn(Arc::new(CountingTask { counter: Arc::clone(&counter) }));
        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.cancel_all();
        scheduler.join_all().await;
        assert!(counter.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn run_periodic_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticks2 = Arc::clone(&ticks);
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move {
            run_periodic(&cancel2, Duration::from_millis(5), || {
                let ticks = Arc::clone(&ticks2);
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        });
        tokio::time::sleep(Duration::from_millis(25)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }
}
