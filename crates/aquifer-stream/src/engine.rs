//! Stream engine (spec §6 streaming control surface).
//!
//! Ties [`WindowedAggregator`]/[`StreamJoiner`] to [`StreamContext`]
//! and [`Scheduler`], closing the loop spec.md §2 describes for the
//! streaming data flow: "streaming queries register with C4 and are
//! driven by a cooperative scheduler, emitting to registered sinks."
//! `status`/`cancel` are the engine's own bookkeeping over the
//! per-operator cancellation tokens the scheduler hands back on spawn
//! — the `get_stream_status`/`cancel_stream` pair spec §6 names.

use std::{collections::HashMap, sync::Arc, time::Duration as StdDuration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::context::StreamContext;
use crate::join::{JoinConfig, StreamJoiner};
use crate::scheduler::{run_periodic, Scheduler, StreamOperatorTask};
use crate::window::{WindowConfig, WindowedAggregator};

/// Status of a registered stream operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Spawned and not yet cancelled.
    Running,
    /// Cancellation requested. The task may still be draining its
    /// current tick — cancellation is cooperative, not immediate.
    Cancelled,
}

struct WindowTask {
    stream_id:      String,
    aggregator:     WindowedAggregator,
    context:        Arc<StreamContext>,
    slide_interval: StdDuration,
}

#[async_trait]
impl StreamOperatorTask for WindowTask {
    async fn process_stream(&self, cancel: CancellationToken) {
        run_periodic(&cancel, self.slide_interval, || async {
            if let Some(buffer) = self.context.snapshot(&self.stream_id) {
                let value = self.aggregator.slide(&buffer);
                self.context.emit(&self.stream_id, value);
            }
        })
        .await;
    }
}

struct JoinTask {
    output_stream_id: String,
    left_stream_id:   String,
    right_stream_id:  String,
    joiner:           StreamJoiner,
    context:          Arc<StreamContext>,
    poll_interval:    StdDuration,
}

#[async_trait]
impl StreamOperatorTask for JoinTask {
    async fn process_stream(&self, cancel: CancellationToken) {
        run_periodic(&cancel, self.poll_interval, || async {
            let (Some(left), Some(right)) =
                (self.context.snapshot(&self.left_stream_id), self.context.snapshot(&self.right_stream_id))
            else {
                return;
            };
            for row in self.joiner.join(&left, &right) {
                self.context.emit(&self.output_stream_id, row);
            }
        })
        .await;
    }
}

/// One spec §5 "engine instance": a [`StreamContext`] plus the
/// [`Scheduler`] driving every windowed aggregation/join registered
/// against it. Engines share no state with each other — each owns its
/// own context, scheduler and operator-id table.
pub struct StreamEngine {
    context:   Arc<StreamContext>,
    scheduler: Mutex<Scheduler>,
    tokens:    Mutex<HashMap<String, CancellationToken>>,
}

impl StreamEngine {
    /// A fresh engine driving `context`.
    #[must_use]
    pub fn new(context: Arc<StreamContext>) -> Self {
        Self { context, scheduler: Mutex::new(Scheduler::new()), tokens: Mutex::new(HashMap::new()) }
    }

    /// The stream context this engine drives.
    #[must_use]
    pub fn context(&self) -> Arc<StreamContext> {
        Arc::clone(&self.context)
    }

    /// Register a windowed aggregation over `stream_id`: one slide
    /// result is computed and emitted to `stream_id`'s handlers every
    /// `config.slide_interval`. Returns `operator_id` for later
    /// `status`/`cancel` calls.
    pub fn register_window(
        &self,
        operator_id: impl Into<String>,
        stream_id: impl Into<String>,
        config: WindowConfig,
    ) -> String {
        let operator_id = operator_id.into();
        let slide_interval = duration_to_std(config.slide_interval);
        let task = Arc::new(WindowTask {
            stream_id: stream_id.into(),
            aggregator: WindowedAggregator::new(config),
            context: Arc::clone(&self.context),
            slide_interval,
        });
        self.spawn(operator_id.clone(), task);
        operator_id
    }

    /// Register a stream join between `left_stream_id` and
    /// `right_stream_id`, polling every `poll_interval` and emitting
    /// matched rows to `output_stream_id`'s handlers.
    pub fn register_join(
        &self,
        operator_id: impl Into<String>,
        output_stream_id: impl Into<String>,
        left_stream_id: impl Into<String>,
        right_stream_id: impl Into<String>,
        config: JoinConfig,
        poll_interval: StdDuration,
    ) -> String {
        let operator_id = operator_id.into();
        let task = Arc::new(JoinTask {
            output_stream_id: output_stream_id.into(),
            left_stream_id: left_stream_id.into(),
            right_stream_id: right_stream_id.into(),
            joiner: StreamJoiner::new(config),
            context: Arc::clone(&self.context),
            poll_interval,
        });
        self.spawn(operator_id.clone(), task);
        operator_id
    }

    fn spawn(&self, operator_id: String, task: Arc<dyn StreamOperatorTask>) {
        let token = self.scheduler.lock().spawn(task);
        self.tokens.lock().insert(operator_id, token);
    }

    /// Status of a registered operator, or `None` if `operator_id` was
    /// never registered (spec §6 `get_stream_status`).
    #[must_use]
    pub fn status(&self, operator_id: &str) -> Option<StreamStatus> {
        self.tokens
            .lock()
            .get(operator_id)
            .map(|token| if token.is_cancelled() { StreamStatus::Cancelled } else { StreamStatus::Running })
    }

    /// Cancel one registered operator (spec §6 `cancel_stream`).
    /// Cooperative and idempotent: the task observes cancellation at
    /// its next tick and exits without flushing partial state.
    pub fn cancel(&self, operator_id: &str) {
        if let Some(token) = self.tokens.lock().get(operator_id) {
            token.cancel();
        }
    }

    /// Cancel every operator this engine has spawned and await their
    /// completion.
    pub async fn shutdown(&self) {
        for token in self.tokens.lock().values() {
            token.cancel();
        }
        let handles = self.scheduler.lock().drain();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

fn duration_to_std(duration: chrono::Duration) -> StdDuration {
    duration.to_std().unwrap_or(StdDuration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use serde_json::{json, Value};

    use super::*;
    use crate::window::{AggregateFn, AggregateSpec};

    #[tokio::test]
    async fn registered_window_emits_on_slide() {
        let context = Arc::new(StreamContext::new());
        context.open_stream("s", 100, ChronoDuration::seconds(5));
        context.push("s", json!({"v": 1}), chrono::Utc::now());
        context.push("s", json!({"v": 2}), chrono::Utc::now());
        context.push("s", json!({"v": 3}), chrono::Utc::now());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
        context.register_handler(
            "s",
            Arc::new(move |v| {
                let _ = tx.send(v);
            }),
        );

        let engine = StreamEngine::new(Arc::clone(&context));
        let config = WindowConfig {
            window_size:    ChronoDuration::seconds(5),
            slide_interval: ChronoDuration::milliseconds(10),
            aggregates:     vec![AggregateSpec::new(AggregateFn::Sum, "v", "total")],
        };
        let id = engine.register_window("w1", "s", config);
        assert_eq!(engine.status(&id), Some(StreamStatus::Running));

        let emitted = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.expect("emitted in time");
        assert_eq!(emitted.unwrap()["total"], 6.0);

        engine.cancel(&id);
        assert_eq!(engine.status(&id), Some(StreamStatus::Cancelled));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn registered_join_emits_matched_rows() {
        let context = Arc::new(StreamContext::new());
        context.open_stream("left", 100, ChronoDuration::seconds(5));
        context.open_stream("right", 100, ChronoDuration::seconds(5));
        context.open_stream("out", 100, ChronoDuration::seconds(5));
        context.push("left", json!({"id": 1, "click": "a"}), chrono::Utc::now());
        context.push("right", json!({"id": 1, "name": "alice"}), chrono::Utc::now());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
        context.register_handler(
            "out",
            Arc::new(move |v| {
                let _ = tx.send(v);
            }),
        );

        let engine = StreamEngine::new(Arc::clone(&context));
        let id = engine.register_join(
            "j1",
            "out",
            "left",
            "right",
            JoinConfig::new("id", "id"),
            Duration::from_millis(10),
        );

        let emitted = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.expect("emitted in time");
        let row = emitted.unwrap();
        assert_eq!(row["click"], "a");
        assert_eq!(row["name"], "alice");

        engine.cancel(&id);
        engine.shutdown().await;
    }

    #[test]
    fn unknown_operator_status_is_none() {
        let context = Arc::new(StreamContext::new());
        let engine = StreamEngine::new(context);
        assert_eq!(engine.status("missing"), None);
    }
}
