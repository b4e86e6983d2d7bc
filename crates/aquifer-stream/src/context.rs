//! Stream context (spec §3 "Stream Context").
//!
//! Maps `stream_id -> StreamBuffer` and `stream_id -> list<Handler>`.
//! Handlers are invoked synchronously from the producing operator's
//! task (spec §4.4), so they must be cheap; anything that needs to do
//! I/O should hand off to another task itself.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

use crate::buffer::StreamBuffer;

/// A synchronous sink invoked with every record an operator emits for
/// a stream (e.g. a window slide's aggregate result, or a join's
/// matched rows).
pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

/// Owns every registered stream's buffer and handler list. One
/// `StreamContext` is shared (by `Arc`) across all operators driven by
/// a single [`crate::scheduler::Scheduler`] instance; per spec §5
/// there is no shared mutable state across separate engine instances.
#[derive(Default)]
pub struct StreamContext {
    buffers:  DashMap<String, StreamBuffer>,
    handlers: DashMap<String, Vec<Handler>>,
}

impl StreamContext {
    /// A context with no registered streams.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream with the given buffer limits. A stream
    /// already registered under `stream_id` is replaced.
    pub fn open_stream(&self, stream_id: impl Into<String>, max_size: usize, window: chrono::Duration) {
        self.buffers.insert(stream_id.into(), StreamBuffer::new(max_size, window));
    }

    /// Drop a stream's buffer and handlers.
    pub fn close_stream(&self, stream_id: &str) {
        self.buffers.remove(stream_id);
        self.handlers.remove(stream_id);
    }

    /// Push a record onto `stream_id`'s buffer, timestamped `at`.
    /// No-op if the stream was never opened.
    pub fn push(&self, stream_id: &str, record: Value, at: DateTime<Utc>) {
        if let Some(mut buffer) = self.buffers.get_mut(stream_id) {
            buffer.push(record, at);
        }
    }

    /// Register a handler invoked with every record an operator emits
    /// for `stream_id`.
    pub fn register_handler(&self, stream_id: impl Into<String>, handler: Handler) {
        self.handlers.entry(stream_id.into()).or_default().push(handler);
    }

    /// Invoke every handler registered for `stream_id` with `record`,
    /// synchronously and in registration order.
    pub fn emit(&self, stream_id: &str, record: Value) {
        if let Some(handlers) = self.handlers.get(stream_id) {
            for handler in handlers.iter() {
                handler(record.clone());
            }
        }
    }

    /// Run `f` with read access to `stream_id`'s buffer, if it exists.
    pub fn with_buffer<R>(&self, stream_id: &str, f: impl FnOnce(&StreamBuffer) -> R) -> Option<R> {
        self.buffers.get(stream_id).map(|b| f(&b))
    }

    /// Run `f` with mutable access to `stream_id`'s buffer, if it exists.
    pub fn with_buffer_mut<R>(&self, stream_id: &str, f: impl FnOnce(&mut StreamBuffer) -> R) -> Option<R> {
        self.buffers.get_mut(stream_id).map(|mut b| f(&mut b))
    }

    /// A cloned snapshot of `stream_id`'s buffer, if it exists.
    /// Operators that need simultaneous read access to two streams
    /// (e.g. a stream join) snapshot both rather than nesting
    /// [`StreamContext::with_buffer`] calls, which would hold two
    /// `DashMap` shard guards on the same thread at once.
    #[must_use]
    pub fn snapshot(&self, stream_id: &str) -> Option<StreamBuffer> {
        self.buffers.get(stream_id).map(|b| b.clone())
    }

    /// Number of handlers registered for `stream_id`.
    #[must_use]
    pub fn handler_count(&self, stream_id: &str) -> usize {
        self.handlers.get(stream_id).map_or(0, |h| h.len())
    }
}
