//! Streaming execution engine for Aquifer (spec C4).
//!
//! Provides bounded stream buffers with joint size/age eviction,
//! windowed aggregation, a hash stream-join operator, and the
//! cooperative scheduler that drives them. Per spec §5, this crate's
//! operators never yield on pure CPU paths and never call a wall clock
//! directly — every timestamp arrives as a `DateTime<Utc>` parameter,
//! resolved by whatever clock port the caller is injecting.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod context;
pub mod engine;
pub mod join;
pub mod scheduler;
pub mod window;

pub use buffer::{BufferEntry, StreamBuffer};
pub use context::{Handler, StreamContext};
pub use engine::{StreamEngine, StreamStatus};
pub use join::{JoinConfig, StreamJoiner};
pub use scheduler::{Scheduler, StreamOperatorTask};
pub use window::{AggregateFn, AggregateSpec, WindowConfig, WindowedAggregator};
