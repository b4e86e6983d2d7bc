//! Ambient observability ports and C8 implementations for Aquifer.
//!
//! Per spec §6, the core treats wall-clock time and metrics
//! publication as injected ports rather than direct calls to
//! `std::time` or a concrete metrics backend. This crate defines
//! those ports (`Clock`, `MetricsSink`) plus the C8 components that
//! every other crate in the workspace is built against: structured
//! event logging helpers, an in-memory `EventMonitor`, and the
//! per-query `Profiler` used by `aquifer-federation`'s coordinator
//! (spec §4.5/§4.8).

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod clock;
mod events;
mod metrics;
mod profiler;

pub use clock::{testing, Clock, SystemClock};
pub use events::{Event, EventMonitor};
pub use metrics::{labels, Labels, MetricsSink, NoopMetricsSink, RecordingMetricsSink};
pub use profiler::{Profile, ProfileStage, Profiler};
