//! Federation coordinator for Aquifer (spec C5).
//!
//! Decomposes a logical plan into per-source sub-plans, dispatches
//! them concurrently through the injected [`SourceRegistry`] port,
//! merges partial results, and tracks per-query and per-source
//! metrics plus a stage profile (via `aquifer_observability::Profiler`).

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod coordinator;
pub mod metrics;
pub mod registry;
mod rowops;
pub mod service;
pub mod source;

pub use coordinator::{FederationCoordinator, QueryResponse};
pub use metrics::QueryMetrics;
pub use registry::SourceRegistry;
pub use service::QueryService;
pub use source::{SourceDescriptor, SourceHealth};
