//! `SourceRegistry` port (spec §6).
//!
//! `list()` returns the current health/performance snapshot of every
//! federated source; `dispatch` executes one sub-plan against a named
//! source and returns its rows. Both are the excluded "concrete
//! backing database driver" collaborator (spec §1) — this crate only
//! calls through the trait.

use async_trait::async_trait;
use serde_json::Value;

use aquifer_core::optimizer::LogicalPlan;
use aquifer_error::Result;

use crate::source::SourceDescriptor;

/// Injected port over the set of federated backends.
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    /// Current descriptors for every known source.
    async fn list(&self) -> Vec<SourceDescriptor>;

    /// Execute `sub_plan` against `source_id`, returning its rows as
    /// schema-less maps (spec §6 "Wire formats").
    async fn dispatch(&self, source_id: &str, sub_plan: &LogicalPlan, params: &Value) -> Result<Vec<Value>>;
}
