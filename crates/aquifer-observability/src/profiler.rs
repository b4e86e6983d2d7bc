//! Per-query profiling (spec §3 "Profile", §4.5 "Profiling").
//!
//! A `Profile` is a strictly-ordered list of stages; at most one
//! stage is open at a time. Starting a new stage auto-closes the
//! previous one. Ending the query finalizes every stage's
//! `percentage` of total stage time; the bottleneck stage is whichever
//! one exceeds 20% (spec §4.5, §GLOSSARY "Bottleneck stage").

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::clock::Clock;

/// One stage of a query's execution, as tracked by the profiler.
#[derive(Debug, Clone)]
pub struct ProfileStage {
    /// Stage name (e.g. `"parse"`, `"validate"`, `"optimize"`, `"dispatch:source_a"`, `"merge"`).
    pub name:        String,
    /// Stage type/category, free-form (e.g. `"parse"`, `"dispatch"`, `"merge"`).
    pub stage_type:  String,
    /// When the stage opened.
    pub start_time:  DateTime<Utc>,
    /// When the stage closed; `None` while the stage is open.
    pub end_time:    Option<DateTime<Utc>>,
    /// Stage duration once closed.
    pub duration_ms: Option<f64>,
    /// Share of total stage time this stage consumed, once the query ended.
    pub percentage:  Option<f64>,
    /// Stage-local metrics (e.g. `rows_scanned`, `cache_hit_ratio`).
    pub metrics:     HashMap<String, f64>,
}

impl ProfileStage {
    fn open(name: String, stage_type: String, start_time: DateTime<Utc>) -> Self {
        Self { name, stage_type, start_time, end_time: None, duration_ms: None, percentage: None, metrics: HashMap::new() }
    }

    fn close(&mut self, at: DateTime<Utc>) {
        if self.end_time.is_some() {
            return;
        }
        self.end_time = Some(at);
        let ms = (at - self.start_time).num_milliseconds().max(0) as f64;
        self.duration_ms = Some(ms);
    }

    /// Whether this stage has not yet closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// The full stage timeline for one `query_id`.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    /// Query this profile belongs to.
    pub query_id: String,
    /// Stages in start-time order; at most the last one may be open.
    pub stages:   Vec<ProfileStage>,
}

impl Profile {
    /// Index of the stage currently open, if any.
    fn open_index(&self) -> Option<usize> {
        self.stages.iter().position(ProfileStage::is_open)
    }

    /// Total duration across every closed stage.
    fn total_stage_time_ms(&self) -> f64 {
        self.stages.iter().filter_map(|s| s.duration_ms).sum()
    }

    /// The stage whose `percentage` exceeds 20, if profiling has been
    /// finalized and one exists (spec GLOSSARY "Bottleneck stage").
    #[must_use]
    pub fn bottleneck(&self) -> Option<&ProfileStage> {
        self.stages.iter().filter(|s| s.percentage.map_or(false, |p| p > 20.0)).max_by(|a, b| {
            a.percentage.unwrap_or(0.0).partial_cmp(&b.percentage.unwrap_or(0.0)).unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Rule-based optimization suggestions over the finalized stage
    /// metrics (spec §4.5). These are heuristics, not a cost-based
    /// optimizer: any stage crossing the bottleneck threshold is
    /// flagged, and stages whose recorded cache-hit ratio is low
    /// suggest caching.
    #[must_use]
    pub fn optimization_suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();
        for stage in &self.stages {
            if stage.percentage.map_or(false, |p| p > 20.0) {
                suggestions.push(format!(
                    "stage '{}' consumed {:.1}% of total execution time; consider parallelizing or caching it",
                    stage.name,
                    stage.percentage.unwrap_or(0.0)
                ));
            }
            if let Some(ratio) = stage.metrics.get("cache_hit_ratio") {
                if *ratio < 0.5 {
                    suggestions.push(format!("stage '{}' has a low cache hit ratio ({:.2}); consider warming or enlarging the cache", stage.name, ratio));
                }
            }
        }
        suggestions
    }
}

/// Owns every in-flight and recently-finalized `Profile`, keyed by
/// `query_id`. One `Profiler` is shared (by `Arc`) across the
/// federation coordinator's concurrent sub-query tasks.
#[derive(Default)]
pub struct Profiler {
    profiles: DashMap<String, Profile>,
}

impl Profiler {
    /// A profiler with no tracked queries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new stage for `query_id`, auto-closing any stage
    /// already open for that query.
    pub fn start_stage(&self, query_id: &str, name: impl Into<String>, stage_type: impl Into<String>, clock: &dyn Clock) {
        let now = clock.now();
        let mut profile = self.profiles.entry(query_id.to_string()).or_insert_with(|| Profile { query_id: query_id.to_string(), stages: Vec::new() });
        if let Some(idx) = profile.open_index() {
            profile.stages[idx].close(now);
        }
        profile.stages.push(ProfileStage::open(name.into(), stage_type.into(), now));
    }

    /// Record a metric on the currently-open stage for `query_id`, if
    /// any.
    pub fn record_stage_metric(&self, query_id: &str, key: impl Into<String>, value: f64) {
        if let Some(mut profile) = self.profiles.get_mut(query_id) {
            if let Some(idx) = profile.open_index() {
                profile.stages[idx].metrics.insert(key.into(), value);
            }
        }
    }

    /// Close the open stage (if any) and compute each stage's
    /// `percentage` of total stage time. Returns the finalized
    /// profile; the profiler no longer tracks it as in-flight.
    #[must_use]
    pub fn end_query(&self, query_id: &str, clock: &dyn Clock) -> Option<Profile> {
        let now = clock.now();
        let (_, mut profile) = self.profiles.remove(query_id)?;
        if let Some(idx) = profile.open_index() {
            profile.stages[idx].close(now);
        }
        let total = profile.total_stage_time_ms();
        for stage in &mut profile.stages {
            stage.percentage = stage.duration_ms.map(|d| if total > 0.0 { d / total * 100.0 } else { 0.0 });
        }
        Some(profile)
    }

    /// Snapshot of an in-flight profile without finalizing it.
    #[must_use]
    pub fn snapshot(&self, query_id: &str) -> Option<Profile> {
        self.profiles.get(query_id).map(|p| p.clone())
    }
}
