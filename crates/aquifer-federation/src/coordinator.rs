//! Federation coordinator (spec §4.5 "Federation Coordinator").
//!
//! `execute` decomposes a logical plan's scans into per-source
//! sub-plans, matches each against [`SourceRegistry::list`]'s health
//! snapshot, and dispatches the healthy ones concurrently with a
//! per-source timeout. `get_results` hands back a finished query's
//! merged rows; `cancel` cuts short a query still in flight. Every
//! query's counters live in `active_queries` while running and move
//! into a rolling 24 h `history` once finished, mirroring the lifecycle
//! `aquifer_observability::Profiler` already uses for stage timelines.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use aquifer_core::optimizer::{LogicalPlan, Operation};
use aquifer_error::{AquiferError, Result};
use aquifer_observability::{Clock, MetricsSink, Profile, ProfileStage, Profiler};

use crate::metrics::{MergeMetrics, MetricsDelta, QueryMetrics, SourceMetrics};
use crate::registry::SourceRegistry;
use crate::rowops;
use crate::source::{SourceDescriptor, SourceHealth};

/// Upper bound on one sub-query's dispatch time (spec §4.5 "Dispatch").
const SUB_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a finished query's metrics stay in `history` before being
/// discarded (spec §3 "Query Metrics" lifecycle).
const HISTORY_RETENTION: chrono::Duration = chrono::Duration::hours(24);

/// A finished query's merged rows plus the bookkeeping a caller needs
/// to make sense of them (spec §6 wire format).
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub query_id:              String,
    pub rows:                  Vec<Value>,
    pub optimizations_applied: Vec<String>,
    pub rows_processed:        usize,
}

/// Fans a logical plan out to the sources its scans name, merges the
/// partial results, and tracks metrics/profiling for every query it
/// runs (spec C5).
pub struct FederationCoordinator {
    registry:       Arc<dyn SourceRegistry>,
    clock:          Arc<dyn Clock>,
    metrics_sink:   Arc<dyn MetricsSink>,
    profiler:       Profiler,
    active_queries: DashMap<String, QueryMetrics>,
    history:        DashMap<String, QueryMetrics>,
    profiles:       DashMap<String, Profile>,
    results:        DashMap<String, QueryResponse>,
    cancellations:  DashMap<String, CancellationToken>,
}

impl FederationCoordinator {
    /// A coordinator dispatching through `registry`, timestamping via
    /// `clock`, and publishing metrics to `metrics_sink`.
    #[must_use]
    pub fn new(registry: Arc<dyn SourceRegistry>, clock: Arc<dyn Clock>, metrics_sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            registry,
            clock,
            metrics_sink,
            profiler: Profiler::new(),
            active_queries: DashMap::new(),
            history: DashMap::new(),
            profiles: DashMap::new(),
            results: DashMap::new(),
            cancellations: DashMap::new(),
        }
    }

    /// Decomposes `plan`, dispatches each sub-plan concurrently to its
    /// source, merges the results, and returns the new query's id.
    /// Fails fast with `SOURCE_UNAVAILABLE` if any source `plan` names
    /// is missing from the registry or unhealthy at dispatch time.
    pub async fn execute(&self, plan: LogicalPlan, sources: &[String], params: Value) -> Result<String> {
        let query_id = Uuid::new_v4().to_string();
        let start = self.clock.now();
        self.active_queries.insert(query_id.clone(), QueryMetrics::start(&query_id, start));
        let cancel = CancellationToken::new();
        self.cancellations.insert(query_id.clone(), cancel.clone());

        let (plan, applied) = aquifer_core::optimizer::optimize(plan);
        let outcome = self.run(&query_id, &plan, sources, &params, &cancel, applied).await;
        self.cancellations.remove(&query_id);

        match outcome {
            Ok(response) => {
                self.results.insert(query_id.clone(), response);
                self.finish_query(&query_id).await;
                Ok(query_id)
            }
            Err(err) => {
                self.fail_query(&query_id, &err).await;
                Err(err)
            }
        }
    }

    /// The merged rows for a query `execute` has already finished.
    pub fn get_results(&self, query_id: &str) -> Result<QueryResponse> {
        self.results
            .get(query_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| AquiferError::Internal { message: format!("no results for query '{query_id}'") })
    }

    /// Requests cancellation of a query still dispatching sub-plans.
    /// A no-op if the query has already finished.
    pub fn cancel(&self, query_id: &str) {
        if let Some(token) = self.cancellations.get(query_id) {
            token.cancel();
        }
    }

    /// The live counters for a running or finished query.
    #[must_use]
    pub fn get_query_metrics(&self, query_id: &str) -> Option<QueryMetrics> {
        self.active_queries
            .get(query_id)
            .map(|entry| entry.clone())
            .or_else(|| self.history.get(query_id).map(|entry| entry.clone()))
    }

    /// The stage timeline recorded for `query_id`, if one exists —
    /// finalized if the query has finished, still accumulating if not.
    #[must_use]
    pub fn get_profile(&self, query_id: &str) -> Option<Profile> {
        self.profiles.get(query_id).map(|entry| entry.clone()).or_else(|| self.profiler.snapshot(query_id))
    }

    /// The single stage, if any, that consumed more than 20% of
    /// `query_id`'s total execution time.
    #[must_use]
    pub fn get_bottleneck(&self, query_id: &str) -> Option<ProfileStage> {
        self.get_profile(query_id).and_then(|profile| profile.bottleneck().cloned())
    }

    /// Human-readable suggestions derived from `query_id`'s profile.
    #[must_use]
    pub fn get_optimization_suggestions(&self, query_id: &str) -> Vec<String> {
        self.get_profile(query_id).map(|profile| profile.optimization_suggestions()).unwrap_or_default()
    }

    async fn run(
        &self,
        query_id: &str,
        plan: &LogicalPlan,
        sources: &[String],
        params: &Value,
        cancel: &CancellationToken,
        applied: Vec<String>,
    ) -> Result<QueryResponse> {
        self.profiler.start_stage(query_id, "dispatch", "coordination", self.clock.as_ref());
        let descriptors: HashMap<String, SourceDescriptor> =
            self.registry.list().await.into_iter().map(|d| (d.id.clone(), d)).collect();

        let sub_plans = decompose(plan, sources);
        for (source_id, _) in &sub_plans {
            match descriptors.get(source_id) {
                Some(descriptor) if descriptor.health() != SourceHealth::Unhealthy => {}
                _ => {
                    tracing::warn!(component = "federation", query_id, source_id = %source_id, "source unavailable at dispatch");
                    return Err(AquiferError::SourceUnavailable { source_id: source_id.clone() });
                }
            }
        }

        self.profiler.start_stage(query_id, "execute", "io", self.clock.as_ref());
        let dispatches =
            sub_plans.into_iter().map(|(source_id, sub_plan)| self.dispatch_one(query_id, source_id, sub_plan, params.clone(), cancel.clone()));
        let dispatched = futures::future::join_all(dispatches).await;

        let mut rows = Vec::new();
        for (source_id, outcome) in dispatched {
            match outcome {
                Ok(partial) => {
                    if let Some(descriptor) = descriptors.get(&source_id) {
                        self.record_source_metrics(query_id, &source_id, descriptor);
                    }
                    rows.extend(partial);
                }
                // A sub-plan timeout marks its source degraded rather than
                // failing the whole query (spec §4.5 "Dispatch"); other
                // sources' rows still merge normally.
                Err(AquiferError::NodeTimeout { .. }) => self.record_degraded_source(query_id, &source_id),
                Err(err) => return Err(err),
            }
        }

        self.profiler.start_stage(query_id, "merge", "cpu", self.clock.as_ref());
        let rows_before_merge = rows.len() as u64;
        let merged = rowops::apply_spine(rows, plan);
        self.profiler.record_stage_metric(query_id, "rows_merged", merged.len() as f64);
        if let Some(mut metrics) = self.active_queries.get_mut(query_id) {
            metrics.record_merge(MergeMetrics { rows_merged: rows_before_merge, merge_time_ms: 0.0 });
        }

        let rows_processed = merged.len();
        Ok(QueryResponse { query_id: query_id.to_string(), rows: merged, optimizations_applied: applied, rows_processed })
    }

    async fn dispatch_one(
        &self,
        query_id: &str,
        source_id: String,
        sub_plan: LogicalPlan,
        params: Value,
        cancel: CancellationToken,
    ) -> (String, Result<Vec<Value>>) {
        let outcome = tokio::select! {
            result = tokio::time::timeout(SUB_QUERY_TIMEOUT, self.registry.dispatch(&source_id, &sub_plan, &params)) => {
                result.unwrap_or_else(|_| {
                    tracing::warn!(component = "federation", query_id, source_id = %source_id, timeout_ms = SUB_QUERY_TIMEOUT.as_millis() as u64, "sub-query dispatch timed out");
                    Err(AquiferError::NodeTimeout {
                        node_id: source_id.clone(),
                        timeout_ms: SUB_QUERY_TIMEOUT.as_millis() as u64,
                    })
                })
            }
            () = cancel.cancelled() => {
                tracing::info!(component = "federation", query_id, source_id = %source_id, "dispatch cancelled");
                Err(AquiferError::StreamCancelled { stream_id: query_id.to_string() })
            }
        };
        (source_id, outcome)
    }

    fn record_source_metrics(&self, query_id: &str, source_id: &str, descriptor: &SourceDescriptor) {
        if let Some(mut metrics) = self.active_queries.get_mut(query_id) {
            metrics.update_source(
                source_id,
                SourceMetrics {
                    avg_response_time_ms: descriptor.avg_response_time_ms,
                    error_rate:           descriptor.error_rate,
                    throughput_qps:       descriptor.throughput_qps,
                },
            );
        }
    }

    /// Folds a sub-plan timeout into `query_id`'s source metrics as
    /// degraded (`error_rate` above [`SourceDescriptor::health`]'s
    /// degraded threshold) instead of letting the timeout silently
    /// disappear once its source is excluded from the merge.
    fn record_degraded_source(&self, query_id: &str, source_id: &str) {
        tracing::warn!(component = "federation", query_id, source_id, "source marked degraded after dispatch timeout");
        if let Some(mut metrics) = self.active_queries.get_mut(query_id) {
            #[allow(clippy::cast_precision_loss)]
            let timeout_ms = SUB_QUERY_TIMEOUT.as_millis() as f64;
            metrics.update_source(
                source_id,
                SourceMetrics { avg_response_time_ms: timeout_ms, error_rate: 1.0, throughput_qps: 0.0 },
            );
            metrics.update(&MetricsDelta {
                errors: vec![format!("source '{source_id}' timed out after {timeout_ms}ms and was marked degraded")],
                ..Default::default()
            });
        }
    }

    async fn finish_query(&self, query_id: &str) {
        let now = self.clock.now();
        if let Some(profile) = self.profiler.end_query(query_id, self.clock.as_ref()) {
            self.profiles.insert(query_id.to_string(), profile);
        }
        if let Some((_, mut metrics)) = self.active_queries.remove(query_id) {
            metrics.finish(now);
            self.publish(&metrics).await;
            self.history.insert(query_id.to_string(), metrics);
        }
        self.prune_history(now);
    }

    async fn fail_query(&self, query_id: &str, err: &AquiferError) {
        tracing::warn!(component = "federation", query_id, error = %err, error_code = err.error_code(), "query failed");
        let now = self.clock.now();
        if let Some(profile) = self.profiler.end_query(query_id, self.clock.as_ref()) {
            self.profiles.insert(query_id.to_string(), profile);
        }
        if let Some((_, mut metrics)) = self.active_queries.remove(query_id) {
            metrics.update(&MetricsDelta { errors: vec![err.to_string()], ..Default::default() });
            metrics.finish(now);
            self.publish(&metrics).await;
            self.history.insert(query_id.to_string(), metrics);
        }
        self.prune_history(now);
    }

    async fn publish(&self, metrics: &QueryMetrics) {
        let labels = aquifer_observability::labels(&[("query_id", metrics.query_id.as_str())]);
        if let Some(execution_time_ms) = metrics.execution_time_ms {
            self.metrics_sink.observe("federation_query_duration_ms", execution_time_ms, &labels).await;
        }
        self.metrics_sink.increment("federation_query_errors_total", metrics.error_count, &labels).await;
    }

    fn prune_history(&self, now: DateTime<Utc>) {
        self.history.retain(|_, metrics| metrics.end_time.is_none_or(|end| now - end <= HISTORY_RETENTION));
        let live: std::collections::HashSet<String> = self.history.iter().map(|entry| entry.key().clone()).collect();
        self.profiles.retain(|query_id, _| live.contains(query_id));
        self.results.retain(|query_id, _| live.contains(query_id));
    }
}

/// Splits `plan` into one sub-plan per named source. The non-scan,
/// non-join spine at the top of `plan` ([`rowops::apply_spine`]'s
/// concern) is skipped; each remaining `Join` branch — a scan, or a
/// scan with a predicate `predicate_pushdown` already attached to it —
/// becomes one source's sub-plan, keyed by [`Operation::scan_source_key`].
fn decompose(plan: &LogicalPlan, sources: &[String]) -> Vec<(String, LogicalPlan)> {
    let mut out = Vec::new();
    collect_subplans(source_tree_root(plan), &mut out);
    out.into_iter().filter(|(key, _)| sources.iter().any(|s| s == key)).collect()
}

/// Walks down the single-child spine above the plan's join/scan
/// structure, returning the node where that structure begins.
fn source_tree_root(plan: &LogicalPlan) -> &LogicalPlan {
    let mut node = plan;
    loop {
        match &node.operation {
            Operation::Join { .. } | Operation::Scan { .. } => return node,
            _ => match node.children.first() {
                Some(child) => node = child,
                None => return node,
            },
        }
    }
}

fn collect_subplans(plan: &LogicalPlan, out: &mut Vec<(String, LogicalPlan)>) {
    if let Operation::Join { .. } = &plan.operation {
        for child in &plan.children {
            collect_subplans(child, out);
        }
    } else if let Some(key) = scan_leaf_key(plan) {
        out.push((key, plan.clone()));
    }
}

fn scan_leaf_key(plan: &LogicalPlan) -> Option<String> {
    plan.operation.scan_source_key().map(str::to_string).or_else(|| plan.children.first().and_then(scan_leaf_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquifer_observability::{testing::FakeClock, NoopMetricsSink};
    use async_trait::async_trait;
    use serde_json::json;

    struct StubRegistry {
        descriptors: Vec<SourceDescriptor>,
    }

    #[async_trait]
    impl SourceRegistry for StubRegistry {
        async fn list(&self) -> Vec<SourceDescriptor> {
            self.descriptors.clone()
        }

        async fn dispatch(&self, source_id: &str, _sub_plan: &LogicalPlan, _params: &Value) -> Result<Vec<Value>> {
            Ok(vec![json!({"source": source_id})])
        }
    }

    fn coordinator(descriptors: Vec<SourceDescriptor>) -> FederationCoordinator {
        FederationCoordinator::new(
            Arc::new(StubRegistry { descriptors }),
            Arc::new(FakeClock::new(0)),
            Arc::new(NoopMetricsSink),
        )
    }

    fn single_scan_plan(table: &str) -> LogicalPlan {
        LogicalPlan::leaf(Operation::Scan { table: table.to_string(), alias: None, columns: vec!["*".into()] })
    }

    #[tokio::test]
    async fn execute_against_a_healthy_source_returns_merged_rows() {
        let coordinator = coordinator(vec![SourceDescriptor::new("users")]);
        let plan = single_scan_plan("users");
        let query_id = coordinator.execute(plan, &["users".to_string()], json!({})).await.unwrap();
        let response = coordinator.get_results(&query_id).unwrap();
        assert_eq!(response.rows, vec![json!({"source": "users"})]);
    }

    #[tokio::test]
    async fn unknown_source_fails_fast() {
        let coordinator = coordinator(vec![]);
        let plan = single_scan_plan("ghost");
        let err = coordinator.execute(plan, &["ghost".to_string()], json!({})).await.unwrap_err();
        assert_eq!(err.error_code(), "SOURCE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn unhealthy_source_fails_fast() {
        let mut descriptor = SourceDescriptor::new("users");
        descriptor.error_rate = 0.5;
        let coordinator = coordinator(vec![descriptor]);
        let plan = single_scan_plan("users");
        let err = coordinator.execute(plan, &["users".to_string()], json!({})).await.unwrap_err();
        assert_eq!(err.error_code(), "SOURCE_UNAVAILABLE");
    }

    struct SlowRegistry;

    #[async_trait]
    impl SourceRegistry for SlowRegistry {
        async fn list(&self) -> Vec<SourceDescriptor> {
            vec![SourceDescriptor::new("slow"), SourceDescriptor::new("fast")]
        }

        async fn dispatch(&self, source_id: &str, _sub_plan: &LogicalPlan, _params: &Value) -> Result<Vec<Value>> {
            if source_id == "slow" {
                tokio::time::sleep(SUB_QUERY_TIMEOUT + Duration::from_secs(5)).await;
            }
            Ok(vec![json!({"source": source_id})])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sub_plan_timeout_marks_source_degraded_instead_of_failing_the_query() {
        let coordinator = FederationCoordinator::new(
            Arc::new(SlowRegistry),
            Arc::new(FakeClock::new(0)),
            Arc::new(NoopMetricsSink),
        );
        let plan = LogicalPlan {
            operation: Operation::Join {
                condition: aquifer_core::optimizer::JoinCondition {
                    left:            "slow.id".to_string(),
                    right:           "fast.id".to_string(),
                    condition_count: 1,
                },
            },
            children: vec![single_scan_plan("slow"), single_scan_plan("fast")],
        };

        let query_id =
            coordinator.execute(plan, &["slow".to_string(), "fast".to_string()], json!({})).await.unwrap();
        let response = coordinator.get_results(&query_id).unwrap();
        assert_eq!(response.rows, vec![json!({"source": "fast"})]);

        let metrics = coordinator.get_query_metrics(&query_id).unwrap();
        let slow_metrics = metrics.source_metrics.get("slow").expect("timed-out source still recorded");
        assert_eq!(slow_metrics.error_rate, 1.0);
        assert!(!metrics.errors.is_empty());
    }

    #[tokio::test]
    async fn finished_query_metrics_move_into_history() {
        let coordinator = coordinator(vec![SourceDescriptor::new("users")]);
        let plan = single_scan_plan("users");
        let query_id = coordinator.execute(plan, &["users".to_string()], json!({})).await.unwrap();
        assert!(coordinator.active_queries.get(&query_id).is_none());
        assert!(coordinator.get_query_metrics(&query_id).is_some());
    }
}
