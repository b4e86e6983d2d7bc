//! Thin top-level query service (spec §6 "Surface exposed by the core").
//!
//! Wires the otherwise-separate parse → validate → optimize →
//! federate pipeline behind the single `execute(query_text, dialect,
//! sources, params, ctx)` entry point spec §6 documents, instead of
//! leaving callers to drive `aquifer_core` and [`FederationCoordinator`]
//! by hand. Streaming queries (`StreamHandle` in spec §6) are out of
//! scope here — they run through `aquifer_stream::StreamEngine`
//! directly, which already exposes its own status/cancel surface.

use std::sync::Arc;

use serde_json::Value;

use aquifer_core::ast::Ast;
use aquifer_core::optimizer::LogicalPlan;
use aquifer_core::parser::ParserRegistry;
use aquifer_core::validation::{detect_dml_verb, Category, Level, ValidationContext, ValidationResult, ValidatorEngine};
use aquifer_error::{AquiferError, Result};
use aquifer_observability::{Clock, MetricsSink};

use crate::coordinator::{FederationCoordinator, QueryResponse};
use crate::registry::SourceRegistry;

/// `execute(query_text, dialect, sources, params, ctx) → QueryResponse`
/// per spec §6, covering parsing, validation, optimization, and
/// federated dispatch behind one call.
pub struct QueryService {
    parser:      ParserRegistry,
    validator:   ValidatorEngine,
    coordinator: FederationCoordinator,
}

impl QueryService {
    /// A service dispatching through `registry`, timestamping via
    /// `clock`, and publishing metrics to `metrics_sink`, with the
    /// built-in dialects and shipped rule set.
    #[must_use]
    pub fn new(registry: Arc<dyn SourceRegistry>, clock: Arc<dyn Clock>, metrics_sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            parser:      ParserRegistry::with_builtin_dialects(),
            validator:   ValidatorEngine::with_default_rules(),
            coordinator: FederationCoordinator::new(registry, clock, metrics_sink),
        }
    }

    /// Parses `query_text` under `dialect`, validates it against
    /// `ctx`, optimizes the resulting plan, and dispatches it to
    /// `sources`.
    ///
    /// A DML verb the grammar can't parse at all (`INSERT`/`UPDATE`/
    /// `DELETE`) is checked against `ctx.permissions` before parsing
    /// is attempted (spec §8 seed scenario 3), so `DELETE FROM users`
    /// without `DELETE` permission comes back as `SECURITY_DENIED`
    /// rather than a `SYNTAX_ERROR` that masks the real problem.
    pub async fn execute(
        &self,
        query_text: &str,
        dialect: &str,
        sources: &[String],
        params: Value,
        ctx: &ValidationContext,
    ) -> Result<QueryResponse> {
        if let Some(verb) = detect_dml_verb(query_text) {
            let missing = ctx.permissions.missing(&[verb]);
            if !missing.is_empty() {
                return Err(AquiferError::SecurityDenied { missing });
            }
        }

        let outcome = self.parser.parse(dialect, query_text)?;
        let ast = outcome.ast.ok_or_else(|| {
            outcome.errors.into_iter().next().unwrap_or_else(|| AquiferError::SyntaxError {
                message: "failed to parse query".into(),
                line:    0,
                column:  0,
            })
        })?;

        let results = self.validator.validate(&ast, ctx);
        if !ValidatorEngine::is_accepted(&results, ctx.strict) {
            return Err(rejection_error(&results));
        }

        let plan = match &ast {
            Ast::Sql(select) => LogicalPlan::from_select(select),
            Ast::Doc(query) => LogicalPlan::from_doc(query),
        };

        let query_id = self.coordinator.execute(plan, sources, params).await?;
        self.coordinator.get_results(&query_id)
    }

    /// The coordinator `execute` wires through, for callers that need
    /// the wider federation surface (`cancel`, `get_profile`,
    /// `get_bottleneck`, ...) spec §6 also documents.
    #[must_use]
    pub fn coordinator(&self) -> &FederationCoordinator {
        &self.coordinator
    }
}

/// Picks the canonical rejection (spec §7: "the first ERROR-level
/// entry is the canonical failure") and maps its category onto the
/// matching taxonomy variant.
fn rejection_error(results: &[ValidationResult]) -> AquiferError {
    let first = results
        .iter()
        .find(|r| r.level == Level::Error)
        .or_else(|| results.iter().find(|r| r.level == Level::Warning))
        .expect("rejection_error is only called when is_accepted returned false");
    match first.category {
        Category::Security => AquiferError::SecurityDenied { missing: vec![first.message.clone()] },
        other => AquiferError::ValidationError { category: format!("{other:?}").to_uppercase(), message: first.message.clone() },
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use aquifer_core::validation::{PermissionContext, SchemaContext, TableSchema};
    use aquifer_observability::{testing::FakeClock, NoopMetricsSink};

    use super::*;
    use crate::source::SourceDescriptor;

    struct StubRegistry;

    #[async_trait]
    impl SourceRegistry for StubRegistry {
        async fn list(&self) -> Vec<SourceDescriptor> {
            vec![SourceDescriptor::new("users")]
        }

        async fn dispatch(&self, source_id: &str, _sub_plan: &LogicalPlan, _params: &Value) -> Result<Vec<Value>> {
            Ok(vec![json!({"source": source_id})])
        }
    }

    fn service() -> QueryService {
        QueryService::new(Arc::new(StubRegistry), Arc::new(FakeClock::new(0)), Arc::new(NoopMetricsSink))
    }

    fn ctx_with_users_table(permissions: PermissionContext) -> ValidationContext {
        let mut schema = SchemaContext::new();
        schema.add_table("users", TableSchema::new(vec![("id", "integer"), ("name", "string")]));
        ValidationContext::new(schema, permissions)
    }

    #[tokio::test]
    async fn select_against_a_healthy_source_returns_merged_rows() {
        let service = service();
        let ctx = ctx_with_users_table(PermissionContext::all());
        let response = service
            .execute("SELECT id, name FROM users", "sql", &["users".to_string()], json!({}), &ctx)
            .await
            .unwrap();
        assert_eq!(response.rows, vec![json!({"source": "users"})]);
    }

    #[tokio::test]
    async fn seed_test_3_delete_without_permission_is_security_denied() {
        let service = service();
        let mut permissions = PermissionContext::new();
        permissions.grant("SELECT");
        permissions.grant("INSERT");
        permissions.grant("UPDATE");
        let ctx = ctx_with_users_table(permissions);
        let err = service.execute("DELETE FROM users", "sql", &["users".to_string()], json!({}), &ctx).await.unwrap_err();
        assert_eq!(err.error_code(), "SECURITY_DENIED");
    }

    #[tokio::test]
    async fn unknown_table_is_rejected_before_dispatch() {
        let service = service();
        let ctx = ctx_with_users_table(PermissionContext::all());
        let err = service.execute("SELECT a FROM ghosts", "sql", &["users".to_string()], json!({}), &ctx).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}
