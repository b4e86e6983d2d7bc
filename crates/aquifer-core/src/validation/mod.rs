//! C2: rule-based AST validator.
//!
//! `validate(ast, context) -> Results[]` per spec §4.2: an ordered
//! list of pure rules, each `(ast, context) -> Option<ValidationResult>`.
//! A rule that panics is caught by the engine and turned into an
//! `INFO` result rather than unwinding past the caller.

mod context;
mod rules;

use std::panic::{self, AssertUnwindSafe};

pub use context::{
    ColumnSchema, IndexContext, IndexProvider, IndexSchema, PermissionContext, SchemaContext, SchemaProvider,
    TableSchema,
};
pub use rules::{default_rules, detect_dml_verb, ValidationRule};

use serde::{Deserialize, Serialize};

use aquifer_error::AquiferError;

use crate::ast::Ast;
use crate::parser::ParserRegistry;

/// Severity of a single validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Error,
    Warning,
    Info,
}

/// The dimension a rule checks, per spec §4.2's rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Syntax,
    Semantic,
    Security,
    Performance,
    Resource,
}

/// A single validator finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub level:      Level,
    pub category:   Category,
    pub message:    String,
    pub context:    String,
    pub suggestion: Option<String>,
}

impl ValidationResult {
    pub fn new(level: Level, category: Category, message: impl Into<String>, context: impl Into<String>) -> Self {
        Self { level, category, message: message.into(), context: context.into(), suggestion: None }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Resource limits consulted by the `ResourceLimit` rule. Defaults
/// per spec §4.2 (`10`/`5`/`3`).
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_tables:     usize,
    pub max_joins:      usize,
    pub max_subqueries: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self { max_tables: 10, max_joins: 5, max_subqueries: 3 }
    }
}

/// Complexity thresholds consulted by the `Complexity` rule. Defaults
/// per spec §4.2 (`depth<=3`, `conditions<=10`, `unions<=2`).
#[derive(Debug, Clone, Copy)]
pub struct ComplexityLimits {
    pub max_depth:      usize,
    pub max_conditions: usize,
    pub max_unions:     usize,
}

impl Default for ComplexityLimits {
    fn default() -> Self {
        Self { max_depth: 3, max_conditions: 10, max_unions: 2 }
    }
}

/// Everything a validation rule may consult. Built once per request
/// by the caller (the excluded "auth/RBAC stack" collaborator
/// populates `permissions`; the excluded "metadata cataloging"
/// collaborator populates `schema`/`indexes` via the injected ports
/// in spec §6).
pub struct ValidationContext {
    pub schema:      SchemaContext,
    pub indexes:     IndexContext,
    pub permissions: PermissionContext,
    pub resource_limits: ResourceLimits,
    pub complexity_limits: ComplexityLimits,
    /// When true, `WARNING` findings are treated as blocking, same as
    /// `ERROR` (spec §4.2: "strict mode treats WARNING as ERROR").
    pub strict: bool,
}

impl ValidationContext {
    pub fn new(schema: SchemaContext, permissions: PermissionContext) -> Self {
        Self {
            schema,
            indexes: IndexContext::new(),
            permissions,
            resource_limits: ResourceLimits::default(),
            complexity_limits: ComplexityLimits::default(),
            strict: false,
        }
    }

    pub fn with_indexes(mut self, indexes: IndexContext) -> Self {
        self.indexes = indexes;
        self
    }
}

/// Runs an ordered list of rules over an AST and collects their
/// findings.
pub struct ValidatorEngine {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl ValidatorEngine {
    /// The shipped rule set from spec §4.2's table, in the documented
    /// order.
    pub fn with_default_rules() -> Self {
        Self { rules: default_rules() }
    }

    /// An engine with no rules, for tests that want a minimal set.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn register(&mut self, rule: Box<dyn ValidationRule>) {
        self.rules.push(rule);
    }

    /// Runs every rule, catching panics so one broken rule cannot
    /// take down the engine (spec §4.2: "Rules must never raise past
    /// the engine; internal exceptions produce an INFO result and the
    /// engine continues.").
    pub fn validate(&self, ast: &Ast, ctx: &ValidationContext) -> Vec<ValidationResult> {
        let mut results = Vec::new();
        for rule in &self.rules {
            let name = rule.name();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| rule.check(ast, ctx)));
            match outcome {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(_) => results.push(ValidationResult::new(
                    Level::Info,
                    Category::Semantic,
                    format!("validation rule '{name}' failed internally and was skipped"),
                    name.to_string(),
                )),
            }
        }
        results
    }

    /// Validates raw query `text` end-to-end: a DML verb the grammar
    /// can't parse at all (`INSERT`/`UPDATE`/`DELETE`) is checked
    /// against `ctx.permissions` before `registry` is asked to parse
    /// `text`, so a write query the caller lacks permission for comes
    /// back as a single `SECURITY_DENIED` result instead of a
    /// `SYNTAX_ERROR` that masks the real problem (spec §8 seed
    /// scenario 3). Only once that gate passes does parsing run and,
    /// on success, [`Self::validate`] as usual.
    pub fn validate_text(
        &self,
        registry: &ParserRegistry,
        dialect: &str,
        text: &str,
        ctx: &ValidationContext,
    ) -> Result<Vec<ValidationResult>, AquiferError> {
        if let Some(verb) = detect_dml_verb(text) {
            let missing = ctx.permissions.missing(&[verb]);
            if !missing.is_empty() {
                return Ok(vec![ValidationResult::new(
                    Level::Error,
                    Category::Security,
                    format!("missing required permission(s): {}", missing.join(", ")),
                    "permissions",
                )]);
            }
        }

        let outcome = registry.parse(dialect, text)?;
        match outcome.ast {
            Some(ast) => Ok(self.validate(&ast, ctx)),
            None => Err(outcome
                .errors
                .into_iter()
                .next()
                .unwrap_or_else(|| AquiferError::SyntaxError { message: "failed to parse query".into(), line: 0, column: 0 })),
        }
    }

    /// A query is accepted iff no result has `level = Error`, or, in
    /// strict mode, no result has `level >= Warning`.
    pub fn is_accepted(results: &[ValidationResult], strict: bool) -> bool {
        !results.iter().any(|r| r.level == Level::Error || (strict && r.level == Level::Warning))
    }
}

impl Default for ValidatorEngine {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{ParserRegistry};

    fn ctx_with_schema() -> ValidationContext {
        let mut schema = SchemaContext::new();
        schema.add_table(
            "users",
            TableSchema::new(vec![("id", "integer"), ("name", "string"), ("age", "integer")]),
        );
        schema.add_table(
            "orders",
            TableSchema::new(vec![("id", "integer"), ("amount", "number"), ("user_id", "integer")]),
        );
        let mut perms = PermissionContext::new();
        perms.grant("SELECT");
        ValidationContext::new(schema, perms)
    }

    #[test]
    fn happy_path_sql_has_no_errors() {
        let registry = ParserRegistry::with_builtin_dialects();
        let outcome = registry
            .parse("sql", "SELECT u.name, o.amount FROM users u JOIN orders o ON u.id = o.user_id WHERE u.age > 18")
            .unwrap();
        let ast = outcome.ast.unwrap();
        let engine = ValidatorEngine::with_default_rules();
        let results = engine.validate(&ast, &ctx_with_schema());
        assert!(ValidatorEngine::is_accepted(&results, false), "{results:?}");
    }

    #[test]
    fn security_denial_reports_error() {
        let registry = ParserRegistry::with_builtin_dialects();
        let outcome = registry.parse("sql", "SELECT a FROM users").unwrap();
        let ast = outcome.ast.unwrap();
        let mut ctx = ctx_with_schema();
        ctx.permissions = PermissionContext::new(); // no permissions granted at all
        let engine = ValidatorEngine::with_default_rules();
        let results = engine.validate(&ast, &ctx);
        assert!(results
            .iter()
            .any(|r| r.level == Level::Error && r.category == Category::Security));
    }

    #[test]
    fn seed_test_3_delete_without_permission_is_security_denied() {
        let registry = ParserRegistry::with_builtin_dialects();
        let mut ctx = ctx_with_schema();
        ctx.permissions = PermissionContext::new();
        ctx.permissions.grant("SELECT");
        ctx.permissions.grant("INSERT");
        ctx.permissions.grant("UPDATE");
        let engine = ValidatorEngine::with_default_rules();
        let results = engine.validate_text(&registry, "sql", "DELETE FROM users", &ctx).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].level, Level::Error);
        assert_eq!(results[0].category, Category::Security);
    }
}
