//! The nine built-in validation rules from spec §4.2, in shipped
//! order. Each rule is a small, independently testable struct rather
//! than a branch in one monolithic function — per `SPEC_FULL.md` §9,
//! "validator rules become a sequence of small typed callables".

use crate::ast::{Ast, Condition, Expr, Operator, Select};
use crate::validation::{Category, Level, ValidationContext, ValidationResult};

/// A single, pure validation check. Implementations must not hold
/// state across calls and must not panic; [`super::ValidatorEngine`]
/// catches panics defensively but a well-behaved rule never needs it.
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, ast: &Ast, ctx: &ValidationContext) -> Option<ValidationResult>;
}

/// The shipped rule set, in the order spec §4.2 lists them.
pub fn default_rules() -> Vec<Box<dyn ValidationRule>> {
    vec![
        Box::new(SyntaxRule),
        Box::new(TableExistsRule),
        Box::new(ColumnExistsRule),
        Box::new(TypeCompatibilityRule),
        Box::new(ResourceLimitRule),
        Box::new(SecurityRule),
        Box::new(ComplexityRule),
        Box::new(PerformanceHeuristicsRule),
        Box::new(IndexUsageRule),
    ]
}

/// Every qualified or bare condition leaf column, paired with the
/// table it should be checked against when qualified.
fn walk_condition_columns<'a>(cond: &'a Condition, out: &mut Vec<(&'a str, &'a str)>) {
    match cond {
        Condition::Compare { left, right, .. } => {
            for expr in [left.as_ref(), right.as_ref()] {
                if let Expr::Column { qualifier: Some(q), name } = expr {
                    out.push((q.as_str(), name.as_str()));
                }
            }
        }
        Condition::And(l, r) | Condition::Or(l, r) => {
            walk_condition_columns(l, out);
            walk_condition_columns(r, out);
        }
        Condition::Not(c) => walk_condition_columns(c, out),
    }
}

fn condition_has_or(cond: &Condition) -> bool {
    match cond {
        Condition::Compare { .. } => false,
        Condition::Or(..) => true,
        Condition::And(l, r) => condition_has_or(l) || condition_has_or(r),
        Condition::Not(c) => condition_has_or(c),
    }
}

fn condition_count_in(cond: &Condition) -> usize {
    match cond {
        Condition::Compare { op: Operator::In, .. } => 1,
        Condition::Compare { .. } => 0,
        Condition::And(l, r) | Condition::Or(l, r) => condition_count_in(l) + condition_count_in(r),
        Condition::Not(c) => condition_count_in(c),
    }
}

fn condition_has_function(cond: &Condition) -> bool {
    fn expr_has_function(e: &Expr) -> bool {
        matches!(e, Expr::Function { .. })
    }
    match cond {
        Condition::Compare { left, right, .. } => expr_has_function(left) || expr_has_function(right),
        Condition::And(l, r) | Condition::Or(l, r) => condition_has_function(l) || condition_has_function(r),
        Condition::Not(c) => condition_has_function(c),
    }
}

/// Alias → real table name map for a `Select`'s `FROM`/`JOIN` list.
fn table_aliases(select: &Select) -> std::collections::HashMap<&str, &str> {
    let mut map = std::collections::HashMap::new();
    if let Some(from) = &select.from {
        map.insert(from.alias.as_deref().unwrap_or(from.name.as_str()), from.name.as_str());
        map.insert(from.name.as_str(), from.name.as_str());
        for j in &from.joins {
            map.insert(j.table.alias.as_deref().unwrap_or(j.table.name.as_str()), j.table.name.as_str());
            map.insert(j.table.name.as_str(), j.table.name.as_str());
        }
    }
    map
}

/// The DML verb a raw query opens with, read directly off its text
/// rather than a parsed AST. The grammar (spec §3) only ever produces
/// read-shaped ASTs (`SELECT`/`FIND`), so a write query like `DELETE
/// FROM users` fails at parse time before [`required_permissions`]
/// below ever sees it — the permission check for write verbs has to
/// happen here instead, ahead of parsing, so it isn't masked by a
/// `SYNTAX_ERROR` (spec §8 seed scenario 3). Ported from the
/// original's `SQLSecurityRule._extract_required_permissions`, which
/// resolves the same gap by scanning the raw query string for
/// `SELECT`/`INSERT`/`UPDATE`/`DELETE` independent of its parse.
#[must_use]
pub fn detect_dml_verb(text: &str) -> Option<&'static str> {
    let first_word = text.trim_start().split_whitespace().next()?;
    match first_word.to_ascii_uppercase().as_str() {
        "SELECT" => Some("SELECT"),
        "INSERT" => Some("INSERT"),
        "UPDATE" => Some("UPDATE"),
        "DELETE" => Some("DELETE"),
        _ => None,
    }
}

/// The permission(s) a query requires, derived from its shape, for
/// queries that did produce an AST. Write verbs the grammar can't
/// parse at all are covered separately by [`detect_dml_verb`], which
/// runs on the raw text before parsing is attempted.
fn required_permissions(ast: &Ast) -> Vec<&'static str> {
    match ast {
        Ast::Sql(select) => {
            let mut perms = vec!["SELECT"];
            if !select.group_by.is_empty() {
                perms.push("AGGREGATE");
            }
            perms
        }
        Ast::Doc(_) => vec!["LOOKUP"],
    }
}

/// Re-checks the invariants the parser is supposed to have already
/// enforced (spec §4.1: "SELECT has FROM; JOIN has ON"). Defense in
/// depth against a parser bug producing a structurally invalid AST.
struct SyntaxRule;

impl ValidationRule for SyntaxRule {
    fn name(&self) -> &'static str {
        "Syntax"
    }

    fn check(&self, ast: &Ast, _ctx: &ValidationContext) -> Option<ValidationResult> {
        if let Ast::Sql(select) = ast {
            if select.columns.is_empty() {
                return Some(ValidationResult::new(
                    Level::Error,
                    Category::Syntax,
                    "SELECT has no columns",
                    "select.columns",
                ));
            }
        }
        None
    }
}

struct TableExistsRule;

impl ValidationRule for TableExistsRule {
    fn name(&self) -> &'static str {
        "TableExists"
    }

    fn check(&self, ast: &Ast, ctx: &ValidationContext) -> Option<ValidationResult> {
        for table in ast.referenced_tables() {
            if !ctx.schema.has_table(&table) {
                return Some(
                    ValidationResult::new(
                        Level::Error,
                        Category::Semantic,
                        format!("table or collection '{table}' does not exist"),
                        table.clone(),
                    )
                    .with_suggestion("check the table/collection name for typos"),
                );
            }
        }
        None
    }
}

struct ColumnExistsRule;

impl ValidationRule for ColumnExistsRule {
    fn name(&self) -> &'static str {
        "ColumnExists"
    }

    fn check(&self, ast: &Ast, ctx: &ValidationContext) -> Option<ValidationResult> {
        match ast {
            Ast::Sql(select) => {
                let aliases = table_aliases(select);
                let mut qualified = Vec::new();
                for col in &select.columns {
                    if col.name != "*" {
                        if let Some(q) = &col.qualifier {
                            qualified.push((q.as_str(), col.name.as_str()));
                        }
                    }
                }
                if let Some(cond) = &select.r#where {
                    walk_condition_columns(cond, &mut qualified);
                }
                if let Some(cond) = &select.having {
                    walk_condition_columns(cond, &mut qualified);
                }
                if let Some(from) = &select.from {
                    for j in &from.joins {
                        walk_condition_columns(&j.on, &mut qualified);
                    }
                }
                for (qualifier, column) in qualified {
                    let Some(&table) = aliases.get(qualifier) else { continue };
                    let Some(schema) = ctx.schema.table(table) else { continue };
                    if !schema.has_column(column) {
                        return Some(ValidationResult::new(
                            Level::Error,
                            Category::Semantic,
                            format!("column '{qualifier}.{column}' does not exist"),
                            format!("{table}.{column}"),
                        ));
                    }
                }
                None
            }
            Ast::Doc(query) => {
                let Some(schema) = ctx.schema.table(&query.collection) else { return None };
                for field in &query.projection {
                    if !schema.has_column(field) {
                        return Some(ValidationResult::new(
                            Level::Error,
                            Category::Semantic,
                            format!("field '{field}' does not exist on '{}'", query.collection),
                            field.clone(),
                        ));
                    }
                }
                let mut filter: Option<&crate::ast::Filter> = query.filter.as_ref();
                while let Some(f) = filter {
                    if !schema.has_column(&f.field) {
                        return Some(ValidationResult::new(
                            Level::Error,
                            Category::Semantic,
                            format!("field '{}' does not exist on '{}'", f.field, query.collection),
                            f.field.clone(),
                        ));
                    }
                    filter = f.chain.as_ref().map(|c| &c.next);
                }
                None
            }
        }
    }
}

fn literal_type(lit: &crate::ast::Literal) -> &'static str {
    use crate::ast::Literal::*;
    match lit {
        Integer(_) => "integer",
        Decimal(_) => "number",
        String(_) => "string",
        Boolean(_) => "boolean",
        Null => "null",
    }
}

/// `integer ⊆ number`, `float ⊆ number`; everything else must match
/// exactly, per spec §4.2's type lattice.
fn types_compatible(declared: &str, literal: &str) -> bool {
    if literal == "null" {
        return true;
    }
    match declared {
        "number" => matches!(literal, "integer" | "number"),
        other => other == literal,
    }
}

struct TypeCompatibilityRule;

impl ValidationRule for TypeCompatibilityRule {
    fn name(&self) -> &'static str {
        "TypeCompatibility"
    }

    fn check(&self, ast: &Ast, ctx: &ValidationContext) -> Option<ValidationResult> {
        let Ast::Sql(select) = ast else { return None };
        let aliases = table_aliases(select);
        let cond = select.r#where.as_ref()?;
        self.check_condition(cond, &aliases, ctx)
    }
}

impl TypeCompatibilityRule {
    fn check_condition(
        &self,
        cond: &Condition,
        aliases: &std::collections::HashMap<&str, &str>,
        ctx: &ValidationContext,
    ) -> Option<ValidationResult> {
        match cond {
            Condition::Compare { left, right, .. } => {
                let (column, literal) = match (left.as_ref(), right.as_ref()) {
                    (Expr::Column { qualifier: Some(q), name }, Expr::Literal(lit)) => {
                        (Some((q.as_str(), name.as_str())), Some(lit))
                    }
                    (Expr::Literal(lit), Expr::Column { qualifier: Some(q), name }) => {
                        (Some((q.as_str(), name.as_str())), Some(lit))
                    }
                    _ => (None, None),
                };
                let (Some((qualifier, name)), Some(lit)) = (column, literal) else { return None };
                let table = *aliases.get(qualifier)?;
                let schema = ctx.schema.table(table)?;
                let declared = &schema.columns.get(name)?.ty;
                let actual = literal_type(lit);
                if !types_compatible(declared, actual) {
                    return Some(ValidationResult::new(
                        Level::Error,
                        Category::Semantic,
                        format!("'{qualifier}.{name}' is {declared} but compared against a {actual} literal"),
                        format!("{table}.{name}"),
                    ));
                }
                None
            }
            Condition::And(l, r) | Condition::Or(l, r) => {
                self.check_condition(l, aliases, ctx).or_else(|| self.check_condition(r, aliases, ctx))
            }
            Condition::Not(c) => self.check_condition(c, aliases, ctx),
        }
    }
}

struct ResourceLimitRule;

impl ValidationRule for ResourceLimitRule {
    fn name(&self) -> &'static str {
        "ResourceLimit"
    }

    fn check(&self, ast: &Ast, ctx: &ValidationContext) -> Option<ValidationResult> {
        let tables = ast.referenced_tables().len();
        let joins = match ast {
            Ast::Sql(select) => select.from.as_ref().map(|t| t.joins.len()).unwrap_or(0),
            Ast::Doc(_) => 0,
        };
        let limits = &ctx.resource_limits;
        if tables > limits.max_tables {
            return Some(ValidationResult::new(
                Level::Warning,
                Category::Resource,
                format!("query references {tables} tables, limit is {}", limits.max_tables),
                "tables",
            ));
        }
        if joins > limits.max_joins {
            return Some(ValidationResult::new(
                Level::Warning,
                Category::Resource,
                format!("query has {joins} joins, limit is {}", limits.max_joins),
                "joins",
            ));
        }
        None
    }
}

struct SecurityRule;

impl ValidationRule for SecurityRule {
    fn name(&self) -> &'static str {
        "Security"
    }

    fn check(&self, ast: &Ast, ctx: &ValidationContext) -> Option<ValidationResult> {
        let required = required_permissions(ast);
        let missing = ctx.permissions.missing(&required);
        if missing.is_empty() {
            return None;
        }
        Some(ValidationResult::new(
            Level::Error,
            Category::Security,
            format!("missing required permission(s): {}", missing.join(", ")),
            "permissions",
        ))
    }
}

struct ComplexityRule;

impl ValidationRule for ComplexityRule {
    fn name(&self) -> &'static str {
        "Complexity"
    }

    fn check(&self, ast: &Ast, ctx: &ValidationContext) -> Option<ValidationResult> {
        let Ast::Sql(select) = ast else { return None };
        let cond = select.r#where.as_ref()?;
        let depth = crate::ast::condition_depth(cond);
        let leaves = crate::ast::condition_leaf_count(cond);
        let limits = &ctx.complexity_limits;
        if depth > limits.max_depth {
            return Some(ValidationResult::new(
                Level::Warning,
                Category::Performance,
                format!("WHERE clause nesting depth {depth} exceeds {}", limits.max_depth),
                "where",
            ));
        }
        if leaves > limits.max_conditions {
            return Some(ValidationResult::new(
                Level::Warning,
                Category::Performance,
                format!("WHERE clause has {leaves} conditions, limit is {}", limits.max_conditions),
                "where",
            ));
        }
        None
    }
}

struct PerformanceHeuristicsRule;

impl ValidationRule for PerformanceHeuristicsRule {
    fn name(&self) -> &'static str {
        "PerformanceHeuristics"
    }

    fn check(&self, ast: &Ast, _ctx: &ValidationContext) -> Option<ValidationResult> {
        let Ast::Sql(select) = ast else { return None };
        if select.columns.iter().any(|c| c.name == "*") {
            return Some(
                ValidationResult::new(Level::Warning, Category::Performance, "SELECT * fetches every column", "columns")
                    .with_suggestion("list only the columns you need"),
            );
        }
        if select.distinct {
            return Some(ValidationResult::new(
                Level::Warning,
                Category::Performance,
                "DISTINCT requires a full sort or hash pass over the result set",
                "distinct",
            ));
        }
        if let Some(cond) = &select.r#where {
            if condition_count_in(cond) > 1 {
                return Some(ValidationResult::new(
                    Level::Warning,
                    Category::Performance,
                    "multiple IN predicates can expand combinatorially",
                    "where",
                ));
            }
            if condition_has_or(cond) {
                return Some(ValidationResult::new(
                    Level::Warning,
                    Category::Performance,
                    "OR in WHERE often defeats index usage",
                    "where",
                ));
            }
            if condition_has_function(cond) {
                return Some(ValidationResult::new(
                    Level::Warning,
                    Category::Performance,
                    "function calls in WHERE prevent index lookups on that column",
                    "where",
                ));
            }
        }
        None
    }
}

struct IndexUsageRule;

impl ValidationRule for IndexUsageRule {
    fn name(&self) -> &'static str {
        "IndexUsage"
    }

    fn check(&self, ast: &Ast, ctx: &ValidationContext) -> Option<ValidationResult> {
        let Ast::Sql(select) = ast else { return None };
        let aliases = table_aliases(select);

        if let Some(cond) = &select.r#where {
            if let Some(result) = self.leading_wildcard_like(cond) {
                return Some(result);
            }
            let mut columns = Vec::new();
            walk_condition_columns(cond, &mut columns);
            for (qualifier, column) in columns {
                let Some(&table) = aliases.get(qualifier) else { continue };
                if !ctx.indexes.covers(table, column) {
                    return Some(
                        ValidationResult::new(
                            Level::Warning,
                            Category::Performance,
                            format!("no index covers '{table}.{column}' used in WHERE"),
                            format!("{table}.{column}"),
                        )
                        .with_suggestion(format!("consider an index on {table}.{column}")),
                    );
                }
            }
        }
        None
    }
}

impl IndexUsageRule {
    fn leading_wildcard_like(&self, cond: &Condition) -> Option<ValidationResult> {
        match cond {
            Condition::Compare { op: Operator::Like, right, .. } => match right.as_ref() {
                Expr::Literal(crate::ast::Literal::String(s)) if s.starts_with('%') => Some(ValidationResult::new(
                    Level::Warning,
                    Category::Performance,
                    "LIKE with a leading wildcard cannot use an index",
                    "where",
                )),
                _ => None,
            },
            Condition::And(l, r) | Condition::Or(l, r) => {
                self.leading_wildcard_like(l).or_else(|| self.leading_wildcard_like(r))
            }
            Condition::Not(c) => self.leading_wildcard_like(c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParserRegistry;
    use crate::validation::{PermissionContext, SchemaContext, TableSchema};

    fn ctx() -> ValidationContext {
        let mut schema = SchemaContext::new();
        schema.add_table("users", TableSchema::new(vec![("id", "integer"), ("name", "string"), ("age", "integer")]));
        ValidationContext::new(schema, PermissionContext::all())
    }

    fn parse_sql(src: &str) -> Ast {
        ParserRegistry::with_builtin_dialects().parse("sql", src).unwrap().ast.unwrap()
    }

    #[test]
    fn table_exists_rule_flags_unknown_table() {
        let ast = parse_sql("SELECT a FROM ghosts");
        let result = TableExistsRule.check(&ast, &ctx());
        assert!(result.is_some());
        assert_eq!(result.unwrap().category, Category::Semantic);
    }

    #[test]
    fn type_compatibility_rejects_string_against_integer_column() {
        let ast = parse_sql("SELECT id FROM users WHERE age = 'old'");
        let result = TypeCompatibilityRule.check(&ast, &ctx());
        assert!(result.is_some());
    }

    #[test]
    fn performance_rule_flags_select_star() {
        let ast = parse_sql("SELECT * FROM users");
        let result = PerformanceHeuristicsRule.check(&ast, &ctx());
        assert!(result.is_some());
        assert_eq!(result.unwrap().level, Level::Warning);
    }

    #[test]
    fn detect_dml_verb_reads_the_opening_keyword() {
        assert_eq!(detect_dml_verb("DELETE FROM users"), Some("DELETE"));
        assert_eq!(detect_dml_verb("  insert into users values (1)"), Some("INSERT"));
        assert_eq!(detect_dml_verb("UPDATE users SET name = 'a'"), Some("UPDATE"));
        assert_eq!(detect_dml_verb("SELECT * FROM users"), Some("SELECT"));
        assert_eq!(detect_dml_verb("FIND IN users"), None);
        assert_eq!(detect_dml_verb(""), None);
    }

    #[test]
    fn security_rule_denies_missing_permission() {
        let ast = parse_sql("SELECT id FROM users");
        let mut c = ctx();
        c.permissions = PermissionContext::new();
        let result = SecurityRule.check(&ast, &c);
        assert!(result.is_some());
        let result = result.unwrap();
        assert_eq!(result.level, Level::Error);
        assert_eq!(result.category, Category::Security);
    }
}
