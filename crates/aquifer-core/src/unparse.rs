//! Renders an [`Ast`] back to dialect text.
//!
//! Grounded in the grammars [`crate::parser::sql`]/[`crate::parser::doc`]
//! accept: every string this module emits is chosen so the matching
//! dialect parser reparses it to an equal [`Ast`] (spec.md §8's
//! `parse(unparse(ast)) == ast` property). Boolean trees are
//! parenthesized defensively — an `And`/`Or` child always gets parens
//! around it — rather than reasoning about precedence case by case, so
//! the property holds for any tree the AST type can represent, not
//! just ones this crate's own parsers produce.
//!
//! Two grammar corners are out of scope: string literals containing a
//! quote character (the lexer has no escape syntax), and `Decimal`
//! values whose `f64` round-trip through text loses precision. Callers
//! that build `Ast` values by hand should avoid both.

use crate::ast::{
    Ast, Column, Condition, DocQuery, Expr, Filter, Literal, LogicalOp, Operator, OrderTerm,
    Select, SortDirection, Table,
};

/// Renders `ast` back to the dialect text that reparses to an equal
/// tree.
pub fn unparse(ast: &Ast) -> String {
    match ast {
        Ast::Sql(select) => unparse_select(select),
        Ast::Doc(query) => unparse_doc(query),
    }
}

fn unparse_select(select: &Select) -> String {
    let mut out = String::from("SELECT ");
    if select.distinct {
        out.push_str("DISTINCT ");
    }
    out.push_str(&join(&select.columns, unparse_column));
    if let Some(from) = &select.from {
        out.push_str(" FROM ");
        out.push_str(&unparse_table(from));
    }
    if let Some(cond) = &select.r#where {
        out.push_str(" WHERE ");
        out.push_str(&unparse_condition(cond));
    }
    if !select.group_by.is_empty() {
        out.push_str(" GROUP BY ");
        out.push_str(&select.group_by.join(", "));
    }
    if let Some(having) = &select.having {
        out.push_str(" HAVING ");
        out.push_str(&unparse_condition(having));
    }
    if !select.order_by.is_empty() {
        out.push_str(" ORDER BY ");
        out.push_str(&join(&select.order_by, unparse_order_term));
    }
    out
}

fn unparse_column(column: &Column) -> String {
    let mut out = qualified(&column.qualifier, &column.name);
    if let Some(alias) = &column.alias {
        out.push_str(" AS ");
        out.push_str(alias);
    }
    out
}

fn unparse_table(table: &Table) -> String {
    let mut out = table.name.clone();
    if let Some(alias) = &table.alias {
        out.push(' ');
        out.push_str(alias);
    }
    for join in &table.joins {
        out.push_str(" JOIN ");
        out.push_str(&join.table.name);
        if let Some(alias) = &join.table.alias {
            out.push(' ');
            out.push_str(alias);
        }
        out.push_str(" ON ");
        out.push_str(&unparse_condition(&join.on));
    }
    out
}

fn unparse_order_term(term: &OrderTerm) -> String {
    let dir = match term.direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    format!("{} {dir}", term.column)
}

/// Renders a boolean tree at top level (no surrounding parens).
fn unparse_condition(cond: &Condition) -> String {
    match cond {
        Condition::Compare { left, op, right } => {
            format!("{} {} {}", unparse_expr(left), unparse_operator(*op), unparse_expr(right))
        }
        Condition::And(l, r) => format!("{} AND {}", unparse_bool_operand(l), unparse_bool_operand(r)),
        Condition::Or(l, r) => format!("{} OR {}", unparse_bool_operand(l), unparse_bool_operand(r)),
        Condition::Not(inner) => {
            let rendered = match inner.as_ref() {
                Condition::And(..) | Condition::Or(..) => format!("({})", unparse_condition(inner)),
                _ => unparse_condition(inner),
            };
            format!("NOT {rendered}")
        }
    }
}

/// Renders a boolean tree as the operand of `AND`/`OR`: always
/// parenthesized when it is itself `And`/`Or`, since the grammar only
/// accepts a nested boolean combination inside parens at that position.
fn unparse_bool_operand(cond: &Condition) -> String {
    match cond {
        Condition::And(..) | Condition::Or(..) => format!("({})", unparse_condition(cond)),
        _ => unparse_condition(cond),
    }
}

fn unparse_expr(expr: &Expr) -> String {
    match expr {
        Expr::Column { qualifier, name } => qualified(qualifier, name),
        Expr::Literal(lit) => unparse_literal(lit),
        Expr::Function { name, args } => format!("{name}({})", join(args, unparse_expr)),
    }
}

fn unparse_operator(op: Operator) -> &'static str {
    match op {
        Operator::Eq => "=",
        Operator::NotEq => "!=",
        Operator::Lt => "<",
        Operator::LtEq => "<=",
        Operator::Gt => ">",
        Operator::GtEq => ">=",
        Operator::In => "IN",
        Operator::Like => "LIKE",
    }
}

fn unparse_literal(lit: &Literal) -> String {
    match lit {
        Literal::Integer(i) => i.to_string(),
        Literal::Decimal(f) => {
            let rendered = f.to_string();
            if rendered.contains('.') {
                rendered
            } else {
                format!("{rendered}.0")
            }
        }
        Literal::String(s) => format!("'{s}'"),
        Literal::Boolean(true) => "TRUE".to_string(),
        Literal::Boolean(false) => "FALSE".to_string(),
        Literal::Null => "NULL".to_string(),
    }
}

fn unparse_doc(query: &DocQuery) -> String {
    let mut out = format!("FIND IN {}", query.collection);
    if let Some(filter) = &query.filter {
        out.push_str(" WHERE ");
        out.push_str(&unparse_filter_chain(filter));
    }
    if !query.projection.is_empty() {
        out.push_str(" PROJECT ");
        out.push_str(&query.projection.join(", "));
    }
    if !query.sort.is_empty() {
        out.push_str(" SORT ");
        let terms: Vec<String> = query
            .sort
            .iter()
            .map(|(field, dir)| format!("{field} {}", if *dir < 0 { "DESC" } else { "ASC" }))
            .collect();
        out.push_str(&terms.join(", "));
    }
    if let Some(limit) = query.limit {
        out.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(skip) = query.skip {
        out.push_str(&format!(" SKIP {skip}"));
    }
    out
}

fn unparse_filter_chain(filter: &Filter) -> String {
    let mut parts = vec![unparse_single_filter(filter)];
    let mut link = filter.chain.as_deref();
    while let Some(chain) = link {
        parts.push(
            match chain.logical {
                LogicalOp::And => "AND",
                LogicalOp::Or => "OR",
            }
            .to_string(),
        );
        parts.push(unparse_single_filter(&chain.next));
        link = chain.next.chain.as_deref();
    }
    parts.join(" ")
}

fn unparse_single_filter(filter: &Filter) -> String {
    format!("{} {} {}", filter.field, unparse_operator(filter.op), unparse_literal(&filter.value))
}

fn qualified(qualifier: &Option<String>, name: &str) -> String {
    match qualifier {
        Some(q) => format!("{q}.{name}"),
        None => name.to_string(),
    }
}

fn join<T>(items: &[T], render: impl Fn(&T) -> String) -> String {
    items.iter().map(render).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::parser::{DialectParser, DocParser, SqlParser};

    fn roundtrip_sql(src: &str) {
        let out = SqlParser.parse(src);
        assert!(out.errors.is_empty(), "parse errors for {src:?}: {:?}", out.errors);
        let ast = out.ast.expect("ast");
        let text = unparse(&ast);
        let reparsed = SqlParser.parse(&text);
        assert!(reparsed.errors.is_empty(), "reparse errors for {text:?}: {:?}", reparsed.errors);
        assert_eq!(reparsed.ast.expect("ast"), ast, "round trip mismatch via {text:?}");
    }

    fn roundtrip_doc(src: &str) {
        let out = DocParser.parse(src);
        assert!(out.errors.is_empty(), "parse errors for {src:?}: {:?}", out.errors);
        let ast = out.ast.expect("ast");
        let text = unparse(&ast);
        let reparsed = DocParser.parse(&text);
        assert!(reparsed.errors.is_empty(), "reparse errors for {text:?}: {:?}", reparsed.errors);
        assert_eq!(reparsed.ast.expect("ast"), ast, "round trip mismatch via {text:?}");
    }

    #[test]
    fn sql_select_star_roundtrips() {
        roundtrip_sql("SELECT * FROM t");
    }

    #[test]
    fn sql_join_where_roundtrips() {
        roundtrip_sql(
            "SELECT u.name, o.amount FROM users u JOIN orders o ON u.id = o.user_id WHERE u.age > 18",
        );
    }

    #[test]
    fn sql_full_clause_set_roundtrips() {
        roundtrip_sql(
            "SELECT DISTINCT a.x AS y FROM a WHERE a.x = 1 AND a.y = 2 GROUP BY a.x HAVING a.x > 1 ORDER BY a.x DESC",
        );
    }

    #[test]
    fn sql_nested_or_inside_and_roundtrips() {
        roundtrip_sql("SELECT a FROM t WHERE (a = 1 OR a = 2) AND a != 3");
    }

    #[test]
    fn sql_not_wrapping_and_roundtrips() {
        roundtrip_sql("SELECT a FROM t WHERE NOT (a = 1 AND a = 2)");
    }

    #[test]
    fn sql_function_call_roundtrips() {
        roundtrip_sql("SELECT a FROM t WHERE count(a, b) > 1");
    }

    #[test]
    fn doc_full_clause_set_roundtrips() {
        roundtrip_doc(
            "FIND IN users WHERE age >= 18 AND status = 'active' PROJECT id, name, email SORT name ASC LIMIT 10 SKIP 20",
        );
    }

    #[test]
    fn doc_bare_collection_roundtrips() {
        roundtrip_doc("FIND IN users");
    }

    #[test]
    fn doc_or_chain_roundtrips() {
        roundtrip_doc("FIND IN users WHERE age < 10 OR age > 65");
    }

    proptest! {
        // spec.md §8 property 1: parse(unparse(ast)) == ast, here exercised
        // over generated single-filter FIND queries rather than a fixed
        // example set.
        #[test]
        fn doc_single_filter_roundtrips(field in "[a-z][a-z0-9_]{2,8}", value in -10_000i64..10_000) {
            roundtrip_doc(&format!("FIND IN items WHERE {field} = {value}"));
        }

        #[test]
        fn doc_sorted_limited_roundtrips(
            field in "[a-z][a-z0-9_]{2,8}",
            limit in 0u64..10_000,
            skip in 0u64..10_000,
        ) {
            roundtrip_doc(&format!("FIND IN items SORT {field} DESC LIMIT {limit} SKIP {skip}"));
        }

        #[test]
        fn sql_comparison_roundtrips(column in "[a-z][a-z0-9_]{2,8}", value in -10_000i64..10_000) {
            roundtrip_sql(&format!("SELECT a FROM t WHERE a.{column} > {value}"));
        }
    }
}
