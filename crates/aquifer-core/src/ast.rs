//! AST node types for both dialects.
//!
//! A single tagged-variant enum per dialect, per `SPEC_FULL.md` §9:
//! visitor/inheritance chains collapse into one node type with free
//! dispatch functions rather than a class hierarchy.

use serde::{Deserialize, Serialize};

/// Comparison/membership operator shared by both dialects' `WHERE`
/// clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    Like,
}

/// A literal value appearing in a condition or filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Integer(i64),
    Decimal(f64),
    String(String),
    Boolean(bool),
    Null,
}

/// A boolean-condition tree node shared by `WHERE`/`ON`/`HAVING`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// `left OP right`, e.g. `u.age > 18`.
    Compare { left: Box<Expr>, op: Operator, right: Box<Expr> },
    /// `left AND right`.
    And(Box<Condition>, Box<Condition>),
    /// `left OR right`.
    Or(Box<Condition>, Box<Condition>),
    /// `NOT cond`.
    Not(Box<Condition>),
}

/// A scalar expression: column reference, literal, or function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Column { qualifier: Option<String>, name: String },
    Literal(Literal),
    Function { name: String, args: Vec<Expr> },
}

impl Expr {
    /// Returns the qualified column name (`table.col`) if this is a
    /// column reference.
    pub fn qualified_name(&self) -> Option<String> {
        match self {
            Expr::Column { qualifier: Some(q), name } => Some(format!("{q}.{name}")),
            Expr::Column { qualifier: None, name } => Some(name.clone()),
            _ => None,
        }
    }
}

/// A projected column in a `SELECT` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub qualifier: Option<String>,
    pub name:      String,
    pub alias:     Option<String>,
}

/// `INNER JOIN` only, per spec.md §3 (`kind∈{INNER}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
}

/// A single `JOIN table ON condition` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub table: Table,
    pub on:    Condition,
    pub kind:  JoinKind,
}

/// A table reference with optional alias and trailing joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name:  String,
    pub alias: Option<String>,
    pub joins: Vec<Join>,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A single `ORDER BY` term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTerm {
    pub column:    String,
    pub direction: SortDirection,
}

/// SQL dialect AST root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Select {
    pub columns:   Vec<Column>,
    pub distinct:  bool,
    pub from:      Option<Table>,
    pub r#where:   Option<Condition>,
    pub group_by:  Vec<String>,
    pub having:    Option<Condition>,
    pub order_by:  Vec<OrderTerm>,
}

/// Logical link joining two filters in a document-dialect filter
/// chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

/// A single `field op value` filter, optionally chained to the next
/// filter via a logical link. Mirrors the linked-list shape of the
/// original `FilterNode` (`examples/original_source/datapunk/.../query/parser/nosql.py`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field:    String,
    pub op:       Operator,
    pub value:    Literal,
    pub chain:    Option<Box<FilterChain>>,
}

/// The logical link and next filter in a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterChain {
    pub logical: LogicalOp,
    pub next:    Filter,
}

/// Document dialect AST root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocQuery {
    pub collection:  String,
    pub filter:      Option<Filter>,
    pub projection:  Vec<String>,
    pub sort:        Vec<(String, i8)>,
    pub limit:       Option<u64>,
    pub skip:        Option<u64>,
}

/// The AST produced by [`crate::parser::Parser::parse`]: one of the
/// two dialect roots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Ast {
    Sql(Select),
    Doc(DocQuery),
}

/// Visitor-style dispatch over an [`Ast`]. Implementations receive a
/// single call regardless of dialect; free functions in
/// [`crate::ast`] walk the structure further as needed.
pub trait AstVisitor {
    type Output;
    fn visit_sql(&mut self, select: &Select) -> Self::Output;
    fn visit_doc(&mut self, query: &DocQuery) -> Self::Output;
}

impl Ast {
    /// Dispatches to the appropriate visitor method.
    pub fn accept<V: AstVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Ast::Sql(s) => visitor.visit_sql(s),
            Ast::Doc(d) => visitor.visit_doc(d),
        }
    }

    /// Every table/collection name the query references, in
    /// traversal order including joined tables.
    pub fn referenced_tables(&self) -> Vec<String> {
        match self {
            Ast::Sql(select) => {
                let mut names = Vec::new();
                if let Some(from) = &select.from {
                    names.push(from.name.clone());
                    for j in &from.joins {
                        names.push(j.table.name.clone());
                    }
                }
                names
            }
            Ast::Doc(q) => vec![q.collection.clone()],
        }
    }
}

/// Collects every column reference appearing anywhere in a
/// [`Condition`] tree (`WHERE`/`ON`/`HAVING`).
pub fn columns_in_condition(cond: &Condition, out: &mut Vec<String>) {
    match cond {
        Condition::Compare { left, right, .. } => {
            if let Some(name) = left.qualified_name() {
                out.push(name);
            }
            if let Some(name) = right.qualified_name() {
                out.push(name);
            }
        }
        Condition::And(l, r) | Condition::Or(l, r) => {
            columns_in_condition(l, out);
            columns_in_condition(r, out);
        }
        Condition::Not(c) => columns_in_condition(c, out),
    }
}

/// Counts the number of `AND`/`OR`/`NOT` boolean conjunctions in a
/// condition tree — used by the Complexity validation rule.
pub fn condition_depth(cond: &Condition) -> usize {
    match cond {
        Condition::Compare { .. } => 0,
        Condition::And(l, r) | Condition::Or(l, r) => 1 + condition_depth(l).max(condition_depth(r)),
        Condition::Not(c) => 1 + condition_depth(c),
    }
}

/// Counts leaf comparisons in a condition tree.
pub fn condition_leaf_count(cond: &Condition) -> usize {
    match cond {
        Condition::Compare { .. } => 1,
        Condition::And(l, r) | Condition::Or(l, r) => condition_leaf_count(l) + condition_leaf_count(r),
        Condition::Not(c) => condition_leaf_count(c),
    }
}
