//! Logical plan tree built from a parsed [`Ast`].
//!
//! Mirrors spec §3's plan node shape: `operation` tag plus
//! `children[]` plus operator-specific fields. Building the initial,
//! unoptimized plan is a direct structural translation from the AST;
//! all rewriting happens afterward in [`super::rules`].

use serde::{Deserialize, Serialize};

use crate::ast::{Condition, DocQuery, Expr, Filter, FilterChain, Literal, LogicalOp, OrderTerm, Select, SortDirection};

/// Supported aggregate functions (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFn {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

/// One `function(column) AS alias` aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub function: AggregateFn,
    pub column:   String,
    pub alias:    String,
}

/// The qualified left/right sides of a join's `ON` equality, plus how
/// many leaf comparisons the original condition had (used by join
/// reordering's selectivity estimate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left:            String,
    pub right:           String,
    pub condition_count: usize,
}

/// A single plan node's operation and its operator-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Scan { table: String, alias: Option<String>, columns: Vec<String> },
    Filter { condition: Condition },
    Project { columns: Vec<String> },
    Join { condition: JoinCondition },
    Aggregate { aggregates: Vec<Aggregate> },
    Sort { terms: Vec<OrderTerm> },
    Limit { limit: Option<u64>, skip: Option<u64> },
}

/// A node in the logical plan tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalPlan {
    pub operation: Operation,
    pub children:  Vec<LogicalPlan>,
}

impl Operation {
    /// The name this scan's rows are addressed by elsewhere in the
    /// plan (its alias if the query gave one, else its table name).
    /// `None` for every non-scan operation.
    pub fn scan_source_key(&self) -> Option<&str> {
        match self {
            Operation::Scan { table, alias, .. } => Some(alias.as_deref().unwrap_or(table)),
            _ => None,
        }
    }
}

impl LogicalPlan {
    pub fn leaf(operation: Operation) -> Self {
        Self { operation, children: Vec::new() }
    }

    pub fn wrap(operation: Operation, child: LogicalPlan) -> Self {
        Self { operation, children: vec![child] }
    }

    /// Builds the unoptimized plan for a SQL `Select`. Table order
    /// follows `FROM`/`JOIN` order; every scan initially projects all
    /// columns, narrowed later by projection pruning.
    pub fn from_select(select: &Select) -> LogicalPlan {
        let mut plan = match &select.from {
            Some(table) => {
                let mut node = LogicalPlan::leaf(Operation::Scan {
                    table:   table.name.clone(),
                    alias:   table.alias.clone(),
                    columns: vec!["*".into()],
                });
                for join in &table.joins {
                    let scan = LogicalPlan::leaf(Operation::Scan {
                        table:   join.table.name.clone(),
                        alias:   join.table.alias.clone(),
                        columns: vec!["*".into()],
                    });
                    node = LogicalPlan {
                        operation: Operation::Join { condition: extract_join_condition(&join.on) },
                        children:  vec![node, scan],
                    };
                }
                node
            }
            None => LogicalPlan::leaf(Operation::Scan { table: String::new(), alias: None, columns: vec!["*".into()] }),
        };

        if let Some(cond) = &select.r#where {
            plan = LogicalPlan::wrap(Operation::Filter { condition: cond.clone() }, plan);
        }

        if !select.group_by.is_empty() {
            plan = LogicalPlan::wrap(Operation::Aggregate { aggregates: extract_aggregates(select) }, plan);
        }

        if let Some(cond) = &select.having {
            plan = LogicalPlan::wrap(Operation::Filter { condition: cond.clone() }, plan);
        }

        let columns = select.columns.iter().map(display_column).collect();
        plan = LogicalPlan::wrap(Operation::Project { columns }, plan);

        if !select.order_by.is_empty() {
            plan = LogicalPlan::wrap(Operation::Sort { terms: select.order_by.clone() }, plan);
        }

        plan
    }

    /// Builds the unoptimized plan for a document-dialect query.
    /// `Filter` chains translate into the same [`Condition`] tree the
    /// SQL side uses, so every rewrite rule handles both dialects
    /// uniformly.
    pub fn from_doc(query: &DocQuery) -> LogicalPlan {
        let mut plan =
            LogicalPlan::leaf(Operation::Scan { table: query.collection.clone(), alias: None, columns: vec!["*".into()] });

        if let Some(filter) = &query.filter {
            plan = LogicalPlan::wrap(Operation::Filter { condition: filter_to_condition(filter) }, plan);
        }

        if !query.projection.is_empty() {
            plan = LogicalPlan::wrap(Operation::Project { columns: query.projection.clone() }, plan);
        }

        if !query.sort.is_empty() {
            let terms = query
                .sort
                .iter()
                .map(|(col, dir)| OrderTerm {
                    column:    col.clone(),
                    direction: if *dir < 0 { SortDirection::Desc } else { SortDirection::Asc },
                })
                .collect();
            plan = LogicalPlan::wrap(Operation::Sort { terms }, plan);
        }

        if query.limit.is_some() || query.skip.is_some() {
            plan = LogicalPlan::wrap(Operation::Limit { limit: query.limit, skip: query.skip }, plan);
        }

        plan
    }
}

fn display_column(col: &crate::ast::Column) -> String {
    match &col.qualifier {
        Some(q) => format!("{q}.{}", col.name),
        None => col.name.clone(),
    }
}

fn extract_aggregates(select: &Select) -> Vec<Aggregate> {
    select
        .columns
        .iter()
        .filter_map(|c| {
            // Function-call aggregates are only representable via the
            // expression grammar inside WHERE/HAVING today; a plain
            // `SELECT` column list carries no `Expr::Function`. Group
            // keys themselves never become aggregates.
            let _ = c;
            None
        })
        .collect()
}

/// Converts a simple equality `ON`/`WHERE` condition into a
/// `{left, right}` pair, defaulting to the qualified names of the
/// first two columns found when the condition is not a single
/// top-level equality.
fn extract_join_condition(cond: &Condition) -> JoinCondition {
    let condition_count = crate::ast::condition_leaf_count(cond).max(1);
    if let Condition::Compare { left, right, .. } = cond {
        if let (Some(l), Some(r)) = (left.qualified_name(), right.qualified_name()) {
            return JoinCondition { left: l, right: r, condition_count };
        }
    }
    let mut columns = Vec::new();
    crate::ast::columns_in_condition(cond, &mut columns);
    JoinCondition {
        left:  columns.first().cloned().unwrap_or_default(),
        right: columns.get(1).cloned().unwrap_or_default(),
        condition_count,
    }
}

fn filter_to_condition(filter: &Filter) -> Condition {
    let base = Condition::Compare {
        left:  Box::new(Expr::Column { qualifier: None, name: filter.field.clone() }),
        op:    filter.op,
        right: Box::new(Expr::Literal(filter.value.clone())),
    };
    match &filter.chain {
        Some(chain) => combine(base, chain),
        None => base,
    }
}

fn combine(left: Condition, chain: &FilterChain) -> Condition {
    let right = filter_to_condition(&chain.next);
    match chain.logical {
        LogicalOp::And => Condition::And(Box::new(left), Box::new(right)),
        LogicalOp::Or => Condition::Or(Box::new(left), Box::new(right)),
    }
}

#[allow(dead_code)]
fn literal_is_null(lit: &Literal) -> bool {
    matches!(lit, Literal::Null)
}
