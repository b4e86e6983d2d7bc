//! Centralized re-application of a plan's top-of-spine `filter` /
//! `aggregate` / `project` / `sort` / `limit` operations over the
//! unioned rows returned by every dispatched sub-plan (spec §4.5
//! "Merge": "optional top-of-plan sort/limit/aggregate re-applied
//! centrally"). Each per-source sub-plan executes only its own
//! `scan`; everything the original plan stacked above that scan is
//! replayed once, here, against the merged row set.

use std::cmp::Ordering;

use aquifer_core::ast::{Condition, Expr, Literal, Operator, OrderTerm, SortDirection};
use aquifer_core::optimizer::{Aggregate, AggregateFn, LogicalPlan, Operation};
use serde_json::Value;

/// Replays the non-scan, non-join spine of `plan` over `rows`, in the
/// operations' original bottom-up execution order.
#[must_use]
pub fn apply_spine(rows: Vec<Value>, plan: &LogicalPlan) -> Vec<Value> {
    let mut rows = rows;
    for operation in collect_spine(plan).into_iter().rev() {
        rows = apply_one(rows, operation);
    }
    rows
}

/// The chain of operations from `plan`'s root down to (not including)
/// the first `Join`/`Scan`, in root-to-leaf order.
fn collect_spine(plan: &LogicalPlan) -> Vec<&Operation> {
    let mut spine = Vec::new();
    let mut node = plan;
    loop {
        match &node.operation {
            Operation::Join { .. } | Operation::Scan { .. } => break,
            other => spine.push(other),
        }
        match node.children.first() {
            Some(child) => node = child,
            None => break,
        }
    }
    spine
}

fn apply_one(rows: Vec<Value>, operation: &Operation) -> Vec<Value> {
    match operation {
        Operation::Filter { condition } => rows.into_iter().filter(|row| eval_condition(condition, row)).collect(),
        Operation::Project { columns } => rows.iter().map(|row| project(row, columns)).collect(),
        Operation::Aggregate { aggregates } => vec![compute_aggregates(&rows, aggregates)],
        Operation::Sort { terms } => {
            let mut rows = rows;
            rows.sort_by(|a, b| compare_rows(a, b, terms));
            rows
        }
        Operation::Limit { limit, skip } => {
            let skip = skip.unwrap_or(0) as usize;
            let take = limit.map_or(usize::MAX, |n| n as usize);
            rows.into_iter().skip(skip).take(take).collect()
        }
        Operation::Join { .. } | Operation::Scan { .. } => rows,
    }
}

/// Looks a column up by its fully qualified key first (`"u.name"`),
/// falling back to the bare field name (`"name"`) — rows returned by
/// a source rarely carry the qualifier their scan's alias used.
fn column_value<'a>(row: &'a Value, name: &str) -> Option<&'a Value> {
    row.get(name).or_else(|| {
        let bare = name.rsplit('.').next().unwrap_or(name);
        row.get(bare)
    })
}

enum ScalarRef<'a> {
    Literal(&'a Literal),
    Json(&'a Value),
}

impl ScalarRef<'_> {
    fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarRef::Literal(Literal::Integer(n)) => Some(*n as f64),
            ScalarRef::Literal(Literal::Decimal(n)) => Some(*n),
            ScalarRef::Json(v) => v.as_f64(),
            ScalarRef::Literal(_) => None,
        }
    }

    fn as_str_owned(&self) -> Option<String> {
        match self {
            ScalarRef::Literal(Literal::String(s)) => Some(s.clone()),
            ScalarRef::Json(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }
}

fn expr_value<'a>(expr: &'a Expr, row: &'a Value) -> Option<ScalarRef<'a>> {
    match expr {
        Expr::Literal(lit) => Some(ScalarRef::Literal(lit)),
        Expr::Column { qualifier, name } => {
            let key = qualifier.as_ref().map_or_else(|| name.clone(), |q| format!("{q}.{name}"));
            column_value(row, &key).map(ScalarRef::Json)
        }
        Expr::Function { .. } => None,
    }
}

fn eval_condition(condition: &Condition, row: &Value) -> bool {
    match condition {
        Condition::Compare { left, op, right } => eval_compare(left, *op, right, row),
        Condition::And(l, r) => eval_condition(l, row) && eval_condition(r, row),
        Condition::Or(l, r) => eval_condition(l, row) || eval_condition(r, row),
        Condition::Not(c) => !eval_condition(c, row),
    }
}

fn eval_compare(left: &Expr, op: Operator, right: &Expr, row: &Value) -> bool {
    let (Some(left), Some(right)) = (expr_value(left, row), expr_value(right, row)) else { return false };
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return compare_numbers(a, op, b);
    }
    if let (Some(a), Some(b)) = (left.as_str_owned(), right.as_str_owned()) {
        return compare_strings(&a, op, &b);
    }
    false
}

fn compare_numbers(a: f64, op: Operator, b: f64) -> bool {
    match op {
        Operator::Eq => (a - b).abs() < f64::EPSILON,
        Operator::NotEq => (a - b).abs() >= f64::EPSILON,
        Operator::Lt => a < b,
        Operator::LtEq => a <= b,
        Operator::Gt => a > b,
        Operator::GtEq => a >= b,
        Operator::In | Operator::Like => false,
    }
}

fn compare_strings(a: &str, op: Operator, b: &str) -> bool {
    match op {
        Operator::Eq => a == b,
        Operator::NotEq => a != b,
        Operator::Lt => a < b,
        Operator::LtEq => a <= b,
        Operator::Gt => a > b,
        Operator::GtEq => a >= b,
        Operator::Like => a.contains(b),
        Operator::In => false,
    }
}

fn project(row: &Value, columns: &[String]) -> Value {
    if columns.iter().any(|c| c == "*") {
        return row.clone();
    }
    let mut out = serde_json::Map::new();
    for column in columns {
        if let Some(value) = column_value(row, column) {
            let key = column.rsplit('.').next().unwrap_or(column);
            out.insert(key.to_string(), value.clone());
        }
    }
    Value::Object(out)
}

fn compare_rows(a: &Value, b: &Value, terms: &[OrderTerm]) -> Ordering {
    for term in terms {
        let ordering = match (column_value(a, &term.column).and_then(Value::as_f64), column_value(b, &term.column).and_then(Value::as_f64)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => {
                let sa = column_value(a, &term.column).and_then(Value::as_str).unwrap_or_default();
                let sb = column_value(b, &term.column).and_then(Value::as_str).unwrap_or_default();
                sa.cmp(sb)
            }
        };
        let ordering = if term.direction == SortDirection::Desc { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compute_aggregates(rows: &[Value], aggregates: &[Aggregate]) -> Value {
    let mut out = serde_json::Map::new();
    for aggregate in aggregates {
        let values: Vec<f64> =
            rows.iter().filter_map(|row| column_value(row, &aggregate.column)).filter_map(Value::as_f64).collect();
        let result = match aggregate.function {
            AggregateFn::Sum => Value::from(values.iter().sum::<f64>()),
            AggregateFn::Avg => {
                if values.is_empty() {
                    Value::Null
                } else {
                    Value::from(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            AggregateFn::Min => values.into_iter().reduce(f64::min).map_or(Value::Null, Value::from),
            AggregateFn::Max => values.into_iter().reduce(f64::max).map_or(Value::Null, Value::from),
            AggregateFn::Count => Value::from(rows.len() as u64),
        };
        out.insert(aggregate.alias.clone(), result);
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquifer_core::optimizer::JoinCondition;
    use serde_json::json;

    fn rows() -> Vec<Value> {
        vec![json!({"amount": 10.0}), json!({"amount": 30.0}), json!({"amount": 20.0})]
    }

    #[test]
    fn filter_keeps_matching_rows() {
        let condition = Condition::Compare {
            left:  Box::new(Expr::Column { qualifier: None, name: "amount".into() }),
            op:    Operator::Gt,
            right: Box::new(Expr::Literal(Literal::Decimal(15.0))),
        };
        let plan = LogicalPlan::leaf(Operation::Filter { condition });
        let out = apply_spine(rows(), &plan);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn sort_orders_ascending_then_limit_takes_top_n() {
        let sort = LogicalPlan::leaf(Operation::Sort {
            terms: vec![OrderTerm { column: "amount".into(), direction: SortDirection::Asc }],
        });
        let plan = LogicalPlan::wrap(Operation::Limit { limit: Some(2), skip: None }, sort);
        let out = apply_spine(rows(), &plan);
        assert_eq!(out, vec![json!({"amount": 10.0}), json!({"amount": 20.0})]);
    }

    #[test]
    fn sum_and_count_aggregate_over_every_row() {
        let plan = LogicalPlan::leaf(Operation::Aggregate {
            aggregates: vec![
                Aggregate { function: AggregateFn::Sum, column: "amount".into(), alias: "total".into() },
                Aggregate { function: AggregateFn::Count, column: "amount".into(), alias: "n".into() },
            ],
        });
        let out = apply_spine(rows(), &plan);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["total"], json!(60.0));
        assert_eq!(out[0]["n"], json!(3));
    }

    #[test]
    fn join_and_scan_are_not_part_of_the_spine() {
        let join = LogicalPlan {
            operation: Operation::Join { condition: JoinCondition { left: "u.id".into(), right: "o.user_id".into(), condition_count: 1 } },
            children:  vec![
                LogicalPlan::leaf(Operation::Scan { table: "users".into(), alias: Some("u".into()), columns: vec!["*".into()] }),
                LogicalPlan::leaf(Operation::Scan { table: "orders".into(), alias: Some("o".into()), columns: vec!["*".into()] }),
            ],
        };
        let out = apply_spine(rows(), &join);
        assert_eq!(out.len(), 3);
    }
}
