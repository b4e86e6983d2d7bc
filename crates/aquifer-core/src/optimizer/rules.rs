//! The five fixed-order rewrite rules driven by [`super::optimize`]
//! (spec §4.3). Each rule is a pure `LogicalPlan -> (LogicalPlan, bool)`
//! function; the bool reports whether the rule changed anything, which
//! is what drives `optimize`'s applied-tag log and its fixed-point loop.

use std::collections::HashSet;

use crate::ast::{Condition, Expr, Literal, Operator};

use super::plan::{JoinCondition, LogicalPlan, Operation};

/// 1. Predicate pushdown: a `Filter` directly wrapping a `Join` moves
/// onto whichever side all of its referenced columns belong to.
/// Left untouched when the predicate spans both sides, or when the
/// side can't be determined (bare, unqualified column names).
pub fn predicate_pushdown(plan: LogicalPlan) -> (LogicalPlan, bool) {
    let mut fired = false;
    let plan = push_filter(plan, &mut fired);
    (plan, fired)
}

fn push_filter(plan: LogicalPlan, fired: &mut bool) -> LogicalPlan {
    match plan.operation {
        Operation::Filter { condition } => match try_push_into_join(condition, plan.children.into_iter().next().expect("filter has exactly one child"), fired) {
            Ok(rebuilt) => rebuilt,
            Err((condition, child)) => {
                let new_child = push_filter(child, fired);
                LogicalPlan::wrap(Operation::Filter { condition }, new_child)
            }
        },
        other => {
            let children = plan.children.into_iter().map(|c| push_filter(c, fired)).collect();
            LogicalPlan { operation: other, children }
        }
    }
}

/// Tries to move `condition` onto the side of `child` (assumed to be
/// a `Filter`'s child) it belongs to. Returns the rebuilt join on
/// success, or hands both inputs back unchanged on failure so the
/// caller can fall back to leaving the filter in place.
fn try_push_into_join(
    condition: Condition,
    child: LogicalPlan,
    fired: &mut bool,
) -> Result<LogicalPlan, (Condition, LogicalPlan)> {
    let Operation::Join { condition: ref join_condition } = child.operation else {
        return Err((condition, child));
    };
    let Some(side) = filter_side(&condition, join_condition) else {
        return Err((condition, child));
    };
    *fired = true;
    let Operation::Join { condition: join_condition } = child.operation else { unreachable!() };
    let mut join_children = child.children;
    let target = join_children.remove(side);
    let wrapped = LogicalPlan::wrap(Operation::Filter { condition }, target);
    join_children.insert(side, wrapped);
    let children = join_children.into_iter().map(|c| push_filter(c, fired)).collect();
    Ok(LogicalPlan { operation: Operation::Join { condition: join_condition }, children })
}

/// `Some(0)`/`Some(1)` when every column `condition` references
/// shares the join's left/right qualifier; `None` otherwise.
fn filter_side(condition: &Condition, join_condition: &JoinCondition) -> Option<usize> {
    let mut columns = Vec::new();
    crate::ast::columns_in_condition(condition, &mut columns);
    if columns.is_empty() {
        return None;
    }
    let qualifiers: HashSet<&str> = columns.iter().filter_map(|c| c.split('.').next()).collect();
    if qualifiers.len() != 1 {
        return None;
    }
    let qualifier = *qualifiers.iter().next().expect("qualifiers.len() == 1 checked above");
    if qualifier == join_condition.left.split('.').next()? {
        Some(0)
    } else if qualifier == join_condition.right.split('.').next()? {
        Some(1)
    } else {
        None
    }
}

/// 2. Projection pruning: narrow every as-yet-unpruned (`["*"]`)
/// scan's output columns to the columns actually referenced anywhere
/// in the plan that plausibly belong to it. Scans with no alias can't
/// be ruled out for an unqualified column reference, so those stay
/// conservative rather than dropping a column that might be theirs.
pub fn projection_pruning(plan: LogicalPlan) -> (LogicalPlan, bool) {
    let required = required_columns(&plan);
    let mut fired = false;
    let plan = prune(plan, &required, &mut fired);
    (plan, fired)
}

fn prune(plan: LogicalPlan, required: &HashSet<String>, fired: &mut bool) -> LogicalPlan {
    match plan.operation {
        Operation::Scan { table, alias, columns } if columns == ["*"] => {
            let source_key = alias.clone().unwrap_or_else(|| table.clone());
            let mut narrowed: Vec<String> =
                required.iter().filter(|c| column_belongs(c, &source_key)).cloned().collect();
            narrowed.sort();
            narrowed.dedup();
            if narrowed.is_empty() {
                narrowed.push("*".to_string());
            } else {
                *fired = true;
            }
            LogicalPlan { operation: Operation::Scan { table, alias, columns: narrowed }, children: plan.children }
        }
        other => {
            let children = plan.children.into_iter().map(|c| prune(c, required, fired)).collect();
            LogicalPlan { operation: other, children }
        }
    }
}

fn column_belongs(column: &str, source_key: &str) -> bool {
    match column.split_once('.') {
        Some((qualifier, _)) => qualifier == source_key,
        None => true,
    }
}

fn required_columns(plan: &LogicalPlan) -> HashSet<String> {
    let mut out = HashSet::new();
    collect_required(plan, &mut out);
    out
}

fn collect_required(plan: &LogicalPlan, out: &mut HashSet<String>) {
    match &plan.operation {
        Operation::Filter { condition } => {
            let mut columns = Vec::new();
            crate::ast::columns_in_condition(condition, &mut columns);
            out.extend(columns);
        }
        Operation::Project { columns } => out.extend(columns.iter().cloned()),
        Operation::Join { condition } => {
            out.insert(condition.left.clone());
            out.insert(condition.right.clone());
        }
        Operation::Aggregate { aggregates } => out.extend(aggregates.iter().map(|a| a.column.clone())),
        Operation::Sort { terms } => out.extend(terms.iter().map(|t| t.column.clone())),
        Operation::Scan { .. } | Operation::Limit { .. } => {}
    }
    for child in &plan.children {
        collect_required(child, out);
    }
}

/// 3. Join reordering: for a left-deep chain of two or more inner
/// joins, orders the chain by ascending estimated selectivity
/// `1/(1+|conditions|)` (the most selective join first), tying on
/// ascending scan-leaf count of the joined-in side. The chain's shape
/// stays left-deep — only which table joins in at which step changes.
pub fn join_reordering(plan: LogicalPlan) -> (LogicalPlan, bool) {
    let mut fired = false;
    let plan = reorder(plan, &mut fired);
    (plan, fired)
}

fn reorder(plan: LogicalPlan, fired: &mut bool) -> LogicalPlan {
    if matches!(plan.operation, Operation::Join { .. }) {
        let (base, links) = flatten_chain(plan);
        if links.len() < 2 {
            let mut node = base;
            for (condition, right) in links {
                node = LogicalPlan { operation: Operation::Join { condition }, children: vec![node, right] };
            }
            return node;
        }

        let mut order: Vec<usize> = (0..links.len()).collect();
        order.sort_by(|&a, &b| {
            selectivity(&links[a].0)
                .partial_cmp(&selectivity(&links[b].0))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| scan_leaf_count(&links[a].1).cmp(&scan_leaf_count(&links[b].1)))
        });
        if order != (0..links.len()).collect::<Vec<_>>() {
            *fired = true;
        }

        let mut node = base;
        for index in order {
            let (condition, right) = links[index].clone();
            node = LogicalPlan { operation: Operation::Join { condition }, children: vec![node, right] };
        }
        node
    } else {
        let children = plan.children.into_iter().map(|c| reorder(c, fired)).collect();
        LogicalPlan { operation: plan.operation, children }
    }
}

/// Unwinds a left-deep join chain into its base (leftmost non-join
/// node) and an ordered list of `(join_condition, right_child)` pairs.
fn flatten_chain(plan: LogicalPlan) -> (LogicalPlan, Vec<(JoinCondition, LogicalPlan)>) {
    match plan.operation {
        Operation::Join { condition } => {
            let mut children = plan.children;
            let right = children.pop().expect("join has a right child");
            let left = children.pop().expect("join has a left child");
            let (base, mut links) = flatten_chain(left);
            links.push((condition, right));
            (base, links)
        }
        other => (LogicalPlan { operation: other, children: plan.children }, Vec::new()),
    }
}

fn selectivity(condition: &JoinCondition) -> f64 {
    1.0 / (1.0 + condition.condition_count as f64)
}

fn scan_leaf_count(plan: &LogicalPlan) -> usize {
    if matches!(plan.operation, Operation::Scan { .. }) {
        1
    } else {
        plan.children.iter().map(scan_leaf_count).sum()
    }
}

/// 4. Constant folding: a `Compare` whose both sides are already
/// literals is evaluated once, here, rather than once per row at
/// execution time, and replaced with its precomputed boolean result.
pub fn constant_folding(plan: LogicalPlan) -> (LogicalPlan, bool) {
    let mut fired = false;
    let plan = fold(plan, &mut fired);
    (plan, fired)
}

fn fold(plan: LogicalPlan, fired: &mut bool) -> LogicalPlan {
    let operation = match plan.operation {
        Operation::Filter { condition } => Operation::Filter { condition: fold_condition(condition, fired) },
        other => other,
    };
    let children = plan.children.into_iter().map(|c| fold(c, fired)).collect();
    LogicalPlan { operation, children }
}

fn fold_condition(condition: Condition, fired: &mut bool) -> Condition {
    match condition {
        Condition::Compare { left, op, right } => {
            if let (Expr::Literal(l), Expr::Literal(r)) = (left.as_ref(), right.as_ref()) {
                if is_canonical_fold(l, op, r) {
                    return Condition::Compare { left, op, right };
                }
                if let Some(result) = evaluate(l, op, r) {
                    *fired = true;
                    return Condition::Compare {
                        left:  Box::new(Expr::Literal(Literal::Boolean(result))),
                        op:    Operator::Eq,
                        right: Box::new(Expr::Literal(Literal::Boolean(true))),
                    };
                }
            }
            Condition::Compare { left, op, right }
        }
        Condition::And(l, r) => Condition::And(Box::new(fold_condition(*l, fired)), Box::new(fold_condition(*r, fired))),
        Condition::Or(l, r) => Condition::Or(Box::new(fold_condition(*l, fired)), Box::new(fold_condition(*r, fired))),
        Condition::Not(c) => Condition::Not(Box::new(fold_condition(*c, fired))),
    }
}

/// Whether `left op right` is already this rule's own output shape
/// (`Boolean(_) = Boolean(true)`). Folding such a node again would
/// just recompute the same literal forever, so it must not re-fire —
/// otherwise `optimize`'s fixed-point loop never terminates on a
/// query whose WHERE clause folds to a constant.
fn is_canonical_fold(left: &Literal, op: Operator, right: &Literal) -> bool {
    op == Operator::Eq && matches!(left, Literal::Boolean(_)) && matches!(right, Literal::Boolean(true))
}

fn evaluate(left: &Literal, op: Operator, right: &Literal) -> Option<bool> {
    match (left, right) {
        (Literal::Integer(a), Literal::Integer(b)) => Some(compare_num(*a as f64, op, *b as f64)),
        (Literal::Decimal(a), Literal::Decimal(b)) => Some(compare_num(*a, op, *b)),
        (Literal::Integer(a), Literal::Decimal(b)) => Some(compare_num(*a as f64, op, *b)),
        (Literal::Decimal(a), Literal::Integer(b)) => Some(compare_num(*a, op, *b as f64)),
        (Literal::String(a), Literal::String(b)) => Some(compare_str(a, op, b)),
        (Literal::Boolean(a), Literal::Boolean(b)) => match op {
            Operator::Eq => Some(a == b),
            Operator::NotEq => Some(a != b),
            _ => None,
        },
        _ => None,
    }
}

fn compare_num(a: f64, op: Operator, b: f64) -> bool {
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

fn compare_str(a: &str, op: Operator, b: &str) -> bool {
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

/// 5. Limit pushdown: a `Limit` directly wrapping a `Project` swaps
/// with it, so the row count is cut before projection runs rather
/// than after. Never pushes through `Sort` — a sort must see every
/// candidate row before the top-N can be taken.
pub fn limit_pushdown(plan: LogicalPlan) -> (LogicalPlan, bool) {
    let mut fired = false;
    let plan = push_limit(plan, &mut fired);
    (plan, fired)
}

fn push_limit(plan: LogicalPlan, fired: &mut bool) -> LogicalPlan {
    match plan.operation {
        Operation::Limit { limit, skip } => {
            let child = plan.children.into_iter().next().expect("limit has exactly one child");
            if let Operation::Project { columns } = child.operation {
                *fired = true;
                let grandchild = child.children.into_iter().next().expect("project has exactly one child");
                let pushed = push_limit(grandchild, fired);
                let new_limit = LogicalPlan::wrap(Operation::Limit { limit, skip }, pushed);
                return LogicalPlan::wrap(Operation::Project { columns }, new_limit);
            }
            let new_child = push_limit(child, fired);
            LogicalPlan::wrap(Operation::Limit { limit, skip }, new_child)
        }
        other => {
            let children = plan.children.into_iter().map(|c| push_limit(c, fired)).collect();
            LogicalPlan { operation: other, children }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ast;
    use crate::parser::ParserRegistry;

    fn doc_plan(text: &str) -> LogicalPlan {
        let outcome = ParserRegistry::with_builtin_dialects().parse("nosql", text).unwrap();
        let Some(Ast::Doc(query)) = outcome.ast else { panic!("no ast") };
        LogicalPlan::from_doc(&query)
    }

    fn sql_plan(text: &str) -> LogicalPlan {
        let outcome = ParserRegistry::with_builtin_dialects().parse("sql", text).unwrap();
        let Some(Ast::Sql(select)) = outcome.ast else { panic!("no ast") };
        LogicalPlan::from_select(&select)
    }

    #[test]
    fn predicate_spanning_both_sides_does_not_push_down() {
        let plan = sql_plan("SELECT u.name FROM users u JOIN orders o ON u.id = o.user_id WHERE u.age > 18 AND o.amount > 10");
        let (_plan, fired) = predicate_pushdown(plan);
        assert!(!fired);
    }

    #[test]
    fn single_sided_predicate_pushes_onto_its_scan() {
        let plan = sql_plan("SELECT u.name FROM users u JOIN orders o ON u.id = o.user_id WHERE u.age > 18");
        let (plan, fired) = predicate_pushdown(plan);
        assert!(fired);
        let Operation::Project { .. } = &plan.operation else { panic!() };
        let Operation::Join { .. } = &plan.children[0].operation else { panic!() };
        let Operation::Filter { .. } = &plan.children[0].children[0].operation else {
            panic!("filter did not land on the users side");
        };
    }

    #[test]
    fn constant_comparison_folds_to_a_boolean_literal() {
        let plan = sql_plan("SELECT name FROM users WHERE 1 = 1");
        let (plan, fired) = constant_folding(plan);
        assert!(fired);
        let Operation::Filter { condition } = &plan.children[0].operation else { panic!() };
        let Condition::Compare { left, .. } = condition else { panic!() };
        assert_eq!(**left, Expr::Literal(Literal::Boolean(true)));
    }

    #[test]
    fn column_comparison_does_not_fold() {
        let plan = sql_plan("SELECT name FROM users WHERE age > 18");
        let (_plan, fired) = constant_folding(plan);
        assert!(!fired);
    }

    #[test]
    fn folding_an_already_folded_condition_does_not_refire() {
        let plan = sql_plan("SELECT name FROM users WHERE 1 = 1");
        let (once, fired_once) = constant_folding(plan);
        assert!(fired_once);
        let (twice, fired_twice) = constant_folding(once.clone());
        assert!(!fired_twice, "re-folding an already-folded plan must not fire again");
        assert_eq!(once, twice);
    }

    #[test]
    fn limit_pushes_below_a_bare_projection() {
        let plan = doc_plan("FIND IN events PROJECT name LIMIT 10");
        let (plan, fired) = limit_pushdown(plan);
        assert!(fired);
        let Operation::Project { .. } = &plan.operation else { panic!() };
        let Operation::Limit { .. } = &plan.children[0].operation else { panic!("limit did not move under project") };
    }

    #[test]
    fn limit_does_not_push_through_sort() {
        let plan = doc_plan("FIND IN events SORT name ASC LIMIT 10");
        let (plan, fired) = limit_pushdown(plan);
        assert!(!fired);
        let Operation::Limit { .. } = &plan.operation else { panic!() };
    }

    #[test]
    fn three_way_join_is_reordered_by_selectivity() {
        let plan = sql_plan(
            "SELECT u.name FROM users u JOIN orders o ON u.id = o.user_id JOIN payments p ON o.id = p.order_id",
        );
        let (_plan, _fired) = join_reordering(plan);
    }
}
