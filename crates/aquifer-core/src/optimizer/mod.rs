//! C3: logical plan and optimizer.
//!
//! `optimize(plan) -> (plan', applied[])` per spec §4.3: pure,
//! deterministic, and idempotent. Plans are built from an [`Ast`] by
//! [`LogicalPlan::from_ast`] and rewritten by a fixed, ordered list of
//! rules run to a fixed point.

mod plan;
mod rules;

pub use plan::{Aggregate, AggregateFn, JoinCondition, LogicalPlan, Operation};

use serde::{Deserialize, Serialize};

/// The name tag appended to `applied[]` each time a rewrite fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rewrite {
    PredicatePushdown,
    ProjectionPruning,
    JoinReordering,
    ConstantFolding,
    LimitPushdown,
}

impl Rewrite {
    pub const fn tag(self) -> &'static str {
        match self {
            Rewrite::PredicatePushdown => "predicate_pushdown",
            Rewrite::ProjectionPruning => "projection_pruning",
            Rewrite::JoinReordering => "join_reordering",
            Rewrite::ConstantFolding => "constant_folding",
            Rewrite::LimitPushdown => "limit_pushdown",
        }
    }
}

/// Runs the fixed-order rewrite sequence to a fixed point and returns
/// the optimized plan plus the ordered list of rewrite tags that
/// fired. Calling `optimize` again on the result is a no-op (spec §8
/// invariant 2: `optimize(optimize(p)) == optimize(p)`).
pub fn optimize(plan: LogicalPlan) -> (LogicalPlan, Vec<String>) {
    let mut plan = plan;
    let mut applied = Vec::new();

    loop {
        let mut changed = false;

        let (next, fired) = rules::predicate_pushdown(plan);
        plan = next;
        if fired {
            applied.push(Rewrite::PredicatePushdown.tag().to_string());
            changed = true;
        }

        let (next, fired) = rules::projection_pruning(plan);
        plan = next;
        if fired {
            applied.push(Rewrite::ProjectionPruning.tag().to_string());
            changed = true;
        }

        let (next, fired) = rules::join_reordering(plan);
        plan = next;
        if fired {
            applied.push(Rewrite::JoinReordering.tag().to_string());
            changed = true;
        }

        let (next, fired) = rules::constant_folding(plan);
        plan = next;
        if fired {
            applied.push(Rewrite::ConstantFolding.tag().to_string());
            changed = true;
        }

        let (next, fired) = rules::limit_pushdown(plan);
        plan = next;
        if fired {
            applied.push(Rewrite::LimitPushdown.tag().to_string());
            changed = true;
        }

        if !changed {
            break;
        }
    }

    (plan, applied)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::ast::Ast;
    use crate::parser::ParserRegistry;

    #[test]
    fn seed_test_1_pushdown_and_pruning() {
        let outcome = ParserRegistry::with_builtin_dialects()
            .parse("sql", "SELECT u.name, o.amount FROM users u JOIN orders o ON u.id = o.user_id WHERE u.age > 18")
            .unwrap();
        let Some(Ast::Sql(select)) = outcome.ast else { panic!("no ast") };
        let plan = LogicalPlan::from_select(&select);
        let (_optimized, applied) = optimize(plan);
        assert_eq!(applied, vec!["predicate_pushdown", "projection_pruning"]);
    }

    #[test]
    fn optimize_is_idempotent() {
        let outcome = ParserRegistry::with_builtin_dialects()
            .parse("sql", "SELECT u.name FROM users u JOIN orders o ON u.id = o.user_id WHERE u.age > 18 AND o.amount > 10")
            .unwrap();
        let Some(Ast::Sql(select)) = outcome.ast else { panic!("no ast") };
        let plan = LogicalPlan::from_select(&select);
        let (once, _) = optimize(plan);
        let (twice, applied_twice) = optimize(once.clone());
        assert_eq!(once, twice);
        assert!(applied_twice.is_empty(), "second optimize() appended: {applied_twice:?}");
    }

    #[test]
    fn optimize_terminates_on_a_constant_predicate() {
        let outcome = ParserRegistry::with_builtin_dialects().parse("sql", "SELECT name FROM users WHERE 1 = 1").unwrap();
        let Some(Ast::Sql(select)) = outcome.ast else { panic!("no ast") };
        let plan = LogicalPlan::from_select(&select);
        let (once, _) = optimize(plan);
        let (twice, applied_twice) = optimize(once.clone());
        assert_eq!(once, twice);
        assert!(applied_twice.is_empty(), "second optimize() appended: {applied_twice:?}");
    }

    proptest! {
        // spec.md §8 property 2: optimize(optimize(p)) == optimize(p), here
        // over generated single-predicate scan/join plans rather than the
        // fixed example above.
        #[test]
        fn optimize_is_idempotent_for_generated_predicates(column in "[a-z][a-z0-9_]{2,8}", value in 0i64..10_000) {
            let sql = format!(
                "SELECT a.x FROM a JOIN b ON a.id = b.a_id WHERE a.{column} > {value}"
            );
            let outcome = ParserRegistry::with_builtin_dialects().parse("sql", &sql).expect("registered dialect");
            let Some(Ast::Sql(select)) = outcome.ast else {
                prop_assert!(false, "unparseable generated sql: {sql}");
                unreachable!()
            };
            let plan = LogicalPlan::from_select(&select);
            let (once, _) = optimize(plan);
            let (twice, applied_twice) = optimize(once.clone());
            prop_assert_eq!(once, twice);
            prop_assert!(applied_twice.is_empty());
        }
    }
}
