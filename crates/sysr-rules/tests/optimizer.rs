//! The `Optimizer` entry points end to end: pushdown, join ordering and both
//! together, checked for placement, cost and result equivalence on the seeded
//! database.

mod common;

use common::*;
use std::sync::Arc;
use sysr_core::cost::Cost;
use sysr_core::error::OptimizerError;
use sysr_core::expr::{AggExpr, AggFunc, Expr, JoinMethod, Operator, SortKey};
use sysr_core::plan::Plan;
use sysr_rules::{Optimizer, OptimizerConfig};

fn optimizer(config: OptimizerConfig) -> Optimizer {
    Optimizer::with_catalog(Arc::new(catalog()), config)
}

/// All four fixture relations joined by cross products, with every predicate in
/// one select above the joins, sorted by `did`:
///
/// ```text
/// Sort(did ASC)
///   Select(id = eid AND lead = id AND budget = sid AND did = pid AND age > 2 AND city < 2)
///     Join(Join(Join(employee, department), project), site)
/// ```
fn four_way_query() -> Plan {
    let mut plan = Plan::new();
    let e = scan(&mut plan, "employee");
    let d = scan(&mut plan, "department");
    let p = scan(&mut plan, "project");
    let s = scan(&mut plan, "site");
    let cross = JoinMethod::NestedLoops;
    let j1 = plan.join(e, d, Expr::always_true(), cross);
    let j2 = plan.join(j1, p, Expr::always_true(), cross);
    let j3 = plan.join(j2, s, Expr::always_true(), cross);
    let sel = plan.select(
        j3,
        Expr::And(vec![
            equi("id", "eid"),
            equi("lead", "id"),
            equi("budget", "sid"),
            equi("did", "pid"),
            Expr::gt(col("age"), Expr::int(2)),
            Expr::lt(col("city"), Expr::int(2)),
        ]),
    );
    let sort = plan.sort(
        sel,
        vec![SortKey {
            expr: col("did"),
            ascending: true,
        }],
    );
    plan.set_root(sort);
    plan
}

#[test]
fn test_optimize_query_end_to_end() {
    let plan = four_way_query();
    let mut opt = optimizer(OptimizerConfig::default());

    let out = opt.optimize_query(&plan).unwrap();
    let cost = opt.plan_cost(&out).unwrap();
    let original = opt.plan_cost(&plan).unwrap();
    println!("Original cost: {:.1}", original.total);
    println!("Optimized plan (cost={:.1}):\n{}", cost.total, out.explain());

    assert!(cost < original);
    assert_eq!(out.relations().len(), 4);
    assert!(out.explain().starts_with("Sort(did ASC)\n  Join["));

    // Filters sit on their scans; no select is left above a join.
    let root = out.root().unwrap();
    for id in out.preorder(root) {
        if let Operator::Select { .. } = out.op(id) {
            let child = out.children(id)[0];
            assert!(matches!(out.op(child), Operator::TableScan { .. }), "{}", out.explain());
        }
    }
    assert_equivalent(&plan, &out, &database());
}

#[test]
fn test_pick_join_order_alone_preserves_rows() {
    let mut plan = Plan::new();
    let e = scan(&mut plan, "employee");
    let d = scan(&mut plan, "department");
    let p = scan(&mut plan, "project");
    let bnl = JoinMethod::BlockNestedLoops;
    let j1 = plan.join(e, p, equi("lead", "id"), bnl);
    let j2 = plan.join(j1, d, Expr::conjoin(vec![equi("id", "eid"), equi("did", "pid")]), bnl);
    let top = plan.select(j2, Expr::lt(col("budget"), Expr::int(4)));
    plan.set_root(top);

    let mut opt = optimizer(OptimizerConfig::default());
    let out = opt.pick_join_order(&plan).unwrap();
    println!("{}", out.explain());

    assert!(opt.plan_cost(&out).unwrap() <= opt.plan_cost(&plan).unwrap());
    assert_equivalent(&plan, &out, &database());
}

#[test]
fn test_pushdown_then_join_order_matches_optimize_query() {
    let plan = four_way_query();

    let mut staged = optimizer(OptimizerConfig::default());
    let pushed = staged.pushdown_operators(&plan).unwrap();
    assert_equivalent(&plan, &pushed, &database());
    let staged = staged.pick_join_order(&pushed).unwrap();

    let direct = optimizer(OptimizerConfig::default()).optimize_query(&plan).unwrap();
    assert_eq!(staged.explain(), direct.explain());
}

#[test]
fn test_raw_cardinalities_still_produce_valid_plan() {
    let plan = four_way_query();
    let mut opt = optimizer(OptimizerConfig::default().with_estimates(false));
    let out = opt.optimize_query(&plan).unwrap();
    assert_eq!(out.relations().len(), 4);
    assert_equivalent(&plan, &out, &database());
}

#[test]
fn test_cost_cache_reused_across_calls() {
    let plan = four_way_query();
    let mut opt = optimizer(OptimizerConfig::default());

    let first = opt.optimize_query(&plan).unwrap();
    let cached = opt.cost_cache().len();
    assert!(cached > 0);

    let second = opt.optimize_query(&plan).unwrap();
    assert_eq!(opt.cost_cache().len(), cached);
    assert_eq!(first.explain(), second.explain());

    let mut uncached = optimizer(OptimizerConfig::default().with_plan_cost_cache(false));
    uncached.optimize_query(&plan).unwrap();
    assert!(uncached.cost_cache().is_empty());
}

#[test]
fn test_plan_cost_cache_exact_match() {
    let mut opt = optimizer(OptimizerConfig::default());
    let key = vec!["employee".to_string()];
    opt.add_plan_cost(key.clone(), "TableScan(employee)".into(), Cost::new(42.0));

    assert_eq!(opt.get_plan_cost(&key, "TableScan(employee)"), Some(Cost::new(42.0)));
    assert_eq!(opt.get_plan_cost(&key, "TableScan(department)"), None);
    assert_eq!(opt.get_plan_cost(&vec!["department".to_string()], "TableScan(employee)"), None);
}

#[test]
fn test_too_many_relations() {
    let plan = four_way_query();
    let mut opt = optimizer(OptimizerConfig::default().with_max_relations(3));
    assert_eq!(
        opt.optimize_query(&plan).unwrap_err(),
        OptimizerError::TooManyRelations { count: 4, max: 3 }
    );
}

#[test]
fn test_empty_plan() {
    let mut opt = optimizer(OptimizerConfig::default());
    assert_eq!(
        opt.pick_join_order(&Plan::new()).unwrap_err(),
        OptimizerError::EmptyRelationSet
    );
}

/// The first subtree whose root operator satisfies `matches`, rendered on its own.
fn subtree_under(plan: &Plan, matches: impl Fn(&Operator) -> bool) -> Option<String> {
    let root = plan.root()?;
    plan.preorder(root)
        .into_iter()
        .find(|&id| matches(plan.op(id)))
        .map(|id| plan.extract(id).explain())
}

#[test]
fn test_project_over_join_orders_as_one_leaf() {
    let mut plan = Plan::new();
    let e = scan(&mut plan, "employee");
    let d = scan(&mut plan, "department");
    let p = scan(&mut plan, "project");
    let s = scan(&mut plan, "site");
    let nl = JoinMethod::NestedLoops;
    let inner = plan.join(e, d, equi("id", "eid"), nl);
    let proj = plan.project(inner, vec![col("id"), col("did")], vec!["id".into(), "did".into()]);
    let j1 = plan.join(proj, s, Expr::always_true(), nl);
    let j2 = plan.join(j1, p, Expr::conjoin(vec![equi("lead", "id"), equi("budget", "sid")]), nl);
    plan.set_root(j2);

    let mut opt = optimizer(OptimizerConfig::default());
    let out = opt.pick_join_order(&plan).unwrap();
    println!("{}", out.explain());

    let is_project = |op: &Operator| matches!(op, Operator::Project { .. });
    assert_eq!(subtree_under(&out, is_project), subtree_under(&plan, is_project));
    assert_eq!(out.relations().len(), 4);
    assert!(opt.plan_cost(&out).unwrap() <= opt.plan_cost(&plan).unwrap());
    assert_equivalent(&plan, &out, &database());
}

#[test]
fn test_group_by_over_join_orders_as_one_leaf() {
    let mut plan = Plan::new();
    let e = scan(&mut plan, "employee");
    let d = scan(&mut plan, "department");
    let p = scan(&mut plan, "project");
    let inner = plan.join(e, d, equi("id", "eid"), JoinMethod::NestedLoops);
    let agg = plan.group_by(
        inner,
        vec![col("did")],
        vec![AggExpr {
            func: AggFunc::Count,
            arg: col("id"),
            alias: "staff".into(),
        }],
    );
    let j = plan.join(p, agg, equi("did", "pid"), JoinMethod::BlockNestedLoops);
    let top = plan.select(j, Expr::gt(col("staff"), Expr::int(1)));
    plan.set_root(top);

    let mut opt = optimizer(OptimizerConfig::default());
    let out = opt.optimize_query(&plan).unwrap();
    println!("{}", out.explain());

    let is_group_by = |op: &Operator| matches!(op, Operator::GroupBy { .. });
    let leaf = subtree_under(&out, is_group_by).unwrap();
    assert!(leaf.starts_with("GroupBy(did; Count(id) AS staff)\n  Join[nested-loops](id = eid)\n"));
    // The filter on the aggregate is applied to the group-by leaf, not moved into it.
    assert!(out.explain().contains("Select(staff > 1)\n    GroupBy(did; Count(id) AS staff)\n"));
    assert_equivalent(&plan, &out, &database());
}

#[test]
fn test_missing_statistics_surface_as_oracle_error() {
    let mut plan = Plan::new();
    let e = scan(&mut plan, "employee");
    let m = plan.scan(
        "manager",
        sysr_core::catalog::Schema::from_pairs(&[("mid", sysr_core::catalog::DataType::Int)]),
    );
    let j = plan.join(e, m, equi("id", "mid"), JoinMethod::NestedLoops);
    plan.set_root(j);

    let mut opt = optimizer(OptimizerConfig::default());
    assert!(matches!(
        opt.optimize_query(&plan),
        Err(OptimizerError::CostOracle(_))
    ));
}

#[test]
fn test_config_from_json() {
    let config: OptimizerConfig =
        serde_json::from_str(r#"{ "sampleSize": 25, "useEstimates": false }"#).unwrap();
    assert_eq!(config.sample_size, 25);
    assert!(!config.use_estimates);
    assert_eq!(config.max_relations, 15);
    assert!(config.cache_plan_costs);
}
