//! Shared fixtures for the optimizer pass tests: a small catalog, seeded table
//! contents and a row-at-a-time evaluator used to check that a rewritten plan
//! returns the same bag of rows as the plan it came from.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use sysr_core::catalog::{DataType, InMemoryCatalog, Schema};
use sysr_core::expr::{AggFunc, BinaryOp, Expr, Operator, ScalarValue, UnaryOp};
use sysr_core::plan::{NodeId, Plan};
use sysr_core::stats::{ColumnStatistics, Statistics};

/// A row keyed by attribute name. Attribute names are unique across the
/// relations of one plan, so joined rows can simply merge their maps.
pub type Row = BTreeMap<String, i64>;

/// Contents of every base relation.
pub type Database = HashMap<String, Vec<Row>>;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// `(relation, [(attribute, ndv)], rows)`
pub const TABLES: &[(&str, &[(&str, i64)], usize)] = &[
    ("employee", &[("id", 40), ("age", 8)], 40),
    ("department", &[("did", 6), ("eid", 40)], 12),
    ("project", &[("pid", 10), ("lead", 40), ("budget", 5)], 10),
    ("site", &[("sid", 4), ("city", 3)], 4),
];

pub fn schema(relation: &str) -> Schema {
    let (_, cols, _) = table(relation);
    let pairs: Vec<(&str, DataType)> = cols.iter().map(|(c, _)| (*c, DataType::Int)).collect();
    Schema::from_pairs(&pairs)
}

fn table(relation: &str) -> &'static (&'static str, &'static [(&'static str, i64)], usize) {
    TABLES
        .iter()
        .find(|(name, _, _)| *name == relation)
        .unwrap_or_else(|| panic!("unknown fixture relation {}", relation))
}

/// Catalog whose statistics match the seeded contents.
pub fn catalog() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    for (name, cols, rows) in TABLES {
        let schema = schema(name);
        let rows = *rows as f64;
        let mut stats = Statistics::new(rows, rows * schema.row_width());
        for (col, ndv) in cols.iter() {
            stats = stats.with_column(*col, ColumnStatistics::new(*ndv as f64, 0.0));
        }
        catalog.add_relation(name, schema, stats);
    }
    catalog
}

/// Deterministic contents: column values cycle through `0..ndv` with a
/// per-column stride so that columns are not perfectly correlated.
pub fn database() -> Database {
    let mut db = Database::new();
    for (name, cols, rows) in TABLES {
        let mut contents = Vec::with_capacity(*rows);
        for i in 0..*rows as i64 {
            let mut row = Row::new();
            for (k, (col, ndv)) in cols.iter().enumerate() {
                let stride = 2 * k as i64 + 1;
                row.insert(col.to_string(), (i * stride + k as i64) % ndv);
            }
            contents.push(row);
        }
        db.insert(name.to_string(), contents);
    }
    db
}

pub fn scan(plan: &mut Plan, relation: &str) -> NodeId {
    plan.scan(relation, schema(relation))
}

pub fn col(name: &str) -> Expr {
    Expr::col(name)
}

pub fn equi(left: &str, right: &str) -> Expr {
    Expr::equal(Expr::col(left), Expr::col(right))
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Int(i64),
    Bool(bool),
}

impl Value {
    fn as_int(self) -> i64 {
        match self {
            Value::Int(v) => v,
            Value::Bool(b) => b as i64,
        }
    }

    fn as_bool(self) -> bool {
        match self {
            Value::Bool(b) => b,
            Value::Int(v) => v != 0,
        }
    }
}

fn eval(expr: &Expr, row: &Row) -> Value {
    match expr {
        Expr::Column(c) => Value::Int(
            *row.get(&c.name)
                .unwrap_or_else(|| panic!("row has no attribute {}", c.name)),
        ),
        Expr::Literal(ScalarValue::Int64(v)) => Value::Int(*v),
        Expr::Literal(ScalarValue::Bool(b)) => Value::Bool(*b),
        Expr::Literal(other) => panic!("unsupported literal {}", other),
        Expr::BinaryOp { op, left, right } => {
            let (l, r) = (eval(left, row).as_int(), eval(right, row).as_int());
            match op {
                BinaryOp::Eq => Value::Bool(l == r),
                BinaryOp::NotEq => Value::Bool(l != r),
                BinaryOp::Lt => Value::Bool(l < r),
                BinaryOp::LtEq => Value::Bool(l <= r),
                BinaryOp::Gt => Value::Bool(l > r),
                BinaryOp::GtEq => Value::Bool(l >= r),
                BinaryOp::Add => Value::Int(l + r),
                BinaryOp::Sub => Value::Int(l - r),
                BinaryOp::Mul => Value::Int(l * r),
                BinaryOp::Div => Value::Int(if r == 0 { 0 } else { l / r }),
            }
        }
        Expr::UnaryOp { op, operand } => {
            let v = eval(operand, row);
            match op {
                UnaryOp::Not => Value::Bool(!v.as_bool()),
                UnaryOp::Neg => Value::Int(-v.as_int()),
                UnaryOp::IsNull => Value::Bool(false),
                UnaryOp::IsNotNull => Value::Bool(true),
            }
        }
        Expr::Function { name, .. } => panic!("unsupported function {}", name),
        Expr::And(exprs) => Value::Bool(exprs.iter().all(|e| eval(e, row).as_bool())),
        Expr::Or(exprs) => Value::Bool(exprs.iter().any(|e| eval(e, row).as_bool())),
    }
}

/// Evaluate the subtree rooted at `id` against `db`.
pub fn execute(plan: &Plan, id: NodeId, db: &Database) -> Vec<Row> {
    let inputs: Vec<Vec<Row>> = plan
        .children(id)
        .iter()
        .map(|&c| execute(plan, c, db))
        .collect();

    match plan.op(id) {
        Operator::TableScan { relation, .. } => db[relation].clone(),
        Operator::Select { predicate } => inputs[0]
            .iter()
            .filter(|r| eval(predicate, r).as_bool())
            .cloned()
            .collect(),
        Operator::Project { exprs, aliases } => inputs[0]
            .iter()
            .map(|r| {
                exprs
                    .iter()
                    .zip(aliases)
                    .map(|(e, a)| (a.clone(), eval(e, r).as_int()))
                    .collect()
            })
            .collect(),
        Operator::Join { condition, .. } => {
            let mut out = Vec::new();
            for l in &inputs[0] {
                for r in &inputs[1] {
                    let mut row = l.clone();
                    row.extend(r.iter().map(|(k, v)| (k.clone(), *v)));
                    if eval(condition, &row).as_bool() {
                        out.push(row);
                    }
                }
            }
            out
        }
        Operator::Union => inputs.concat(),
        Operator::GroupBy {
            group_by,
            aggregates,
        } => {
            let mut groups: BTreeMap<Vec<i64>, Vec<&Row>> = BTreeMap::new();
            for r in &inputs[0] {
                let key = group_by.iter().map(|e| eval(e, r).as_int()).collect();
                groups.entry(key).or_default().push(r);
            }
            groups
                .into_iter()
                .map(|(key, rows)| {
                    let mut out = Row::new();
                    for (e, v) in group_by.iter().zip(key) {
                        out.insert(e.to_string(), v);
                    }
                    for agg in aggregates {
                        let values: Vec<i64> = rows.iter().map(|r| eval(&agg.arg, r).as_int()).collect();
                        let v = match agg.func {
                            AggFunc::Count => values.len() as i64,
                            AggFunc::Sum => values.iter().sum(),
                            AggFunc::Avg => values.iter().sum::<i64>() / values.len().max(1) as i64,
                            AggFunc::Min => values.iter().copied().min().unwrap_or(0),
                            AggFunc::Max => values.iter().copied().max().unwrap_or(0),
                        };
                        out.insert(agg.alias.clone(), v);
                    }
                    out
                })
                .collect()
        }
        Operator::Sort { order } => {
            let mut rows = inputs[0].clone();
            rows.sort_by(|a, b| {
                for key in order {
                    let (x, y) = (eval(&key.expr, a).as_int(), eval(&key.expr, b).as_int());
                    let ord = if key.ascending { x.cmp(&y) } else { y.cmp(&x) };
                    if ord.is_ne() {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            rows
        }
    }
}

/// The plan's result as a sorted bag of rows.
pub fn result_bag(plan: &Plan, db: &Database) -> Vec<Row> {
    let mut rows = execute(plan, plan.root().expect("plan has a root"), db);
    rows.sort();
    rows
}

/// Panic unless both plans return the same bag of rows.
pub fn assert_equivalent(before: &Plan, after: &Plan, db: &Database) {
    let (expected, actual) = (result_bag(before, db), result_bag(after, db));
    assert_eq!(
        expected.len(),
        actual.len(),
        "row count differs\nbefore:\n{}after:\n{}",
        before.explain(),
        after.explain()
    );
    assert!(
        expected == actual,
        "rows differ\nbefore:\n{}after:\n{}",
        before.explain(),
        after.explain()
    );
}
