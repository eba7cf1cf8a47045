//! # Expression and Operator Types
//!
//! This module defines the type system for the optimizer's plan representation.
//! It is organized into two layers:
//!
//! ## Scalar Expressions (`Expr`)
//! Scalar expressions represent computations on individual rows: column references,
//! literal values, arithmetic, comparisons, boolean logic and function calls. They
//! appear as selection predicates, join conditions, projections and sort keys.
//!
//! The optimizer only needs two analyses from expressions, both defined here:
//! - **Conjunct decomposition** (`Expr::conjuncts`): split a predicate at its
//!   top-level ANDs. Disjunctions are never split.
//! - **Referenced attributes** (`Expr::columns`): every column a predicate reads.
//!
//! ## Operators (`Operator`)
//! Operators are the nodes of a plan tree. The set is closed: every pass matches
//! exhaustively, so a new operator kind is a compile-time decision point in each
//! traversal rather than a silently skipped branch. `Join` carries its physical
//! method because the join-order search picks the method together with the order.

use crate::catalog::Schema;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifier of a base relation (a table name).
pub type RelationId = String;

/// Reference to a column, optionally qualified by its relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<RelationId>,
    pub name: String,
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref t) = self.table {
            write!(f, "{}.{}", t, self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Scalar value for expressions.
///
/// Uses `OrderedFloat` for `f64` so that floating-point literals can take part in
/// Eq/Hash comparisons (plan signatures and predicate grouping rely on them).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    /// SQL NULL value.
    Null,
    /// Boolean true/false.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit floating point, wrapped in OrderedFloat for Eq/Hash support.
    Float64(OrderedFloat<f64>),
    /// UTF-8 string.
    Utf8(String),
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Float64(v) => write!(f, "{}", v),
            Self::Utf8(v) => write!(f, "'{}'", v),
        }
    }
}

/// Scalar expressions used in predicates, projections, join conditions, etc.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    /// Reference to a column by (optionally qualified) name.
    Column(ColumnRef),
    /// Constant literal value.
    Literal(ScalarValue),
    /// Binary operation (e.g., `a + b`, `x = y`, `price > 100`).
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation (e.g., `NOT flag`, `-value`, `IS NULL`).
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
    /// Named function call (e.g., `UPPER(name)`, `ABS(value)`).
    Function { name: String, args: Vec<Expr> },
    /// Conjunction (AND) of multiple predicates. Stored as a flat list so that
    /// conjunct decomposition is a walk over the list rather than a binary tree.
    And(Vec<Expr>),
    /// Disjunction (OR) of multiple predicates.
    Or(Vec<Expr>),
}

impl Expr {
    /// Unqualified column reference.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column(ColumnRef {
            table: None,
            name: name.into(),
        })
    }

    /// Column reference qualified by its relation.
    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Column(ColumnRef {
            table: Some(table.into()),
            name: name.into(),
        })
    }

    pub fn int(v: i64) -> Self {
        Expr::Literal(ScalarValue::Int64(v))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn equal(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Eq, left, right)
    }

    pub fn gt(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Gt, left, right)
    }

    pub fn lt(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOp::Lt, left, right)
    }

    /// The literal `TRUE`, used as the condition of a cross product.
    pub fn always_true() -> Self {
        Expr::Literal(ScalarValue::Bool(true))
    }

    pub fn is_always_true(&self) -> bool {
        matches!(self, Expr::Literal(ScalarValue::Bool(true)))
    }

    /// Conjoin a list of predicates.
    ///
    /// Nested conjunctions are flattened; a single predicate is returned bare and
    /// an empty list yields `TRUE`.
    pub fn conjoin(exprs: Vec<Expr>) -> Self {
        let mut flat: Vec<Expr> = Vec::with_capacity(exprs.len());
        for e in exprs {
            match e {
                Expr::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Expr::always_true(),
            1 => flat.pop().unwrap_or_else(Expr::always_true),
            _ => Expr::And(flat),
        }
    }

    /// Return all column references in this expression.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols);
        cols
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_columns(out),
            Expr::Function { args, .. } => {
                for a in args {
                    a.collect_columns(out);
                }
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.collect_columns(out);
                }
            }
        }
    }

    /// Flatten AND-chains: (A AND (B AND C)) → [A, B, C].
    ///
    /// Only top-level conjunctions are split; `A OR (B AND C)` is one conjunct.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{}", c),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::BinaryOp { op, left, right } => write!(f, "{} {} {}", left, op, right),
            Expr::UnaryOp { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT {}", operand),
                UnaryOp::Neg => write!(f, "-{}", operand),
                UnaryOp::IsNull => write!(f, "{} IS NULL", operand),
                UnaryOp::IsNotNull => write!(f, "{} IS NOT NULL", operand),
            },
            Expr::Function { name, args } => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Expr::And(exprs) => write_list(f, exprs, " AND "),
            Expr::Or(exprs) => write_list(f, exprs, " OR "),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, exprs: &[Expr], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, e) in exprs.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", e)?;
    }
    write!(f, ")")
}

/// Binary operators for comparison and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Equality comparison (`=`). Used heavily in join conditions and filters.
    Eq,
    /// Inequality comparison (`<>`).
    NotEq,
    /// Less than (`<`).
    Lt,
    /// Less than or equal (`<=`).
    LtEq,
    /// Greater than (`>`).
    Gt,
    /// Greater than or equal (`>=`).
    GtEq,
    /// Addition (`+`).
    Add,
    /// Subtraction (`-`).
    Sub,
    /// Multiplication (`*`).
    Mul,
    /// Division (`/`).
    Div,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        write!(f, "{}", s)
    }
}

/// Unary operators for boolean logic and null checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Boolean negation (`NOT`).
    Not,
    /// Arithmetic negation (unary minus).
    Neg,
    /// Null check (`IS NULL`).
    IsNull,
    /// Non-null check (`IS NOT NULL`).
    IsNotNull,
}

/// Aggregate expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggExpr {
    pub func: AggFunc,
    pub arg: Expr,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
}

/// Physical join algorithm.
///
/// The join-order search generates `NestedLoops` and `BlockNestedLoops` for every
/// candidate and keeps the cheaper one. `Hash` may appear in input plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinMethod {
    /// Tuple-at-a-time nested loops: scans the right input once per left row.
    NestedLoops,
    /// Block nested loops: scans the right input once per buffered block of left pages.
    BlockNestedLoops,
    /// Hash join (equi-joins only).
    Hash,
}

impl fmt::Display for JoinMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinMethod::NestedLoops => "nested-loops",
            JoinMethod::BlockNestedLoops => "block-nested-loops",
            JoinMethod::Hash => "hash",
        };
        write!(f, "{}", s)
    }
}

/// Plan operators.
///
/// Children are not stored here; they live in the plan arena (`crate::plan`).
/// Arity is fixed per variant: scans are leaves, `Join`/`Union` are binary and
/// everything else is unary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operator {
    /// Reads every row of a base relation. Always a leaf.
    TableScan { relation: RelationId, schema: Schema },
    /// Keeps the rows that satisfy `predicate`.
    Select { predicate: Expr },
    /// Computes output expressions. Never relocated by the optimizer.
    Project { exprs: Vec<Expr>, aliases: Vec<String> },
    /// Inner join of its two children on `condition` using `method`.
    Join { condition: Expr, method: JoinMethod },
    /// Bag union of its two children.
    Union,
    /// Groups rows and computes aggregates. An opaque boundary for join ordering.
    GroupBy {
        group_by: Vec<Expr>,
        aggregates: Vec<AggExpr>,
    },
    /// Orders rows. An opaque boundary for join ordering.
    Sort { order: Vec<SortKey> },
}

impl Operator {
    pub fn kind(&self) -> OperatorKind {
        match self {
            Operator::TableScan { .. } => OperatorKind::TableScan,
            Operator::Select { .. } => OperatorKind::Select,
            Operator::Project { .. } => OperatorKind::Project,
            Operator::Join { .. } => OperatorKind::Join,
            Operator::Union => OperatorKind::Union,
            Operator::GroupBy { .. } => OperatorKind::GroupBy,
            Operator::Sort { .. } => OperatorKind::Sort,
        }
    }

    /// Number of children this operator requires.
    pub fn arity(&self) -> usize {
        match self.kind() {
            OperatorKind::TableScan => 0,
            OperatorKind::Join | OperatorKind::Union => 2,
            OperatorKind::Select
            | OperatorKind::Project
            | OperatorKind::GroupBy
            | OperatorKind::Sort => 1,
        }
    }
}

/// Kind discriminant of an operator (without data).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorKind {
    TableScan,
    Select,
    Project,
    Join,
    Union,
    GroupBy,
    Sort,
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conjuncts_keep_disjunctions_whole() {
        let pred = Expr::And(vec![
            Expr::gt(Expr::col("eid"), Expr::int(0)),
            Expr::And(vec![
                Expr::gt(Expr::col("id"), Expr::int(0)),
                Expr::Or(vec![
                    Expr::equal(Expr::col("eid"), Expr::int(5)),
                    Expr::equal(Expr::col("id"), Expr::int(6)),
                ]),
            ]),
        ]);

        let conjuncts = pred.conjuncts();
        assert_eq!(conjuncts.len(), 3);
        assert!(matches!(conjuncts[2], Expr::Or(_)));
        assert_eq!(conjuncts[2].columns().len(), 2);
    }

    #[test]
    fn test_conjoin() {
        assert!(Expr::conjoin(vec![]).is_always_true());

        let single = Expr::equal(Expr::col("a"), Expr::col("d"));
        assert_eq!(Expr::conjoin(vec![single.clone()]), single);

        let nested = Expr::conjoin(vec![
            Expr::And(vec![single.clone(), single.clone()]),
            single.clone(),
        ]);
        assert_eq!(nested.conjuncts().len(), 3);
    }

    #[test]
    fn test_display() {
        let pred = Expr::And(vec![
            Expr::gt(Expr::col("eid"), Expr::int(0)),
            Expr::Or(vec![
                Expr::equal(Expr::col("eid"), Expr::int(5)),
                Expr::equal(Expr::qualified("employee", "id"), Expr::int(6)),
            ]),
        ]);
        assert_eq!(pred.to_string(), "(eid > 0 AND (eid = 5 OR employee.id = 6))");
    }

    #[test]
    fn test_operator_arity() {
        let join = Operator::Join {
            condition: Expr::always_true(),
            method: JoinMethod::NestedLoops,
        };
        assert_eq!(join.arity(), 2);
        assert_eq!(Operator::Union.arity(), 2);
        assert_eq!(
            Operator::Select {
                predicate: Expr::always_true()
            }
            .arity(),
            1
        );
    }
}
