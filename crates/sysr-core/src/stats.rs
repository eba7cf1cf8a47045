//! # Statistics for Cost-Based Optimization
//!
//! This module defines the statistics structures and derivation formulas the
//! statistics oracle uses to estimate the cardinality of candidate plans. The join
//! order search never looks at these numbers directly; it only compares the costs
//! the oracle derives from them.
//!
//! ## Statistics Hierarchy
//!
//! - **Table-level**: row count and total size in bytes.
//! - **Column-level**: number of distinct values (NDV), null fraction, min/max
//!   values and average value size.
//!
//! ## Derivation Formulas
//!
//! Statistics for intermediate plan nodes are derived bottom-up:
//!
//! - **Select**: output_rows = input_rows * selectivity. Column NDVs are scaled
//!   proportionally to the row reduction ratio.
//! - **Join**: output_rows = |left| * |right| / max(NDV_left_key, NDV_right_key)
//!   per equi-join column pair. A join without equi-join pairs (including the
//!   `TRUE` condition of a cross product) keeps the full product.
//! - **GroupBy**: output_rows = product of NDVs of group-by columns, capped by
//!   input rows.
//! - **Union**: row counts and sizes add up.
//!
//! ## Selectivity Estimation
//!
//! - **Equality**: 1 / NDV (uniform distribution assumption).
//! - **Range**: fixed 1/3 heuristic.
//! - **AND / OR**: independence / inclusion-exclusion.
//! - **Default**: 0.1 (10%) when no better estimate is available.

use crate::expr::{BinaryOp, Expr, ScalarValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default filter selectivity when we can't determine it.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Selectivity of a range comparison (`<`, `<=`, `>`, `>=`).
pub const RANGE_SELECTIVITY: f64 = 0.33;

/// Row width assumed when a relation reports zero rows.
const DEFAULT_ROW_WIDTH: f64 = 100.0;

/// Statistics for a relation or an intermediate plan node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub row_count: f64,
    pub total_size_bytes: f64,
    pub column_stats: HashMap<String, ColumnStatistics>,
}

impl Statistics {
    pub fn new(row_count: f64, total_size_bytes: f64) -> Self {
        Self {
            row_count,
            total_size_bytes,
            column_stats: HashMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStatistics) -> Self {
        self.column_stats.insert(name.into(), stats);
        self
    }

    /// Average width of one row in bytes.
    pub fn avg_row_size(&self) -> f64 {
        if self.row_count > 0.0 {
            self.total_size_bytes / self.row_count
        } else {
            DEFAULT_ROW_WIDTH
        }
    }

    /// Number of pages of `page_size` bytes needed to hold the rows (at least 1).
    pub fn pages(&self, page_size: f64) -> f64 {
        (self.total_size_bytes / page_size.max(1.0)).ceil().max(1.0)
    }
}

/// Per-column statistics used for selectivity estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStatistics {
    /// Number of distinct values (NDV). Used for equality selectivity: sel = 1/NDV.
    pub distinct_count: f64,
    /// Fraction of rows that are NULL [0.0, 1.0].
    pub null_fraction: f64,
    /// Minimum value in the column (if known).
    pub min_value: Option<ScalarValue>,
    /// Maximum value in the column (if known).
    pub max_value: Option<ScalarValue>,
    /// Average size of a single value in bytes.
    pub avg_row_size: f64,
}

impl ColumnStatistics {
    pub fn new(distinct_count: f64, null_fraction: f64) -> Self {
        Self {
            distinct_count,
            null_fraction,
            min_value: None,
            max_value: None,
            avg_row_size: 8.0,
        }
    }
}

/// Derive statistics for join output.
///
/// ```text
/// |A JOIN B| = |A| * |B| / max(NDV(A.key), NDV(B.key))
/// ```
///
/// Multi-column joins multiply the per-pair selectivities (independence
/// assumption). When NDV information is unavailable for a column, the relation's
/// row count is used as its NDV.
pub fn derive_join_stats(
    left: &Statistics,
    right: &Statistics,
    join_columns: &[(String, String)],
) -> Statistics {
    let mut selectivity = 1.0_f64;

    for (left_col, right_col) in join_columns {
        let left_ndv = ndv(left, left_col).or_else(|| ndv(right, left_col));
        let right_ndv = ndv(right, right_col).or_else(|| ndv(left, right_col));
        let max_ndv = left_ndv
            .unwrap_or(left.row_count)
            .max(right_ndv.unwrap_or(right.row_count))
            .max(1.0);
        selectivity /= max_ndv;
    }

    let row_count = (left.row_count * right.row_count * selectivity).max(1.0);
    let total_size_bytes = row_count * (left.avg_row_size() + right.avg_row_size());

    // NDV is capped by the output row count.
    let mut column_stats = HashMap::new();
    for (name, stats) in left.column_stats.iter().chain(right.column_stats.iter()) {
        let mut cs = stats.clone();
        cs.distinct_count = cs.distinct_count.min(row_count);
        column_stats.insert(name.clone(), cs);
    }

    Statistics {
        row_count,
        total_size_bytes,
        column_stats,
    }
}

fn ndv(stats: &Statistics, column: &str) -> Option<f64> {
    stats.column_stats.get(column).map(|s| s.distinct_count)
}

/// Derive statistics for select output.
///
/// Output rows = input rows * selectivity (floored at 1); size and column NDVs
/// are scaled by the same ratio.
pub fn derive_filter_stats(input: &Statistics, selectivity: f64) -> Statistics {
    let row_count = (input.row_count * selectivity).max(1.0);
    let ratio = if input.row_count > 0.0 {
        row_count / input.row_count
    } else {
        1.0
    };

    let mut column_stats = HashMap::new();
    for (name, stats) in &input.column_stats {
        let mut cs = stats.clone();
        cs.distinct_count = (cs.distinct_count * ratio).max(1.0).min(row_count);
        column_stats.insert(name.clone(), cs);
    }

    Statistics {
        row_count,
        total_size_bytes: input.total_size_bytes * ratio,
        column_stats,
    }
}

/// Derive statistics for group-by output.
///
/// A global aggregate (no group-by columns) always yields one row. Column-level
/// statistics are not propagated.
pub fn derive_aggregate_stats(input: &Statistics, group_by_cols: &[String]) -> Statistics {
    let mut row_count = 1.0_f64;
    for col in group_by_cols {
        row_count *= ndv(input, col).unwrap_or(input.row_count);
    }
    row_count = row_count.min(input.row_count).max(1.0);

    Statistics {
        row_count,
        total_size_bytes: row_count * DEFAULT_ROW_WIDTH,
        column_stats: HashMap::new(),
    }
}

/// Derive statistics for a bag union: rows and sizes add up, NDVs take the max.
pub fn derive_union_stats(left: &Statistics, right: &Statistics) -> Statistics {
    let mut column_stats = left.column_stats.clone();
    for (name, stats) in &right.column_stats {
        column_stats
            .entry(name.clone())
            .and_modify(|cs| cs.distinct_count = cs.distinct_count.max(stats.distinct_count))
            .or_insert_with(|| stats.clone());
    }
    Statistics {
        row_count: left.row_count + right.row_count,
        total_size_bytes: left.total_size_bytes + right.total_size_bytes,
        column_stats,
    }
}

/// Estimate selectivity for an equality predicate: `sel = 1 / NDV`.
pub fn equality_selectivity(stats: &Statistics, col_name: &str) -> f64 {
    stats
        .column_stats
        .get(col_name)
        .map(|cs| 1.0 / cs.distinct_count.max(1.0))
        .unwrap_or(DEFAULT_FILTER_SELECTIVITY)
}

/// Estimate the selectivity of a predicate against input statistics.
///
/// Column-to-column equalities inside a select (rather than a join) are treated
/// like `col = value` on the left column.
pub fn estimate_selectivity(expr: &Expr, stats: &Statistics) -> f64 {
    match expr {
        Expr::Literal(ScalarValue::Bool(true)) => 1.0,
        Expr::Literal(ScalarValue::Bool(false)) => 0.0,
        Expr::BinaryOp {
            op: BinaryOp::Eq,
            left,
            right,
        } => {
            if let Expr::Column(c) = left.as_ref() {
                return equality_selectivity(stats, &c.name);
            }
            if let Expr::Column(c) = right.as_ref() {
                return equality_selectivity(stats, &c.name);
            }
            DEFAULT_FILTER_SELECTIVITY
        }
        Expr::BinaryOp {
            op: BinaryOp::NotEq,
            left,
            ..
        } => match left.as_ref() {
            Expr::Column(c) => 1.0 - equality_selectivity(stats, &c.name),
            _ => 1.0 - DEFAULT_FILTER_SELECTIVITY,
        },
        Expr::BinaryOp {
            op: BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq,
            ..
        } => RANGE_SELECTIVITY,
        Expr::And(conjuncts) => conjuncts
            .iter()
            .map(|c| estimate_selectivity(c, stats))
            .product(),
        Expr::Or(disjuncts) => {
            let miss: f64 = disjuncts
                .iter()
                .map(|d| 1.0 - estimate_selectivity(d, stats))
                .product();
            1.0 - miss
        }
        _ => DEFAULT_FILTER_SELECTIVITY,
    }
}

/// Extract equi-join column pairs from a join condition.
///
/// Given `A.x = B.y AND A.z = B.w`, returns `[("x", "y"), ("z", "w")]`.
pub fn equi_join_columns(condition: &Expr) -> Vec<(String, String)> {
    condition
        .conjuncts()
        .into_iter()
        .filter_map(|c| match c {
            Expr::BinaryOp {
                op: BinaryOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Expr::Column(l), Expr::Column(r)) => Some((l.name.clone(), r.name.clone())),
                _ => None,
            },
            _ => None,
        })
        .collect()
}
