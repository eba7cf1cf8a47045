//! # Cost Model
//!
//! This module defines the cost abstraction and the default page-based cost model
//! used by the statistics oracle.
//!
//! ## Page-Based Cost Model
//!
//! The cost of a plan is dominated by page I/O, with a small per-tuple CPU term:
//!
//! ```text
//! total_cost = io_weight * pages_read + cpu_weight * tuples_processed
//! ```
//!
//! Join methods differ in how often they re-read their right input:
//!
//! - **Nested loops**: once per left row.
//! - **Block nested loops**: once per block of `buffer_pages - 2` left pages.
//! - **Hash**: partitions both inputs, writing and re-reading each once.
//!
//! ## Cost Accumulation
//!
//! Costs are additive: the cost of a plan is the local cost of its root operator
//! plus the accumulated costs of its children. Each child's cost already includes
//! reading its input once, so a join's local cost only counts the extra passes.
//!
//! ## Pluggable Design
//!
//! The `CostModel` trait allows replacing the default model, e.g. with one
//! calibrated against measured execution times of the storage engine.

use crate::expr::{JoinMethod, Operator};
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};

/// A single comparable cost value. Lower is cheaper.
///
/// Absolute units are implementation-defined; costs are only meaningful relative
/// to other costs produced by the same oracle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cost {
    /// The total weighted cost. `f64::MAX` or a non-finite value marks an infeasible plan.
    pub total: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self { total: 0.0 }
    }

    pub fn new(total: f64) -> Self {
        Self { total }
    }

    pub fn infinite() -> Self {
        Self { total: f64::MAX }
    }

    /// Infeasible: the `infinite()` marker, or a total that overflowed or is NaN.
    pub fn is_infinite(&self) -> bool {
        !self.total.is_finite() || self.total == f64::MAX
    }
}

/// Epsilon-based equality to handle floating-point imprecision in cost comparisons.
impl PartialEq for Cost {
    fn eq(&self, other: &Self) -> bool {
        (self.total - other.total).abs() < f64::EPSILON
    }
}

impl PartialOrd for Cost {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.total.partial_cmp(&other.total)
    }
}

/// Trait for pluggable cost models.
pub trait CostModel: Send + Sync {
    /// Cost of `op` given its inputs' statistics, its own output statistics and
    /// its children's accumulated costs.
    fn compute_cost(
        &self,
        op: &Operator,
        input_stats: &[&Statistics],
        output_stats: &Statistics,
        children_costs: &[Cost],
    ) -> Cost;
}

/// Default page-based cost model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultCostModel {
    /// Size of one disk page in bytes.
    pub page_size_bytes: f64,
    /// Pages of buffer available to a block nested loops join.
    pub buffer_pages: f64,
    /// Weight of one page read or write.
    pub io_weight: f64,
    /// Weight of processing one tuple.
    pub cpu_weight: f64,
}

impl Default for DefaultCostModel {
    fn default() -> Self {
        Self {
            page_size_bytes: 4096.0,
            buffer_pages: 16.0,
            io_weight: 1.0,
            cpu_weight: 0.001,
        }
    }
}

impl DefaultCostModel {
    fn pages(&self, stats: &Statistics) -> f64 {
        stats.pages(self.page_size_bytes)
    }

    fn join_cost(&self, method: JoinMethod, left: &Statistics, right: &Statistics) -> f64 {
        let left_pages = self.pages(left);
        let right_pages = self.pages(right);
        let comparisons = left.row_count * right.row_count;

        match method {
            // Re-reads the right input once per left row (the first pass is in the
            // right child's own cost).
            JoinMethod::NestedLoops => {
                self.io_weight * (left.row_count - 1.0).max(0.0) * right_pages
                    + self.cpu_weight * comparisons
            }
            // Re-reads the right input once per block of left pages; two buffer
            // pages are reserved for the right input and the output.
            JoinMethod::BlockNestedLoops => {
                let block = (self.buffer_pages - 2.0).max(1.0);
                let blocks = (left_pages / block).ceil().max(1.0);
                self.io_weight * (blocks - 1.0) * right_pages + self.cpu_weight * comparisons
            }
            // Partition both inputs to disk and read the partitions back.
            JoinMethod::Hash => {
                self.io_weight * 2.0 * (left_pages + right_pages)
                    + self.cpu_weight * (left.row_count + right.row_count)
            }
        }
    }
}

impl CostModel for DefaultCostModel {
    fn compute_cost(
        &self,
        op: &Operator,
        input_stats: &[&Statistics],
        output_stats: &Statistics,
        children_costs: &[Cost],
    ) -> Cost {
        let children_total: f64 = children_costs.iter().map(|c| c.total).sum();
        let input_rows = input_stats.first().map(|s| s.row_count).unwrap_or(0.0);

        let local_cost = match op {
            // Reads every page of the relation and touches every tuple.
            Operator::TableScan { .. } => {
                self.io_weight * self.pages(output_stats)
                    + self.cpu_weight * output_stats.row_count
            }
            // Pipelined: one predicate evaluation per input row.
            Operator::Select { .. } | Operator::Project { .. } | Operator::GroupBy { .. } => {
                self.cpu_weight * input_rows
            }
            Operator::Join { method, .. } => match input_stats {
                [left, right] => self.join_cost(*method, left, right),
                _ => return Cost::infinite(),
            },
            Operator::Union => 0.0,
            // O(n log n) comparisons.
            Operator::Sort { .. } => {
                let n_log_n = if input_rows > 1.0 {
                    input_rows * input_rows.log2()
                } else {
                    1.0
                };
                self.cpu_weight * n_log_n
            }
        };

        Cost::new(children_total + local_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;

    fn join(method: JoinMethod) -> Operator {
        Operator::Join {
            condition: Expr::always_true(),
            method,
        }
    }

    #[test]
    fn test_infeasible_costs() {
        assert!(Cost::infinite().is_infinite());
        assert!(Cost::new(f64::INFINITY).is_infinite());
        assert!(Cost::new(f64::MAX * 2.0).is_infinite());
        assert!(Cost::new(f64::NAN).is_infinite());
        assert!(!Cost::new(1e300).is_infinite());
        assert!(!Cost::zero().is_infinite());
    }

    #[test]
    fn test_block_nested_loops_cheaper_than_nested_loops() {
        let model = DefaultCostModel::default();
        let left = Statistics::new(10_000.0, 10_000.0 * 100.0);
        let right = Statistics::new(1_000.0, 1_000.0 * 100.0);
        let out = Statistics::new(1_000.0, 200_000.0);

        let nl = model.compute_cost(
            &join(JoinMethod::NestedLoops),
            &[&left, &right],
            &out,
            &[Cost::zero(), Cost::zero()],
        );
        let bnl = model.compute_cost(
            &join(JoinMethod::BlockNestedLoops),
            &[&left, &right],
            &out,
            &[Cost::zero(), Cost::zero()],
        );
        assert!(bnl < nl);
    }

    #[test]
    fn test_children_costs_accumulate() {
        let model = DefaultCostModel::default();
        let stats = Statistics::new(100.0, 4096.0);
        let cost = model.compute_cost(
            &Operator::Union,
            &[&stats, &stats],
            &stats,
            &[Cost::new(3.0), Cost::new(4.0)],
        );
        assert_eq!(cost, Cost::new(7.0));
    }

    #[test]
    fn test_join_without_two_inputs_is_infeasible() {
        let model = DefaultCostModel::default();
        let stats = Statistics::new(100.0, 4096.0);
        let cost = model.compute_cost(&join(JoinMethod::Hash), &[&stats], &stats, &[]);
        assert!(cost.is_infinite());
    }
}
