//! # Cost Oracle
//!
//! The join-order search never computes costs itself. For every candidate
//! sub-plan it asks a `CostOracle` to prepare statistics, sample cardinalities and
//! return a comparable cost number. Costs are only meaningful relative to other
//! costs produced by the same oracle.
//!
//! - `StatisticsOracle` is the default oracle. It derives cardinalities from the
//!   catalog's table and column statistics and prices operators with a
//!   `CostModel`.
//! - `CostEstimator` is the adapter the search talks to. It drives the
//!   prepare → sample → cost protocol and consults an optional `PlanCostCache`.
//!
//! Oracle failures are returned as `OptimizerError::CostOracle` and propagate to
//! the caller; no default cost is ever substituted.

use crate::catalog::Catalog;
use crate::cost::{Cost, CostModel, DefaultCostModel};
use crate::error::{OptimizerError, Result};
use crate::expr::{BinaryOp, Expr, Operator};
use crate::plan::{NodeId, Plan};
use crate::predicate::{rel_set_key, RelSetKey};
use crate::stats::{self, Statistics};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// External cost/cardinality estimator for candidate plans.
///
/// Calls are synchronous and may be expensive. Callers issue `prepare`, then
/// `sample` (when estimates are wanted), then `cost`, for one candidate at a time.
pub trait CostOracle: Send {
    /// Ready the statistics machinery for the candidate rooted at `node`.
    fn prepare(&mut self, plan: &Plan, node: NodeId) -> Result<()>;

    /// Gather or estimate cardinalities for the prepared candidate.
    fn sample(&mut self, plan: &Plan, node: NodeId, sample_size: usize) -> Result<()>;

    /// Cost of the candidate. With `estimated`, the sampled cardinalities are used;
    /// otherwise raw base-table cardinalities.
    fn cost(&mut self, plan: &Plan, node: NodeId, estimated: bool) -> Result<Cost>;
}

/// Catalog-backed oracle that estimates cardinalities from table and column
/// statistics.
///
/// Statistics are already summaries of the stored relations, so the sample size
/// only has to be non-zero; every non-zero budget yields the same estimate.
pub struct StatisticsOracle {
    catalog: Arc<dyn Catalog>,
    cost_model: Arc<dyn CostModel>,
    prepared: Option<NodeId>,
    sampled: HashMap<NodeId, Statistics>,
}

impl StatisticsOracle {
    pub fn new(catalog: Arc<dyn Catalog>, cost_model: Arc<dyn CostModel>) -> Self {
        Self {
            catalog,
            cost_model,
            prepared: None,
            sampled: HashMap::new(),
        }
    }

    /// Oracle using the `DefaultCostModel`.
    pub fn with_default_model(catalog: Arc<dyn Catalog>) -> Self {
        Self::new(catalog, Arc::new(DefaultCostModel::default()))
    }

    fn base_stats(&self, relation: &str) -> Result<Statistics> {
        self.catalog.stats_of(relation).ok_or_else(|| {
            OptimizerError::CostOracle(format!("no statistics for relation '{}'", relation))
        })
    }

    /// Derive statistics for every node of the subtree rooted at `id`.
    ///
    /// Without `estimated`, selections keep all rows and joins are priced as
    /// cross products, which gives an upper bound.
    fn derive(
        &self,
        plan: &Plan,
        id: NodeId,
        estimated: bool,
        out: &mut HashMap<NodeId, Statistics>,
    ) -> Result<Statistics> {
        let mut inputs = Vec::with_capacity(2);
        for &child in plan.children(id) {
            inputs.push(self.derive(plan, child, estimated, out)?);
        }

        let derived = match (plan.op(id), inputs.as_slice()) {
            (Operator::TableScan { relation, .. }, []) => self.base_stats(relation)?,
            (Operator::Select { predicate }, [input]) => {
                if estimated {
                    stats::derive_filter_stats(input, stats::estimate_selectivity(predicate, input))
                } else {
                    input.clone()
                }
            }
            (Operator::Join { condition, .. }, [left, right]) => {
                if estimated {
                    join_stats(condition, left, right)
                } else {
                    stats::derive_join_stats(left, right, &[])
                }
            }
            (Operator::Union, [left, right]) => stats::derive_union_stats(left, right),
            (Operator::GroupBy { group_by, .. }, [input]) => {
                let columns: Vec<String> = group_by
                    .iter()
                    .filter_map(|e| match e {
                        Expr::Column(c) => Some(c.name.clone()),
                        _ => None,
                    })
                    .collect();
                stats::derive_aggregate_stats(input, &columns)
            }
            (Operator::Project { .. } | Operator::Sort { .. }, [input]) => input.clone(),
            (op, _) => {
                return Err(OptimizerError::CostOracle(format!(
                    "{} node {} has {} inputs",
                    op.kind(),
                    id,
                    inputs.len()
                )))
            }
        };

        out.insert(id, derived.clone());
        Ok(derived)
    }

    fn cost_subtree(
        &self,
        plan: &Plan,
        id: NodeId,
        stats: &HashMap<NodeId, Statistics>,
    ) -> Result<Cost> {
        let lookup = |n: NodeId| {
            stats.get(&n).ok_or_else(|| {
                OptimizerError::CostOracle(format!("no sampled statistics for node {}", n))
            })
        };

        let children = plan.children(id);
        let mut children_costs = Vec::with_capacity(children.len());
        let mut inputs = Vec::with_capacity(children.len());
        for &child in children {
            children_costs.push(self.cost_subtree(plan, child, stats)?);
            inputs.push(lookup(child)?);
        }

        let cost = self
            .cost_model
            .compute_cost(plan.op(id), &inputs, lookup(id)?, &children_costs);
        if cost.is_infinite() {
            return Err(OptimizerError::CostOracle(format!(
                "no feasible cost for {} node {}",
                plan.op(id).kind(),
                id
            )));
        }
        Ok(cost)
    }
}

/// Join cardinality: equi-join pairs use the NDV formula, any remaining
/// conjuncts filter the result.
fn join_stats(condition: &Expr, left: &Statistics, right: &Statistics) -> Statistics {
    let pairs = stats::equi_join_columns(condition);
    let joined = stats::derive_join_stats(left, right, &pairs);

    let residual: Vec<&Expr> = condition
        .conjuncts()
        .into_iter()
        .filter(|c| !c.is_always_true() && !is_column_equality(c))
        .collect();
    if residual.is_empty() {
        return joined;
    }
    let selectivity: f64 = residual
        .iter()
        .map(|c| stats::estimate_selectivity(c, &joined))
        .product();
    stats::derive_filter_stats(&joined, selectivity)
}

fn is_column_equality(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::BinaryOp { op: BinaryOp::Eq, left, right }
            if matches!((left.as_ref(), right.as_ref()), (Expr::Column(_), Expr::Column(_)))
    )
}

impl CostOracle for StatisticsOracle {
    fn prepare(&mut self, plan: &Plan, node: NodeId) -> Result<()> {
        for relation in plan.relations_of(node) {
            self.base_stats(&relation)?;
        }
        self.sampled.clear();
        self.prepared = Some(node);
        Ok(())
    }

    fn sample(&mut self, plan: &Plan, node: NodeId, sample_size: usize) -> Result<()> {
        if sample_size == 0 {
            return Err(OptimizerError::CostOracle("sample size must be positive".into()));
        }
        if self.prepared != Some(node) {
            return Err(OptimizerError::CostOracle(format!(
                "node {} was not prepared before sampling",
                node
            )));
        }
        let mut sampled = HashMap::new();
        let root_stats = self.derive(plan, node, true, &mut sampled)?;
        trace!(node, rows = root_stats.row_count, "sampled candidate");
        self.sampled = sampled;
        Ok(())
    }

    fn cost(&mut self, plan: &Plan, node: NodeId, estimated: bool) -> Result<Cost> {
        if self.prepared != Some(node) {
            return Err(OptimizerError::CostOracle(format!(
                "node {} was not prepared before costing",
                node
            )));
        }
        if estimated {
            if !self.sampled.contains_key(&node) {
                return Err(OptimizerError::CostOracle(format!(
                    "node {} was not sampled before costing with estimates",
                    node
                )));
            }
            self.cost_subtree(plan, node, &self.sampled)
        } else {
            let mut raw = HashMap::new();
            self.derive(plan, node, false, &mut raw)?;
            self.cost_subtree(plan, node, &raw)
        }
    }
}

/// Optimizer-scoped cache of candidate costs.
///
/// Keys are the candidate's relation set plus its structural signature
/// (`Plan::signature`). Lookups are exact-match only.
#[derive(Debug, Clone, Default)]
pub struct PlanCostCache {
    costs: HashMap<(RelSetKey, String), Cost>,
}

impl PlanCostCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plan_cost(&mut self, relations: RelSetKey, signature: String, cost: Cost) {
        self.costs.insert((relations, signature), cost);
    }

    pub fn get_plan_cost(&self, relations: &RelSetKey, signature: &str) -> Option<Cost> {
        // Tuple keys can't be borrowed piecewise, so build the owned key.
        self.costs
            .get(&(relations.clone(), signature.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    pub fn clear(&mut self) {
        self.costs.clear();
    }
}

/// Drives the oracle protocol for the join-order search.
pub struct CostEstimator<'a> {
    oracle: &'a mut dyn CostOracle,
    cache: Option<&'a mut PlanCostCache>,
    sample_size: usize,
    use_estimates: bool,
    oracle_calls: usize,
}

impl<'a> CostEstimator<'a> {
    pub fn new(oracle: &'a mut dyn CostOracle, sample_size: usize, use_estimates: bool) -> Self {
        Self {
            oracle,
            cache: None,
            sample_size,
            use_estimates,
            oracle_calls: 0,
        }
    }

    pub fn with_cache(mut self, cache: &'a mut PlanCostCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Number of candidates actually priced by the oracle (cache hits excluded).
    pub fn oracle_calls(&self) -> usize {
        self.oracle_calls
    }

    /// Cost of the candidate rooted at `node`.
    pub fn estimate(&mut self, plan: &Plan, node: NodeId) -> Result<Cost> {
        let relations = rel_set_key(&plan.relations_of(node));
        let signature = plan.signature(node);

        if let Some(cost) = self
            .cache
            .as_deref()
            .and_then(|c| c.get_plan_cost(&relations, &signature))
        {
            trace!(%signature, cost = cost.total, "plan cost cache hit");
            return Ok(cost);
        }

        self.oracle.prepare(plan, node)?;
        if self.use_estimates {
            self.oracle.sample(plan, node, self.sample_size)?;
        }
        let cost = self.oracle.cost(plan, node, self.use_estimates)?;
        self.oracle_calls += 1;

        if let Some(cache) = self.cache.as_deref_mut() {
            cache.add_plan_cost(relations, signature, cost);
        }
        Ok(cost)
    }
}
