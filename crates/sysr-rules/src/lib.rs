//! # Optimizer Passes
//!
//! This crate provides the rewrite passes of the optimizer and the `Optimizer`
//! facade that the rest of the system calls:
//!
//! - **`pushdown_operators`**: strips every select (`linearize`) and puts each
//!   conjunct back at its lowest valid position (`pushdown`).
//! - **`pick_join_order`**: reorders the join block with the System-R search from
//!   `sysr-core`, pricing candidates through the configured cost oracle.
//! - **`optimize_query`**: pushdown followed by join ordering.
//!
//! Every entry point takes the plan by reference and returns a new plan; the
//! input is never modified.

pub mod linearize;
pub mod pushdown;

use serde::Deserialize;
use std::sync::Arc;
use sysr_core::catalog::Catalog;
use sysr_core::cost::Cost;
use sysr_core::error::Result;
use sysr_core::oracle::{CostEstimator, CostOracle, PlanCostCache, StatisticsOracle};
use sysr_core::plan::Plan;
use sysr_core::predicate::RelSetKey;
use sysr_core::search::{JoinOrderSearch, SearchConfig};
use tracing::debug;

/// Optimizer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizerConfig {
    /// Rows the oracle may sample per candidate.
    pub sample_size: usize,
    /// Compare sampled estimates rather than raw cardinalities.
    pub use_estimates: bool,
    /// Largest join block the search accepts.
    pub max_relations: usize,
    /// Keep candidate costs across calls on the same optimizer.
    pub cache_plan_costs: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            sample_size: 100,
            use_estimates: true,
            max_relations: SearchConfig::default().max_relations,
            cache_plan_costs: true,
        }
    }
}

impl OptimizerConfig {
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_estimates(mut self, use_estimates: bool) -> Self {
        self.use_estimates = use_estimates;
        self
    }

    pub fn with_max_relations(mut self, max_relations: usize) -> Self {
        self.max_relations = max_relations;
        self
    }

    pub fn with_plan_cost_cache(mut self, enabled: bool) -> Self {
        self.cache_plan_costs = enabled;
        self
    }
}

/// System-R style optimizer: predicate pushdown plus left-deep join ordering.
///
/// The optimizer owns its cost oracle and an optional cost cache that is reused
/// by successive calls on the same instance.
pub struct Optimizer {
    config: OptimizerConfig,
    oracle: Box<dyn CostOracle>,
    cost_cache: PlanCostCache,
}

impl Optimizer {
    pub fn new(oracle: Box<dyn CostOracle>, config: OptimizerConfig) -> Self {
        Self {
            config,
            oracle,
            cost_cache: PlanCostCache::new(),
        }
    }

    /// Optimizer backed by a `StatisticsOracle` over `catalog`.
    pub fn with_catalog(catalog: Arc<dyn Catalog>, config: OptimizerConfig) -> Self {
        Self::new(Box::new(StatisticsOracle::with_default_model(catalog)), config)
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn cost_cache(&self) -> &PlanCostCache {
        &self.cost_cache
    }

    /// Record the cost of a plan computed elsewhere.
    pub fn add_plan_cost(&mut self, relations: RelSetKey, signature: String, cost: Cost) {
        self.cost_cache.add_plan_cost(relations, signature, cost);
    }

    /// Cost previously recorded for exactly this relation set and plan shape.
    pub fn get_plan_cost(&self, relations: &RelSetKey, signature: &str) -> Option<Cost> {
        self.cost_cache.get_plan_cost(relations, signature)
    }

    /// Push every selection predicate down to its lowest valid position.
    pub fn pushdown_operators(&self, plan: &Plan) -> Result<Plan> {
        pushdown::pushdown_operators(plan)
    }

    /// Reorder joins with the System-R dynamic program.
    ///
    /// Search time and memory grow as O(2^n) in the number of relations of the
    /// join block, which is bounded by `OptimizerConfig::max_relations`.
    pub fn pick_join_order(&mut self, plan: &Plan) -> Result<Plan> {
        let config = SearchConfig {
            max_relations: self.config.max_relations,
        };
        let mut search = JoinOrderSearch::new(self.estimator(), config);
        let out = search.optimize(plan)?;
        let oracle_calls = search.estimator().oracle_calls();
        debug!(
            "Join order picked: oracle_calls={}, cached_costs={}",
            oracle_calls,
            self.cost_cache.len()
        );
        Ok(out)
    }

    /// `pick_join_order(pushdown_operators(plan))`.
    pub fn optimize_query(&mut self, plan: &Plan) -> Result<Plan> {
        let pushed = self.pushdown_operators(plan)?;
        self.pick_join_order(&pushed)
    }

    /// Cost of a whole plan according to the configured oracle.
    pub fn plan_cost(&mut self, plan: &Plan) -> Result<Cost> {
        plan.validate()?;
        let root = plan.require_root()?;
        self.estimator().estimate(plan, root)
    }

    fn estimator(&mut self) -> CostEstimator<'_> {
        let estimator = CostEstimator::new(
            self.oracle.as_mut(),
            self.config.sample_size,
            self.config.use_estimates,
        );
        if self.config.cache_plan_costs {
            estimator.with_cache(&mut self.cost_cache)
        } else {
            estimator
        }
    }
}
