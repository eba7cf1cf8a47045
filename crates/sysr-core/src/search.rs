//! # System-R Join-Order Search
//!
//! This module implements bottom-up dynamic programming over relation subsets,
//! restricted to left-deep join trees.
//!
//! ## How It Works
//!
//! 1. **Join block**: the search reorders the part of the plan below the lowest
//!    `GroupBy`/`Sort`/`Project` on the root's unary chain. The chain above the
//!    block is copied on top of the result unchanged.
//! 2. **Leaves**: inside the block, the search descends through `Select` and
//!    `Join` only. Anything else is a leaf, copied unchanged and keyed by the
//!    relations it scans. The maximal subtree that scans exactly one relation is
//!    that relation's leg, so a `Union` of two scans of the same relation is one
//!    leg. A `GroupBy`, `Sort`, `Project` or `Union` over several relations is
//!    an opaque leaf that joins as a single unit.
//! 3. **Predicate dictionary**: every `Select` predicate and `Join` condition in
//!    the block is split into conjuncts and filed under the sorted set of
//!    relations it reads (`RelSetKey`).
//! 4. **Pass 1**: each leaf's memo entry is the leaf under a `Select` holding all
//!    conjuncts whose relations lie inside that leaf.
//! 5. **Pass n**: for every set `S` of `n` leaves and every leaf `rel` in `S`,
//!    the candidate is `Join(memo[S \ {rel}], memo[{rel}])`. Its condition
//!    conjoins every predicate whose relations lie inside `S`, touch `rel` and
//!    are not covered by `rel` alone; with none it is the literal `TRUE` (a cross
//!    product). Nested loops and block nested loops variants are both priced and
//!    the cheaper kept; the cheapest split becomes `memo[S]`.
//!
//! Relation-free conjuncts (constants) are applied above the final block root.
//!
//! ## Determinism
//!
//! Leaves are ordered by relation set, subsets are enumerated as lexicographic
//! combinations of leaves, splits try `rel` in ascending order and nested
//! loops is priced before block nested loops. A candidate replaces the incumbent
//! only when strictly cheaper, so ties go to the first one seen.
//!
//! ## Complexity
//!
//! The memo holds one entry per subset: O(2^n) memory and O(n · 2^n) candidate
//! pricings for n leaves. `SearchConfig::max_relations` bounds n.
//!
//! ## Scratch Arena
//!
//! Candidates are built in a private arena where memo entries are shared by every
//! candidate that extends them. Viewed from any candidate root the nodes still form
//! a tree, since the two inputs of a join scan disjoint relation sets. The winner
//! is copied out with `Plan::copy_into`.

use crate::error::{OptimizerError, Result};
use crate::expr::{Expr, JoinMethod, Operator, RelationId};
use crate::oracle::CostEstimator;
use crate::cost::Cost;
use crate::plan::{NodeId, Plan};
use crate::predicate::{decompose_predicate, rel_set_key, AttributeMap, RelSetKey};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};

/// Join methods the search considers, in pricing order.
const CANDIDATE_METHODS: [JoinMethod; 2] = [JoinMethod::NestedLoops, JoinMethod::BlockNestedLoops];

/// Configuration knobs for the join-order search.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Upper bound on the number of leaves in one join block.
    pub max_relations: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { max_relations: 15 }
    }
}

/// Best plan found so far for one relation subset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoEntry {
    /// Root of the entry in the scratch arena.
    pub node: NodeId,
    /// Cost reported by the oracle for that subtree.
    pub cost: Cost,
}

/// The part of a plan the search reorders.
#[derive(Debug, Default)]
struct JoinBlock {
    /// Relations of each leaf → its root in the input plan, ordered by key.
    leaves: Vec<(RelSetKey, NodeId)>,
    /// Conjuncts filed by the relations they read, in discovery order.
    predicates: BTreeMap<RelSetKey, Vec<Expr>>,
}

impl JoinBlock {
    fn collect(plan: &Plan, block_root: NodeId) -> Result<Self> {
        let map = AttributeMap::from_plan(plan, block_root)?;
        let mut block = JoinBlock::default();
        let mut leaves = BTreeMap::new();
        let mut seen: BTreeSet<RelationId> = BTreeSet::new();

        let mut stack = vec![block_root];
        while let Some(id) = stack.pop() {
            match plan.op(id) {
                Operator::Select { predicate } => {
                    block.file(predicate, &map)?;
                    stack.extend(plan.children(id).iter().copied());
                }
                Operator::Join { condition, .. } => {
                    block.file(condition, &map)?;
                    // Right first so the left subtree is visited first.
                    stack.extend(plan.children(id).iter().rev().copied());
                }
                op => {
                    let relations = plan.relations_of(id);
                    if relations.is_empty() {
                        return Err(OptimizerError::UnsupportedOperator {
                            kind: op.kind().to_string(),
                            pass: "join ordering",
                        });
                    }
                    if let Some(relation) = relations.iter().find(|r| seen.contains(*r)) {
                        return Err(OptimizerError::MalformedPlan(format!(
                            "relation '{}' is scanned in more than one place in the join block",
                            relation
                        )));
                    }
                    seen.extend(relations.iter().cloned());
                    leaves.insert(rel_set_key(&relations), id);
                }
            }
        }
        block.leaves = leaves.into_iter().collect();
        Ok(block)
    }

    fn file(&mut self, predicate: &Expr, map: &AttributeMap) -> Result<()> {
        for atom in decompose_predicate(predicate, map)? {
            self.predicates
                .entry(atom.key())
                .or_default()
                .push(atom.into_expr());
        }
        Ok(())
    }

    /// Conjuncts that become applicable when the leaf `rel` joins the rest of
    /// `subset`.
    fn join_predicates(&self, subset: &BTreeSet<RelationId>, rel: &[RelationId]) -> Vec<Expr> {
        self.predicates
            .iter()
            .filter(|(key, _)| {
                key.iter().all(|r| subset.contains(r))
                    && key.iter().any(|r| rel.contains(r))
                    && !key.iter().all(|r| rel.contains(r))
            })
            .flat_map(|(_, exprs)| exprs.iter().cloned())
            .collect()
    }

    /// Conjuncts evaluable on one leaf alone.
    fn leaf_predicates(&self, leaf: &[RelationId]) -> Vec<Expr> {
        self.predicates
            .iter()
            .filter(|(key, _)| !key.is_empty() && key.iter().all(|r| leaf.contains(r)))
            .flat_map(|(_, exprs)| exprs.iter().cloned())
            .collect()
    }

    fn predicates_for(&self, key: &[RelationId]) -> Vec<Expr> {
        self.predicates.get(key).cloned().unwrap_or_default()
    }
}

/// The System-R join-order search.
///
/// Owns the scratch arena and the subset memo of one optimization. Prices every
/// candidate through a `CostEstimator`.
pub struct JoinOrderSearch<'a> {
    estimator: CostEstimator<'a>,
    config: SearchConfig,
    scratch: Plan,
    memo: HashMap<RelSetKey, MemoEntry>,
}

impl<'a> JoinOrderSearch<'a> {
    pub fn new(estimator: CostEstimator<'a>, config: SearchConfig) -> Self {
        Self {
            estimator,
            config,
            scratch: Plan::new(),
            memo: HashMap::new(),
        }
    }

    pub fn estimator(&self) -> &CostEstimator<'a> {
        &self.estimator
    }

    /// Best entry recorded for a relation subset.
    pub fn memo_entry(&self, relations: &RelSetKey) -> Option<&MemoEntry> {
        self.memo.get(relations)
    }

    /// The best plan recorded for a relation subset, as a standalone plan.
    pub fn memo_plan(&self, relations: &RelSetKey) -> Option<Plan> {
        self.memo.get(relations).map(|e| self.scratch.extract(e.node))
    }

    /// Every subset in the memo.
    pub fn memo_keys(&self) -> impl Iterator<Item = &RelSetKey> {
        self.memo.keys()
    }

    /// Reorder the joins of `plan` into the cheapest left-deep tree.
    ///
    /// The memo grows exponentially with the number of leaves in the join
    /// block; blocks with more than `SearchConfig::max_relations` leaves are
    /// rejected with `TooManyRelations`.
    pub fn optimize(&mut self, plan: &Plan) -> Result<Plan> {
        let root = plan.root().ok_or(OptimizerError::EmptyRelationSet)?;
        plan.validate()?;

        self.scratch = Plan::new();
        self.memo.clear();

        let (chain, block_root) = split_join_block(plan, root);
        let block = JoinBlock::collect(plan, block_root)?;
        let leaves = block.leaves.len();

        if leaves == 0 {
            return Err(OptimizerError::EmptyRelationSet);
        }
        if leaves > self.config.max_relations {
            return Err(OptimizerError::TooManyRelations {
                count: leaves,
                max: self.config.max_relations,
            });
        }

        debug!(
            "Starting join-order search: leaves={}, predicate_keys={}, chain_above_block={}",
            leaves,
            block.predicates.len(),
            chain.len()
        );

        self.first_pass(plan, &block)?;
        for size in 2..=leaves {
            self.nth_pass(&block, size)?;
        }

        let full_key = rel_set_key(&plan.relations_of(block_root));
        let best = *self.memo.get(&full_key).ok_or_else(|| {
            OptimizerError::MalformedPlan("no plan found for the full relation set".into())
        })?;
        debug!(
            "Join-order search complete: cost={:.1}, memo_entries={}, oracle_calls={}",
            best.cost.total,
            self.memo.len(),
            self.estimator.oracle_calls()
        );

        // Copy the winner out and restore what sat above the block.
        let mut out = Plan::new();
        let mut top = self.scratch.copy_into(best.node, &mut out);
        let constants = block.predicates_for(&[]);
        if !constants.is_empty() {
            top = out.select(top, Expr::conjoin(constants));
        }
        for &n in chain.iter().rev() {
            top = out.add_node(plan.op(n).clone(), vec![top]);
        }
        out.set_root(top);
        Ok(out)
    }

    fn first_pass(&mut self, plan: &Plan, block: &JoinBlock) -> Result<()> {
        for (key, leaf) in &block.leaves {
            let mut node = plan.copy_into(*leaf, &mut self.scratch);
            let predicates = block.leaf_predicates(key);
            if !predicates.is_empty() {
                node = self.scratch.select(node, Expr::conjoin(predicates));
            }
            let cost = self.estimator.estimate(&self.scratch, node)?;
            trace!("Pass 1: {:?} cost={:.1}", key, cost.total);
            self.memo.insert(key.clone(), MemoEntry { node, cost });
        }
        Ok(())
    }

    fn nth_pass(&mut self, block: &JoinBlock, size: usize) -> Result<()> {
        let mut subsets = 0usize;
        for indices in combinations(block.leaves.len(), size) {
            let subset: BTreeSet<RelationId> = indices
                .iter()
                .flat_map(|&i| block.leaves[i].0.iter().cloned())
                .collect();
            let mut best: Option<MemoEntry> = None;

            for &i in &indices {
                let rel = &block.leaves[i].0;
                let rest: BTreeSet<RelationId> =
                    subset.iter().filter(|r| !rel.contains(*r)).cloned().collect();
                let left = self.entry(&rel_set_key(&rest))?;
                let right = self.entry(rel)?;
                let condition = Expr::conjoin(block.join_predicates(&subset, rel));

                let candidate = self.best_method(left, right, &condition)?;
                trace!(
                    "Pass {}: {:?} split on {:?} cost={:.1}",
                    size,
                    subset,
                    rel,
                    candidate.cost.total
                );
                if best.map_or(true, |b| candidate.cost < b.cost) {
                    best = Some(candidate);
                }
            }

            if let Some(entry) = best {
                self.memo.insert(rel_set_key(&subset), entry);
            }
            subsets += 1;
        }
        debug!("Pass {} complete: subsets={}", size, subsets);
        Ok(())
    }

    /// Price every join method for one split and keep the cheapest.
    fn best_method(&mut self, left: MemoEntry, right: MemoEntry, condition: &Expr) -> Result<MemoEntry> {
        let mut best: Option<MemoEntry> = None;
        for method in CANDIDATE_METHODS {
            let node = self.scratch.join(left.node, right.node, condition.clone(), method);
            let cost = self.estimator.estimate(&self.scratch, node)?;
            if best.map_or(true, |b| cost < b.cost) {
                best = Some(MemoEntry { node, cost });
            }
        }
        best.ok_or_else(|| OptimizerError::MalformedPlan("no join method to price".into()))
    }

    fn entry(&self, key: &RelSetKey) -> Result<MemoEntry> {
        self.memo.get(key).copied().ok_or_else(|| {
            OptimizerError::MalformedPlan(format!("missing memo entry for {:?}", key))
        })
    }
}

/// Split the root's unary chain at its lowest `GroupBy`/`Sort`/`Project`.
///
/// Returns the nodes kept above the join block (top-down) and the block root.
fn split_join_block(plan: &Plan, root: NodeId) -> (Vec<NodeId>, NodeId) {
    let mut chain = Vec::new();
    let mut boundary = 0;
    let mut cur = root;
    while let [child] = plan.children(cur) {
        chain.push(cur);
        if matches!(
            plan.op(cur),
            Operator::GroupBy { .. } | Operator::Sort { .. } | Operator::Project { .. }
        ) {
            boundary = chain.len();
        }
        cur = *child;
    }
    chain.truncate(boundary);
    let block_root = match chain.last() {
        Some(&lowest) => plan.children(lowest)[0],
        None => root,
    };
    (chain, block_root)
}

/// All `k`-element index combinations of `0..n`, in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k == 0 || k > n {
        return out;
    }
    let mut current: Vec<usize> = (0..k).collect();
    loop {
        out.push(current.clone());
        // Rightmost index that can still move.
        let Some(i) = (0..k).rev().find(|&i| current[i] < n - k + i) else {
            return out;
        };
        current[i] += 1;
        for j in i + 1..k {
            current[j] = current[j - 1] + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DataType, InMemoryCatalog, Schema};
    use crate::oracle::StatisticsOracle;
    use crate::stats::Statistics;
    use std::sync::Arc;

    #[test]
    fn test_combinations_lexicographic() {
        assert_eq!(
            combinations(4, 2),
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        assert_eq!(combinations(3, 3), vec![vec![0, 1, 2]]);
        assert!(combinations(2, 3).is_empty());
    }

    #[test]
    fn test_split_join_block() {
        let mut plan = Plan::new();
        let a = plan.scan("a", Schema::from_pairs(&[("x", DataType::Int)]));
        let sel = plan.select(a, Expr::gt(Expr::col("x"), Expr::int(1)));
        let proj = plan.project(sel, vec![Expr::col("x")], vec!["x".into()]);
        let having = plan.select(proj, Expr::gt(Expr::col("x"), Expr::int(2)));
        plan.set_root(having);

        let (chain, block_root) = split_join_block(&plan, having);
        assert_eq!(chain, vec![having, proj]);
        assert_eq!(block_root, sel);

        let (chain, block_root) = split_join_block(&plan, sel);
        assert!(chain.is_empty());
        assert_eq!(block_root, sel);
    }

    #[test]
    fn test_union_inside_block_is_a_leg() {
        let schema = Schema::from_pairs(&[("x", DataType::Int)]);
        let mut plan = Plan::new();
        let a1 = plan.scan("a", schema.clone());
        let a2 = plan.scan("a", schema.clone());
        let u = plan.union(a1, a2);
        let b = plan.scan("b", Schema::from_pairs(&[("y", DataType::Int)]));
        let j = plan.join(u, b, Expr::equal(Expr::col("x"), Expr::col("y")), JoinMethod::NestedLoops);
        plan.set_root(j);

        let block = JoinBlock::collect(&plan, j).unwrap();
        assert_eq!(
            block.leaves,
            vec![(vec!["a".to_string()], u), (vec!["b".to_string()], b)]
        );
        assert_eq!(block.predicates.len(), 1);
    }

    #[test]
    fn test_self_join_rejected() {
        let schema = Schema::from_pairs(&[("x", DataType::Int)]);
        let mut plan = Plan::new();
        let a1 = plan.scan("a", schema.clone());
        let a2 = plan.scan("a", schema);
        let j = plan.join(a1, a2, Expr::always_true(), JoinMethod::NestedLoops);
        plan.set_root(j);

        let err = JoinBlock::collect(&plan, j).unwrap_err();
        assert!(matches!(err, OptimizerError::MalformedPlan(_)));
    }

    #[test]
    fn test_multi_relation_group_by_is_one_leaf() {
        let mut plan = Plan::new();
        let a = plan.scan("a", Schema::from_pairs(&[("x", DataType::Int)]));
        let b = plan.scan("b", Schema::from_pairs(&[("y", DataType::Int)]));
        let j = plan.join(a, b, Expr::equal(Expr::col("x"), Expr::col("y")), JoinMethod::NestedLoops);
        let g = plan.group_by(j, vec![Expr::col("x")], vec![]);
        let c = plan.scan("c", Schema::from_pairs(&[("z", DataType::Int)]));
        let above = plan.select(g, Expr::gt(Expr::col("x"), Expr::int(1)));
        let top = plan.join(above, c, Expr::equal(Expr::col("x"), Expr::col("z")), JoinMethod::NestedLoops);
        plan.set_root(top);

        let block = JoinBlock::collect(&plan, top).unwrap();
        let ab = vec!["a".to_string(), "b".to_string()];
        assert_eq!(block.leaves, vec![(ab.clone(), g), (vec!["c".to_string()], c)]);
        // The join inside the group-by is not part of the block.
        assert!(!block.predicates.contains_key(&ab));
        assert_eq!(block.leaf_predicates(&ab), vec![Expr::gt(Expr::col("x"), Expr::int(1))]);

        let all: BTreeSet<RelationId> = ["a", "b", "c"].iter().map(|r| r.to_string()).collect();
        assert_eq!(
            block.join_predicates(&all, &["c".to_string()]),
            vec![Expr::equal(Expr::col("x"), Expr::col("z"))]
        );
        assert_eq!(
            block.join_predicates(&all, &ab),
            vec![Expr::equal(Expr::col("x"), Expr::col("z"))]
        );
    }

    #[test]
    fn test_leaves_overlapping_a_relation_rejected() {
        let mut plan = Plan::new();
        let a1 = plan.scan("a", Schema::from_pairs(&[("x", DataType::Int)]));
        let b = plan.scan("b", Schema::from_pairs(&[("y", DataType::Int)]));
        let u = plan.union(a1, b);
        let p = plan.project(u, vec![Expr::col("x")], vec!["x".into()]);
        let a2 = plan.scan("a", Schema::from_pairs(&[("x", DataType::Int)]));
        let top = plan.join(p, a2, Expr::always_true(), JoinMethod::NestedLoops);
        plan.set_root(top);

        let err = JoinBlock::collect(&plan, top).unwrap_err();
        assert!(matches!(err, OptimizerError::MalformedPlan(_)));
    }

    #[test]
    fn test_too_many_relations() {
        let mut catalog = InMemoryCatalog::new();
        let mut plan = Plan::new();
        let mut top = None;
        for i in 0..4 {
            let name = format!("r{}", i);
            let column = format!("c{}", i);
            let schema = Schema::from_pairs(&[(column.as_str(), DataType::Int)]);
            catalog.add_relation(&name, schema.clone(), Statistics::new(10.0, 80.0));
            let s = plan.scan(name, schema);
            top = Some(match top {
                None => s,
                Some(t) => plan.join(t, s, Expr::always_true(), JoinMethod::NestedLoops),
            });
        }
        plan.set_root(top.unwrap());

        let mut oracle = StatisticsOracle::with_default_model(Arc::new(catalog));
        let estimator = CostEstimator::new(&mut oracle, 100, true);
        let mut search = JoinOrderSearch::new(estimator, SearchConfig { max_relations: 3 });
        assert_eq!(
            search.optimize(&plan).unwrap_err(),
            OptimizerError::TooManyRelations { count: 4, max: 3 }
        );
    }

    #[test]
    fn test_empty_plan() {
        let mut oracle = StatisticsOracle::with_default_model(Arc::new(InMemoryCatalog::new()));
        let estimator = CostEstimator::new(&mut oracle, 100, true);
        let mut search = JoinOrderSearch::new(estimator, SearchConfig::default());
        assert_eq!(
            search.optimize(&Plan::new()).unwrap_err(),
            OptimizerError::EmptyRelationSet
        );
    }
}
