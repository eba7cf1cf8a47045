//! # Plan Linearizer
//!
//! Strips every `Select` out of a plan so the placer can put the predicates back
//! at their lowest valid position.
//!
//! ```text
//! Before: Select(p, Join(Select(q, Scan(a)), Scan(b)))
//! After:  Join(Scan(a), Scan(b))     removed: [p @ Join, q @ Scan(a)]
//! ```
//!
//! Each removed select remembers its *scope*: the first non-`Select` node below
//! it. A predicate may move anywhere inside its scope but never above it, which
//! keeps predicates under a `Union`, `GroupBy` or `Project` inside the branch they
//! were written in.
//!
//! The traversal uses an explicit stack of `(node, attach point)` pairs, so every
//! node is visited once and each splice only rewrites the slot it came from.

use std::collections::{BTreeMap, HashMap};
use sysr_core::error::Result;
use sysr_core::expr::{Expr, Operator, RelationId};
use sysr_core::plan::{AttachPoint, ChildSlot, NodeId, Plan};
use tracing::debug;

/// A select removed from the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedSelect {
    pub predicate: Expr,
    /// First non-`Select` node below the removed select, in the stripped plan.
    pub scope: NodeId,
}

/// A scan and the slot it occupies in the stripped plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachSite {
    pub scan: NodeId,
    pub point: AttachPoint,
}

/// Result of `remove_unary_plan`.
#[derive(Debug, Clone)]
pub struct Linearized {
    /// The plan without selects. Removed nodes stay in the arena as garbage.
    pub plan: Plan,
    /// Removed selects, top-down in traversal order.
    pub removed: Vec<RemovedSelect>,
    /// Scan sites of every relation, in traversal order.
    pub attach_points: BTreeMap<RelationId, Vec<AttachSite>>,
    /// Attach point of every reachable node of the stripped plan.
    pub parents: HashMap<NodeId, AttachPoint>,
}

/// Remove every `Select` from `plan`.
pub fn remove_unary_plan(plan: &Plan) -> Result<Linearized> {
    plan.validate()?;
    let mut stripped = plan.clone();
    let root = stripped.require_root()?;

    let mut removed = Vec::new();
    let mut attach_points: BTreeMap<RelationId, Vec<AttachSite>> = BTreeMap::new();

    let mut stack = vec![(root, AttachPoint::root())];
    while let Some((id, at)) = stack.pop() {
        let children = stripped.children(id).to_vec();
        match stripped.op(id) {
            Operator::Select { predicate } => {
                let predicate = predicate.clone();
                let child = children[0];
                stripped.attach(at, child)?;
                removed.push(RemovedSelect {
                    predicate,
                    scope: first_non_select(&stripped, child),
                });
                stack.push((child, at));
            }
            Operator::TableScan { relation, .. } => {
                attach_points
                    .entry(relation.clone())
                    .or_default()
                    .push(AttachSite { scan: id, point: at });
            }
            Operator::Project { .. } | Operator::GroupBy { .. } | Operator::Sort { .. } => {
                stack.push((children[0], AttachPoint::child_of(id, ChildSlot::Only)));
            }
            Operator::Join { .. } | Operator::Union => {
                stack.push((children[1], AttachPoint::child_of(id, ChildSlot::Right)));
                stack.push((children[0], AttachPoint::child_of(id, ChildSlot::Left)));
            }
        }
    }

    let stripped_root = stripped.require_root()?;
    let parents = stripped.parent_map(stripped_root, AttachPoint::root());
    debug!(
        "Linearized plan: removed_selects={}, relations={}",
        removed.len(),
        attach_points.len()
    );

    Ok(Linearized {
        plan: stripped,
        removed,
        attach_points,
        parents,
    })
}

fn first_non_select(plan: &Plan, mut id: NodeId) -> NodeId {
    while let Operator::Select { .. } = plan.op(id) {
        id = plan.children(id)[0];
    }
    id
}
