//! # Predicate Pushdown
//!
//! Moves every selection predicate to the lowest point of the plan where it can
//! still be evaluated, without crossing the scope it was written in.
//!
//! ```text
//! Before: Select(eid > 0 AND id > 0 AND (eid = 5 OR id = 6),
//!                Join(Scan(employee), Scan(department)))
//! After:  Select((eid = 5 OR id = 6),
//!                Join(Select(id > 0, Scan(employee)),
//!                     Select(eid > 0, Scan(department))))
//! ```
//!
//! ## Placement
//!
//! - **Single-relation** conjuncts go directly above the maximal subtree inside
//!   their scope that scans only that relation. Starting at a scan, the target
//!   moves up through `Union` nodes while the union still reads only that
//!   relation, so a filter over `Union(Scan(e), Scan(e))` lands above the union
//!   rather than being duplicated into each branch.
//! - **Multi-relation** and constant conjuncts go directly above their scope root.
//!   For a select at the top of the plan that is the plan root.
//! - `GroupBy` is a boundary: a conjunct never moves below one. A single-relation
//!   conjunct whose scans all sit below a `GroupBy` stays above its scope root.
//! - A conjunct moves below a `Project` only if the projection forwards every
//!   attribute it reads as a bare column under the same name. A filter on a
//!   renamed or computed output stays above the projection.
//!
//! All conjuncts aimed at the same slot are conjoined into a single `Select`.

use crate::linearize::{remove_unary_plan, AttachSite, Linearized};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use sysr_core::error::{OptimizerError, Result};
use sysr_core::expr::{Expr, Operator, RelationId};
use sysr_core::plan::{AttachPoint, NodeId, Plan};
use sysr_core::predicate::{decompose_predicate, AtomicPredicate, AttributeMap};
use tracing::{debug, trace};

/// An attributed conjunct together with the scope it may move within.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedPredicate {
    pub predicate: AtomicPredicate,
    pub scope: NodeId,
}

/// Decompose the selects removed by the linearizer into scoped conjuncts.
pub fn decompose_selects(linearized: &Linearized) -> Result<Vec<ScopedPredicate>> {
    let root = linearized.plan.require_root()?;
    let map = AttributeMap::from_plan(&linearized.plan, root)?;

    let mut out = Vec::new();
    for removed in &linearized.removed {
        for predicate in decompose_predicate(&removed.predicate, &map)? {
            out.push(ScopedPredicate {
                predicate,
                scope: removed.scope,
            });
        }
    }
    Ok(out)
}

/// Reinsert conjuncts into a stripped plan.
///
/// `attach_points` and `parents` must describe `plan` as it was stripped; they
/// are read before any select is inserted.
pub fn place_predicates(
    mut plan: Plan,
    predicates: Vec<ScopedPredicate>,
    attach_points: &BTreeMap<RelationId, Vec<AttachSite>>,
    parents: &HashMap<NodeId, AttachPoint>,
) -> Result<Plan> {
    let mut targets: BTreeMap<AttachPoint, Vec<Expr>> = BTreeMap::new();

    for scoped in predicates {
        let scope = scoped.scope;
        check_in_scope(&plan, &scoped.predicate, scope)?;
        let nodes = pushdown_region(&plan, scope, scoped.predicate.expr());

        let mut points: BTreeSet<AttachPoint> = match scoped.predicate.single_relation() {
            Some(relation) => attach_points
                .get(relation)
                .into_iter()
                .flatten()
                .filter(|site| nodes.contains(&site.scan))
                .map(|site| attach_point(parents, hoist(&plan, parents, site.scan, scope)))
                .collect::<Result<_>>()?,
            None => BTreeSet::new(),
        };
        if points.is_empty() {
            points.insert(attach_point(parents, scope)?);
        }
        for point in points {
            trace!("Placing {} at {:?}", scoped.predicate.expr(), point);
            targets
                .entry(point)
                .or_default()
                .push(scoped.predicate.expr().clone());
        }
    }

    let placed = targets.len();
    for (point, exprs) in targets {
        plan.insert_above(
            point,
            Operator::Select {
                predicate: Expr::conjoin(exprs),
            },
        )?;
    }
    debug!("Placed predicates: selects={}", placed);
    Ok(plan)
}

/// Strip every select from `plan` and push its conjuncts down.
///
/// The result is compacted: nodes detached during the rewrite are dropped.
pub fn pushdown_operators(plan: &Plan) -> Result<Plan> {
    let linearized = remove_unary_plan(plan)?;
    let predicates = decompose_selects(&linearized)?;
    let Linearized {
        plan: stripped,
        attach_points,
        parents,
        ..
    } = linearized;
    let placed = place_predicates(stripped, predicates, &attach_points, &parents)?;
    Ok(placed.compact())
}

/// Highest node above `scan` (within `scope`) that still reads only its relation
/// through `Union`s.
fn hoist(plan: &Plan, parents: &HashMap<NodeId, AttachPoint>, scan: NodeId, scope: NodeId) -> NodeId {
    let relations = plan.relations_of(scan);
    let mut current = scan;
    while current != scope {
        let Some(parent) = parents.get(&current).and_then(|p| p.parent) else {
            break;
        };
        if !matches!(plan.op(parent), Operator::Union) || plan.relations_of(parent) != relations {
            break;
        }
        current = parent;
    }
    current
}

/// Nodes of the scope `predicate` may move down to: everything below `scope`
/// except the inputs of a `GroupBy`, and the inputs of a `Project` that does not
/// forward the attributes it reads.
fn pushdown_region(plan: &Plan, scope: NodeId, predicate: &Expr) -> HashSet<NodeId> {
    let mut region = HashSet::new();
    let mut stack = vec![scope];
    while let Some(id) = stack.pop() {
        region.insert(id);
        let descend = match plan.op(id) {
            Operator::GroupBy { .. } => false,
            Operator::Project { exprs, aliases } => forwards(exprs, aliases, predicate),
            _ => true,
        };
        if descend {
            stack.extend(plan.children(id).iter().copied());
        }
    }
    region
}

/// Whether a projection outputs every column `predicate` reads unchanged.
fn forwards(exprs: &[Expr], aliases: &[String], predicate: &Expr) -> bool {
    predicate.columns().into_iter().all(|column| {
        exprs.iter().zip(aliases).any(|(expr, alias)| {
            *alias == column.name && matches!(expr, Expr::Column(c) if c.name == column.name)
        })
    })
}

fn attach_point(parents: &HashMap<NodeId, AttachPoint>, node: NodeId) -> Result<AttachPoint> {
    parents.get(&node).copied().ok_or_else(|| {
        OptimizerError::MalformedPlan(format!("node {} is not reachable from the root", node))
    })
}

/// Every relation the predicate reads must be scanned inside its scope.
fn check_in_scope(plan: &Plan, predicate: &AtomicPredicate, scope: NodeId) -> Result<()> {
    let available = plan.relations_of(scope);
    if predicate.relations().is_subset(&available) {
        Ok(())
    } else {
        Err(unattributable(predicate))
    }
}

fn unattributable(predicate: &AtomicPredicate) -> OptimizerError {
    OptimizerError::UnattributableAttribute {
        attribute: predicate
            .expr()
            .columns()
            .first()
            .map(|c| c.to_string())
            .unwrap_or_else(|| predicate.expr().to_string()),
    }
}
