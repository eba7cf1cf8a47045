//! # Plan Arena
//!
//! A `Plan` is a single-rooted tree of operator nodes stored in an arena and
//! addressed by stable `NodeId`s. Rewrites relocate operators by reassigning child
//! slots (`Plan::attach`, `Plan::insert_above`) rather than by moving nodes, so an
//! id held on a traversal stack stays valid while the tree around it changes.
//!
//! ## Slots and Attach Points
//!
//! Every edge of the tree is named by an `AttachPoint`: a parent node plus the
//! `ChildSlot` (`Only`, `Left`, `Right`) the child occupies. The root edge is the
//! attach point with no parent. Inserting a unary node at an attach point wires it
//! as the new child of that slot and the former occupant becomes its child.
//!
//! ## Garbage
//!
//! Nodes detached by a rewrite remain in the arena but are unreachable from the
//! root. All queries (`relations`, `explain`, `validate`) only look at reachable
//! nodes; `Plan::compact` copies the reachable tree into a fresh arena.
//!
//! ## Tree Invariant
//!
//! Each reachable node is reachable from exactly one parent slot, and each node has
//! exactly as many children as its operator's arity. `Plan::validate` checks this
//! and every optimizer pass calls it on entry.

use crate::catalog::Schema;
use crate::error::{OptimizerError, Result};
use crate::expr::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

/// Index of a node in the plan arena.
pub type NodeId = u32;

/// The position a child occupies under its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChildSlot {
    /// The single input of a unary operator (also used for the root edge).
    Only,
    /// Left input of a binary operator.
    Left,
    /// Right input of a binary operator.
    Right,
}

impl ChildSlot {
    pub fn index(self) -> usize {
        match self {
            ChildSlot::Only | ChildSlot::Left => 0,
            ChildSlot::Right => 1,
        }
    }
}

/// An edge of the plan tree: the slot of `parent`, or the root when `parent` is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttachPoint {
    pub parent: Option<NodeId>,
    pub slot: ChildSlot,
}

impl AttachPoint {
    pub fn root() -> Self {
        Self {
            parent: None,
            slot: ChildSlot::Only,
        }
    }

    pub fn child_of(parent: NodeId, slot: ChildSlot) -> Self {
        Self {
            parent: Some(parent),
            slot,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A node of the arena: an operator and the ids of its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub op: Operator,
    pub children: Vec<NodeId>,
}

/// A query plan: an arena of nodes plus the root id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    nodes: Vec<PlanNode>,
    root: Option<NodeId>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Root id of a plan that has one.
    pub fn require_root(&self) -> Result<NodeId> {
        self.root
            .ok_or_else(|| OptimizerError::MalformedPlan("plan has no root".into()))
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    /// Number of nodes in the arena, reachable or not.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.nodes[id as usize]
    }

    pub fn get(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes.get(id as usize)
    }

    pub fn op(&self, id: NodeId) -> &Operator {
        &self.node(id).op
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// Append a node to the arena. The node is not attached anywhere.
    pub fn add_node(&mut self, op: Operator, children: Vec<NodeId>) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(PlanNode { op, children });
        id
    }

    // -----------------------------------------------------------------------
    // Builder helpers
    // -----------------------------------------------------------------------

    pub fn scan(&mut self, relation: impl Into<String>, schema: Schema) -> NodeId {
        self.add_node(
            Operator::TableScan {
                relation: relation.into(),
                schema,
            },
            vec![],
        )
    }

    pub fn select(&mut self, child: NodeId, predicate: Expr) -> NodeId {
        self.add_node(Operator::Select { predicate }, vec![child])
    }

    pub fn join(&mut self, left: NodeId, right: NodeId, condition: Expr, method: JoinMethod) -> NodeId {
        self.add_node(Operator::Join { condition, method }, vec![left, right])
    }

    pub fn union(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.add_node(Operator::Union, vec![left, right])
    }

    pub fn project(&mut self, child: NodeId, exprs: Vec<Expr>, aliases: Vec<String>) -> NodeId {
        self.add_node(Operator::Project { exprs, aliases }, vec![child])
    }

    pub fn group_by(&mut self, child: NodeId, group_by: Vec<Expr>, aggregates: Vec<AggExpr>) -> NodeId {
        self.add_node(Operator::GroupBy { group_by, aggregates }, vec![child])
    }

    pub fn sort(&mut self, child: NodeId, order: Vec<SortKey>) -> NodeId {
        self.add_node(Operator::Sort { order }, vec![child])
    }

    // -----------------------------------------------------------------------
    // Slot rewiring
    // -----------------------------------------------------------------------

    /// The node currently occupying `point`, if any.
    pub fn child_at(&self, point: AttachPoint) -> Option<NodeId> {
        match point.parent {
            None => self.root,
            Some(p) => self.get(p)?.children.get(point.slot.index()).copied(),
        }
    }

    /// Make `node` the occupant of `point`.
    pub fn attach(&mut self, point: AttachPoint, node: NodeId) -> Result<()> {
        match point.parent {
            None => {
                self.root = Some(node);
                Ok(())
            }
            Some(p) => {
                let slot = point.slot.index();
                let parent = self.nodes.get_mut(p as usize).ok_or_else(|| {
                    OptimizerError::MalformedPlan(format!("dangling attach point: node {} does not exist", p))
                })?;
                let child = parent.children.get_mut(slot).ok_or_else(|| {
                    OptimizerError::MalformedPlan(format!(
                        "dangling attach point: node {} has no {:?} slot",
                        p, point.slot
                    ))
                })?;
                *child = node;
                Ok(())
            }
        }
    }

    /// Insert a new unary operator at `point`, above the node that occupies it.
    pub fn insert_above(&mut self, point: AttachPoint, op: Operator) -> Result<NodeId> {
        let below = self.child_at(point).ok_or_else(|| {
            OptimizerError::MalformedPlan(format!("dangling attach point: {:?}", point))
        })?;
        let id = self.add_node(op, vec![below]);
        self.attach(point, id)?;
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Traversal and derived facts
    // -----------------------------------------------------------------------

    /// Check the tree invariant for the reachable part of the arena.
    pub fn validate(&self) -> Result<()> {
        let root = self.require_root()?;
        if self.get(root).is_none() {
            return Err(OptimizerError::MalformedPlan(format!("root {} does not exist", root)));
        }

        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let slot = &mut seen[id as usize];
            if *slot {
                return Err(OptimizerError::MalformedPlan(format!(
                    "node {} is reachable from more than one parent slot",
                    id
                )));
            }
            *slot = true;

            let node = self.node(id);
            if node.children.len() != node.op.arity() {
                return Err(OptimizerError::MalformedPlan(format!(
                    "{} node {} has {} children, expected {}",
                    node.op.kind(),
                    id,
                    node.children.len(),
                    node.op.arity()
                )));
            }
            for &child in &node.children {
                if self.get(child).is_none() {
                    return Err(OptimizerError::MalformedPlan(format!(
                        "node {} references missing child {}",
                        id, child
                    )));
                }
                stack.push(child);
            }
        }
        Ok(())
    }

    /// Node ids reachable from `id`, in pre-order (left before right).
    pub fn preorder(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            for &c in self.children(n).iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// Map from every node below `id` to the attach point it occupies.
    pub fn parent_map(&self, id: NodeId, at: AttachPoint) -> HashMap<NodeId, AttachPoint> {
        let mut parents = HashMap::new();
        parents.insert(id, at);
        for n in self.preorder(id) {
            let node = self.node(n);
            let slots: &[ChildSlot] = match node.children.len() {
                1 => &[ChildSlot::Only],
                2 => &[ChildSlot::Left, ChildSlot::Right],
                _ => &[],
            };
            for (&child, &slot) in node.children.iter().zip(slots) {
                parents.insert(child, AttachPoint::child_of(n, slot));
            }
        }
        parents
    }

    /// Base relations scanned anywhere in the plan.
    pub fn relations(&self) -> BTreeSet<RelationId> {
        match self.root {
            Some(root) => self.relations_of(root),
            None => BTreeSet::new(),
        }
    }

    /// Base relations scanned in the subtree rooted at `id`.
    pub fn relations_of(&self, id: NodeId) -> BTreeSet<RelationId> {
        self.preorder(id)
            .into_iter()
            .filter_map(|n| match self.op(n) {
                Operator::TableScan { relation, .. } => Some(relation.clone()),
                _ => None,
            })
            .collect()
    }

    /// Copy the subtree rooted at `id` into a fresh, compact plan.
    pub fn extract(&self, id: NodeId) -> Plan {
        let mut out = Plan::new();
        let root = self.copy_into(id, &mut out);
        out.set_root(root);
        out
    }

    /// Copy the reachable tree into a fresh arena, dropping garbage nodes.
    pub fn compact(&self) -> Plan {
        match self.root {
            Some(root) => self.extract(root),
            None => Plan::new(),
        }
    }

    /// Copy the subtree rooted at `id` into `dest`, returning the new subtree root.
    pub fn copy_into(&self, id: NodeId, dest: &mut Plan) -> NodeId {
        let node = self.node(id);
        let children = node
            .children
            .iter()
            .map(|&c| self.copy_into(c, dest))
            .collect();
        dest.add_node(node.op.clone(), children)
    }

    /// Structural identity of the subtree rooted at `id`.
    ///
    /// Two subtrees have the same signature iff they have the same shape, operators
    /// and expressions. Used as the exact-match key of the plan-cost cache.
    pub fn signature(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_signature(id, &mut out);
        out
    }

    fn write_signature(&self, id: NodeId, out: &mut String) {
        let node = self.node(id);
        let _ = write!(out, "{}", label(&node.op));
        if !node.children.is_empty() {
            out.push('[');
            for (i, &c) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_signature(c, out);
            }
            out.push(']');
        }
    }

    /// Indented, human-readable rendering of the reachable tree.
    pub fn explain(&self) -> String {
        match self.root {
            Some(root) => self.display(root, 0),
            None => "<empty plan>".to_string(),
        }
    }

    pub fn display(&self, id: NodeId, indent: usize) -> String {
        let mut out = String::new();
        for n in self.preorder_with_depth(id, indent) {
            let (node, depth) = n;
            let _ = writeln!(out, "{}{}", "  ".repeat(depth), label(self.op(node)));
        }
        out
    }

    fn preorder_with_depth(&self, id: NodeId, depth: usize) -> Vec<(NodeId, usize)> {
        let mut out = Vec::new();
        let mut stack = vec![(id, depth)];
        while let Some((n, d)) = stack.pop() {
            out.push((n, d));
            for &c in self.children(n).iter().rev() {
                stack.push((c, d + 1));
            }
        }
        out
    }
}

/// One-line label of an operator.
fn label(op: &Operator) -> String {
    match op {
        Operator::TableScan { relation, .. } => format!("TableScan({})", relation),
        Operator::Select { predicate } => format!("Select({})", predicate),
        Operator::Project { exprs, aliases } => {
            let cols: Vec<String> = exprs
                .iter()
                .zip(aliases.iter())
                .map(|(e, a)| format!("{} AS {}", e, a))
                .collect();
            format!("Project({})", cols.join(", "))
        }
        Operator::Join { condition, method } => format!("Join[{}]({})", method, condition),
        Operator::Union => "Union".to_string(),
        Operator::GroupBy { group_by, aggregates } => {
            let keys: Vec<String> = group_by.iter().map(|e| e.to_string()).collect();
            let aggs: Vec<String> = aggregates
                .iter()
                .map(|a| format!("{:?}({}) AS {}", a.func, a.arg, a.alias))
                .collect();
            format!("GroupBy({}; {})", keys.join(", "), aggs.join(", "))
        }
        Operator::Sort { order } => {
            let keys: Vec<String> = order
                .iter()
                .map(|k| format!("{} {}", k.expr, if k.ascending { "ASC" } else { "DESC" }))
                .collect();
            format!("Sort({})", keys.join(", "))
        }
    }
}
