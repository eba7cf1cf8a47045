//! # Predicate Decomposition and Attribution
//!
//! Both optimizer passes reason about predicates one conjunct at a time and need
//! to know which base relations each conjunct reads:
//!
//! 1. **Decompose**: split a predicate at its top-level ANDs (`Expr::conjuncts`).
//!    A disjunction is one atomic unit even if it spans several relations, since
//!    neither branch can be evaluated on its own.
//! 2. **Attribute**: map every referenced attribute to the relation that defines
//!    it through the `AttributeMap`, and union the results.
//!
//! The resulting `AtomicPredicate`s are immutable. Their relation set, rendered as
//! a sorted `RelSetKey`, is how the join-order search files predicates by subset.

use crate::catalog::Schema;
use crate::error::{OptimizerError, Result};
use crate::expr::{ColumnRef, Expr, Operator, RelationId};
use crate::plan::{NodeId, Plan};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Canonical (sorted) form of a relation set, used as a memo / dictionary key.
pub type RelSetKey = Vec<RelationId>;

pub fn rel_set_key(relations: &BTreeSet<RelationId>) -> RelSetKey {
    relations.iter().cloned().collect()
}

/// Attribute-origin map: attribute name → defining base relation.
///
/// Built from the `TableScan` nodes reachable from one plan node, once per pass.
/// Names introduced by a `Project` or `GroupBy` that no scan defines are
/// attributed to the lowest-named relation below the node that introduces them.
#[derive(Debug, Clone, Default)]
pub struct AttributeMap {
    origins: HashMap<String, RelationId>,
    fields: HashMap<RelationId, HashSet<String>>,
    derived: HashMap<String, RelationId>,
}

impl AttributeMap {
    /// Build the map from every scan reachable from `id`.
    pub fn from_plan(plan: &Plan, id: NodeId) -> Result<Self> {
        let mut map = AttributeMap::default();
        let nodes = plan.preorder(id);
        for &n in &nodes {
            if let Operator::TableScan { relation, schema } = plan.op(n) {
                map.add_relation(relation, schema)?;
            }
        }
        for &n in &nodes {
            let names: Vec<&str> = match plan.op(n) {
                Operator::Project { aliases, .. } => aliases.iter().map(String::as_str).collect(),
                Operator::GroupBy { aggregates, .. } => {
                    aggregates.iter().map(|a| a.alias.as_str()).collect()
                }
                _ => continue,
            };
            let Some(relation) = plan.relations_of(n).into_iter().next() else {
                continue;
            };
            for name in names {
                map.add_derived(name, &relation)?;
            }
        }
        Ok(map)
    }

    /// Register an output name computed above `relation`. Scan attributes take
    /// precedence; the same name derived over two relations is ambiguous.
    pub fn add_derived(&mut self, name: &str, relation: &str) -> Result<()> {
        if self.origins.contains_key(name) {
            return Ok(());
        }
        match self.derived.get(name) {
            Some(existing) if existing != relation => Err(OptimizerError::AmbiguousAttribute {
                attribute: name.to_string(),
                first: existing.clone(),
                second: relation.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.derived.insert(name.to_string(), relation.to_string());
                Ok(())
            }
        }
    }

    /// Register the attributes of one relation.
    ///
    /// Scanning the same relation twice is fine; two different relations defining
    /// the same attribute name is `AmbiguousAttribute`.
    pub fn add_relation(&mut self, relation: &str, schema: &Schema) -> Result<()> {
        for name in schema.field_names() {
            match self.origins.get(name) {
                Some(existing) if existing != relation => {
                    return Err(OptimizerError::AmbiguousAttribute {
                        attribute: name.to_string(),
                        first: existing.clone(),
                        second: relation.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    self.origins.insert(name.to_string(), relation.to_string());
                }
            }
        }
        self.fields
            .entry(relation.to_string())
            .or_default()
            .extend(schema.field_names().map(str::to_string));
        Ok(())
    }

    pub fn relations(&self) -> BTreeSet<RelationId> {
        self.fields.keys().cloned().collect()
    }

    /// The relation defining a column. Qualified columns resolve to their qualifier.
    pub fn relation_of(&self, column: &ColumnRef) -> Result<RelationId> {
        let unattributable = || OptimizerError::UnattributableAttribute {
            attribute: column.to_string(),
        };
        match &column.table {
            Some(table) => {
                let defined = self
                    .fields
                    .get(table)
                    .is_some_and(|fields| fields.contains(&column.name));
                if defined {
                    Ok(table.clone())
                } else {
                    Err(unattributable())
                }
            }
            None => self
                .origins
                .get(&column.name)
                .or_else(|| self.derived.get(&column.name))
                .cloned()
                .ok_or_else(unattributable),
        }
    }

    /// Union of the relations defining every attribute `expr` references.
    pub fn relations_of(&self, expr: &Expr) -> Result<BTreeSet<RelationId>> {
        expr.columns()
            .into_iter()
            .map(|c| self.relation_of(c))
            .collect()
    }
}

/// A single conjunct with its cached relation-set attribution.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicPredicate {
    expr: Expr,
    relations: BTreeSet<RelationId>,
}

impl AtomicPredicate {
    pub fn new(expr: Expr, map: &AttributeMap) -> Result<Self> {
        let relations = map.relations_of(&expr)?;
        Ok(Self { expr, relations })
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn into_expr(self) -> Expr {
        self.expr
    }

    pub fn relations(&self) -> &BTreeSet<RelationId> {
        &self.relations
    }

    pub fn key(&self) -> RelSetKey {
        rel_set_key(&self.relations)
    }

    /// The relation of a single-relation predicate.
    pub fn single_relation(&self) -> Option<&RelationId> {
        match self.relations.len() {
            1 => self.relations.iter().next(),
            _ => None,
        }
    }
}

/// Split a predicate into attributed conjuncts.
///
/// Literal `TRUE` conjuncts (cross-product conditions) carry no information and
/// are dropped.
pub fn decompose_predicate(expr: &Expr, map: &AttributeMap) -> Result<Vec<AtomicPredicate>> {
    expr.conjuncts()
        .into_iter()
        .filter(|c| !c.is_always_true())
        .map(|c| AtomicPredicate::new(c.clone(), map))
        .collect()
}

/// Decompose a list of predicates, keeping the conjuncts grouped by source.
pub fn decompose<'a>(
    predicates: impl IntoIterator<Item = &'a Expr>,
    map: &AttributeMap,
) -> Result<Vec<AtomicPredicate>> {
    let mut out = Vec::new();
    for p in predicates {
        out.extend(decompose_predicate(p, map)?);
    }
    Ok(out)
}
