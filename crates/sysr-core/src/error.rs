//! # Optimizer Errors
//!
//! Every pass of the optimizer reports failure synchronously to its caller; there
//! is no retry and no partial repair of a plan. The variants mirror the failure
//! classes an optimizer call can hit:
//!
//! - **Malformed plan**: the arena does not describe a tree (cycle, shared child,
//!   dangling id, wrong arity) or a relation is scanned twice inside a join block.
//! - **Attribution**: a predicate names an attribute no reachable scan produces,
//!   or one produced by two different relations.
//! - **Unsupported operator**: a pass met an operator it cannot reason about.
//! - **Empty / oversized relation set**: nothing to order, or too much to order.
//! - **Cost oracle**: the statistics service could not prepare, sample or cost a
//!   candidate. The search never substitutes a default cost.

use thiserror::Error;

/// Errors produced by the optimizer passes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizerError {
    /// The plan violates the tree invariant or is otherwise structurally invalid.
    #[error("malformed plan: {0}")]
    MalformedPlan(String),

    /// A predicate references an attribute that no reachable scan produces.
    #[error("attribute '{attribute}' is not produced by any reachable relation")]
    UnattributableAttribute { attribute: String },

    /// The same attribute name is produced by two different relations.
    #[error("attribute '{attribute}' is ambiguous: defined by '{first}' and '{second}'")]
    AmbiguousAttribute {
        attribute: String,
        first: String,
        second: String,
    },

    /// A traversal met an operator it cannot handle at that position.
    #[error("unsupported operator '{kind}' during {pass}")]
    UnsupportedOperator { kind: String, pass: &'static str },

    /// `pick_join_order` was given a plan without base relations.
    #[error("cannot order joins over an empty relation set")]
    EmptyRelationSet,

    /// The join block has more relations than the configured bound.
    #[error("join block has {count} relations, more than the configured maximum of {max}")]
    TooManyRelations { count: usize, max: usize },

    /// The cost oracle failed to prepare, sample or cost a candidate plan.
    #[error("cost oracle failure: {0}")]
    CostOracle(String),
}

/// Result alias used throughout the optimizer crates.
pub type Result<T> = std::result::Result<T, OptimizerError>;
