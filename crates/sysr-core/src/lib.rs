//! # sysr-core: System-R Query Optimizer Core
//!
//! This crate implements the data structures and the cost-based join-order search
//! of a System-R style optimizer. The rewrite passes that move predicates live in
//! `sysr-rules`; this crate provides everything they share.
//!
//! ## Module Overview
//!
//! - **`plan`**: The plan arena. Nodes are addressed by stable `NodeId`s and
//!   rewired through `AttachPoint`s instead of being moved.
//! - **`expr`**: Scalar expressions, the closed `Operator` enum and join methods.
//! - **`predicate`**: Conjunct decomposition and attribution of predicates to the
//!   base relations that define their attributes.
//! - **`search`**: The System-R dynamic program over relation subsets (left-deep).
//! - **`oracle`**: The cost oracle protocol (prepare / sample / cost), the
//!   catalog-backed default oracle and the plan-cost cache.
//! - **`cost`**: Cost value and the page-based default cost model.
//! - **`stats`**: Statistics structures and cardinality derivation formulas.
//! - **`catalog`**: Catalog trait for relation schemas and statistics.
//! - **`error`**: The optimizer error type.

pub mod catalog;
pub mod cost;
pub mod error;
pub mod expr;
pub mod oracle;
pub mod plan;
pub mod predicate;
pub mod search;
pub mod stats;

pub use error::{OptimizerError, Result};
