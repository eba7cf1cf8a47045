//! # Catalog Interface
//!
//! The catalog provides the optimizer with metadata about base relations: their
//! schemas and table-level statistics. Schemas feed the attribute-origin map used
//! to attribute predicates to relations; statistics feed the cost oracle.
//!
//! ## Trait Design
//!
//! The `Catalog` trait is minimal and used behind a trait object (`dyn Catalog`)
//! so that different storage layers can provide metadata. `InMemoryCatalog` is a
//! HashMap-backed implementation populated programmatically, used by tests and by
//! the HTTP service (which receives statistics with each request).

use crate::expr::RelationId;
use crate::stats::Statistics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute types known to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int,
    Float,
    Text,
    Bool,
}

impl DataType {
    /// Fixed on-page width in bytes, used when statistics carry no row size.
    pub fn width(&self) -> f64 {
        match self {
            DataType::Int | DataType::Float => 8.0,
            DataType::Text => 32.0,
            DataType::Bool => 1.0,
        }
    }
}

/// A named, typed attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

/// Ordered list of attributes produced by a relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Build a schema from `(name, type)` pairs.
    pub fn from_pairs(pairs: &[(&str, DataType)]) -> Self {
        Self {
            fields: pairs
                .iter()
                .map(|(name, data_type)| Field {
                    name: (*name).to_string(),
                    data_type: *data_type,
                })
                .collect(),
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Sum of the attribute widths, in bytes.
    pub fn row_width(&self) -> f64 {
        self.fields.iter().map(|f| f.data_type.width()).sum()
    }
}

/// Catalog provides schema and statistics information.
pub trait Catalog: Send + Sync {
    fn schema_of(&self, relation: &str) -> Option<Schema>;
    fn stats_of(&self, relation: &str) -> Option<Statistics>;
}

/// In-memory catalog for testing and for per-request catalogs in the service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    /// Schemas keyed by relation id.
    pub schemas: HashMap<RelationId, Schema>,
    /// Table-level statistics keyed by relation id.
    pub table_stats: HashMap<RelationId, Statistics>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_relation(&mut self, relation: &str, schema: Schema, stats: Statistics) {
        self.schemas.insert(relation.to_string(), schema);
        self.table_stats.insert(relation.to_string(), stats);
    }
}

impl Catalog for InMemoryCatalog {
    fn schema_of(&self, relation: &str) -> Option<Schema> {
        self.schemas.get(relation).cloned()
    }

    fn stats_of(&self, relation: &str) -> Option<Statistics> {
        self.table_stats.get(relation).cloned()
    }
}
