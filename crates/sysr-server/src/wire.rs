//! # JSON Wire Protocol
//!
//! Plans travel as a recursive JSON tree tagged by `"op"`; expressions use the
//! serde rendering of `sysr_core::expr::Expr`. Every request carries the
//! statistics of the relations it scans, from which a per-request catalog is
//! built.
//!
//! ```json
//! {
//!   "tables": [{ "name": "employee", "rowCount": 1000, "sizeBytes": 16000,
//!                "columns": [{ "name": "id", "type": "int", "ndv": 1000 }] }],
//!   "plan": { "op": "tableScan", "relation": "employee" }
//! }
//! ```
//!
//! A `tableScan` without a schema takes the schema of the same-named table.

use serde::{Deserialize, Serialize};
use sysr_core::catalog::{DataType, Field, InMemoryCatalog, Schema};
use sysr_core::expr::{AggExpr, Expr, JoinMethod, Operator, SortKey};
use sysr_core::plan::{NodeId, Plan};
use sysr_core::stats::{ColumnStatistics, Statistics};
use sysr_rules::OptimizerConfig;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body of every `POST /optimize*` endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRequest {
    /// Relations the plan scans, with their statistics.
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    /// The plan to optimize.
    pub plan: PlanTree,
    /// Overrides of the server's default optimizer configuration.
    #[serde(default)]
    pub config: Option<OptimizerConfig>,
}

/// A relation with its statistics.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    /// Estimated row count.
    pub row_count: f64,
    /// Estimated total size in bytes.
    pub size_bytes: f64,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
}

/// An attribute with its per-column statistics.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type", default = "default_data_type")]
    pub data_type: DataType,
    /// Number of distinct values. Omitted means unknown.
    #[serde(default)]
    pub ndv: Option<f64>,
    #[serde(default)]
    pub null_fraction: f64,
    #[serde(default = "default_avg_size")]
    pub avg_size: f64,
}

fn default_data_type() -> DataType {
    DataType::Int
}

fn default_avg_size() -> f64 {
    8.0
}

fn default_join_method() -> JoinMethod {
    JoinMethod::BlockNestedLoops
}

/// Response body of every `POST /optimize*` endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResponse {
    /// The optimized plan.
    pub plan: PlanTree,
    /// Indented rendering of the optimized plan.
    pub explain: String,
    /// Base relations the plan scans, sorted.
    pub relations: Vec<String>,
    /// Oracle cost of the optimized plan, when join ordering ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// A plan node and its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PlanTree {
    TableScan {
        relation: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<Vec<Field>>,
    },
    Select {
        predicate: Expr,
        input: Box<PlanTree>,
    },
    Project {
        exprs: Vec<Expr>,
        aliases: Vec<String>,
        input: Box<PlanTree>,
    },
    Join {
        condition: Expr,
        #[serde(default = "default_join_method")]
        method: JoinMethod,
        left: Box<PlanTree>,
        right: Box<PlanTree>,
    },
    Union {
        left: Box<PlanTree>,
        right: Box<PlanTree>,
    },
    GroupBy {
        group_by: Vec<Expr>,
        #[serde(default)]
        aggregates: Vec<AggExpr>,
        input: Box<PlanTree>,
    },
    Sort {
        order: Vec<SortKey>,
        input: Box<PlanTree>,
    },
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Build an `InMemoryCatalog` from the request's table list.
pub fn build_catalog(tables: &[TableInfo]) -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();

    for table in tables {
        let mut stats = Statistics::new(table.row_count, table.size_bytes);
        let mut fields = Vec::with_capacity(table.columns.len());

        for col in &table.columns {
            if let Some(ndv) = col.ndv {
                let mut col_stats = ColumnStatistics::new(ndv, col.null_fraction);
                col_stats.avg_row_size = col.avg_size;
                stats = stats.with_column(col.name.clone(), col_stats);
            }
            fields.push(Field {
                name: col.name.clone(),
                data_type: col.data_type,
            });
        }

        catalog.add_relation(&table.name, Schema::new(fields), stats);
    }

    catalog
}

impl PlanTree {
    /// Lower the tree into a plan arena, resolving scan schemas from `catalog`.
    pub fn to_plan(&self, catalog: &InMemoryCatalog) -> Result<Plan, String> {
        let mut plan = Plan::new();
        let root = self.lower(catalog, &mut plan)?;
        plan.set_root(root);
        Ok(plan)
    }

    fn lower(&self, catalog: &InMemoryCatalog, plan: &mut Plan) -> Result<NodeId, String> {
        let id = match self {
            PlanTree::TableScan { relation, schema } => {
                let schema = match schema {
                    Some(fields) => Schema::new(fields.clone()),
                    None => catalog
                        .schemas
                        .get(relation)
                        .cloned()
                        .ok_or_else(|| format!("no schema for relation '{}'", relation))?,
                };
                plan.scan(relation.clone(), schema)
            }
            PlanTree::Select { predicate, input } => {
                let child = input.lower(catalog, plan)?;
                plan.select(child, predicate.clone())
            }
            PlanTree::Project {
                exprs,
                aliases,
                input,
            } => {
                if exprs.len() != aliases.len() {
                    return Err(format!(
                        "project has {} expressions but {} aliases",
                        exprs.len(),
                        aliases.len()
                    ));
                }
                let child = input.lower(catalog, plan)?;
                plan.project(child, exprs.clone(), aliases.clone())
            }
            PlanTree::Join {
                condition,
                method,
                left,
                right,
            } => {
                let l = left.lower(catalog, plan)?;
                let r = right.lower(catalog, plan)?;
                plan.join(l, r, condition.clone(), *method)
            }
            PlanTree::Union { left, right } => {
                let l = left.lower(catalog, plan)?;
                let r = right.lower(catalog, plan)?;
                plan.union(l, r)
            }
            PlanTree::GroupBy {
                group_by,
                aggregates,
                input,
            } => {
                let child = input.lower(catalog, plan)?;
                plan.group_by(child, group_by.clone(), aggregates.clone())
            }
            PlanTree::Sort { order, input } => {
                let child = input.lower(catalog, plan)?;
                plan.sort(child, order.clone())
            }
        };
        Ok(id)
    }

    /// Render the subtree of `plan` rooted at `id`.
    pub fn from_plan(plan: &Plan, id: NodeId) -> PlanTree {
        let child = |i: usize| Box::new(PlanTree::from_plan(plan, plan.children(id)[i]));
        match plan.op(id) {
            Operator::TableScan { relation, schema } => PlanTree::TableScan {
                relation: relation.clone(),
                schema: Some(schema.fields.clone()),
            },
            Operator::Select { predicate } => PlanTree::Select {
                predicate: predicate.clone(),
                input: child(0),
            },
            Operator::Project { exprs, aliases } => PlanTree::Project {
                exprs: exprs.clone(),
                aliases: aliases.clone(),
                input: child(0),
            },
            Operator::Join { condition, method } => PlanTree::Join {
                condition: condition.clone(),
                method: *method,
                left: child(0),
                right: child(1),
            },
            Operator::Union => PlanTree::Union {
                left: child(0),
                right: child(1),
            },
            Operator::GroupBy {
                group_by,
                aggregates,
            } => PlanTree::GroupBy {
                group_by: group_by.clone(),
                aggregates: aggregates.clone(),
                input: child(0),
            },
            Operator::Sort { order } => PlanTree::Sort {
                order: order.clone(),
                input: child(0),
            },
        }
    }
}
