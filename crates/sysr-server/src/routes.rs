//! # HTTP Route Handlers
//!
//! ## Optimization Pipeline
//!
//! All three optimize endpoints share `run_optimization`:
//!
//! 1. **Catalog**: build a per-request catalog from the request's tables.
//! 2. **Lower**: turn the JSON plan tree into a plan arena.
//! 3. **Optimize**: run pushdown, join ordering or both.
//! 4. **Render**: turn the result back into a JSON tree with its explain text.
//!
//! ## Error Handling
//!
//! - 400 Bad Request: malformed input (unknown relation, malformed plan,
//!   unattributable or ambiguous attributes, unsupported operators, too many
//!   relations).
//! - 500 Internal Server Error: the cost oracle failed.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use sysr_core::error::OptimizerError;
use sysr_core::oracle::StatisticsOracle;
use sysr_rules::Optimizer;
use tracing::debug;

use crate::state::AppState;
use crate::wire::{build_catalog, OptimizeRequest, OptimizeResponse, PlanTree};

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// POST /optimize: pushdown followed by join ordering.
pub async fn optimize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, (StatusCode, String)> {
    run_optimization(&state, req, Pass::Full).map(Json)
}

/// POST /optimize/pushdown: selection pushdown only.
pub async fn pushdown(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, (StatusCode, String)> {
    run_optimization(&state, req, Pass::Pushdown).map(Json)
}

/// POST /optimize/join-order: join ordering only.
pub async fn join_order(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, (StatusCode, String)> {
    run_optimization(&state, req, Pass::JoinOrder).map(Json)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Pushdown,
    JoinOrder,
    Full,
}

/// Map an optimizer error to an HTTP status.
pub fn error_status(err: &OptimizerError) -> StatusCode {
    match err {
        OptimizerError::CostOracle(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn reject(err: OptimizerError) -> (StatusCode, String) {
    (error_status(&err), err.to_string())
}

/// Core optimization logic shared by the optimize endpoints.
pub fn run_optimization(
    state: &AppState,
    req: OptimizeRequest,
    pass: Pass,
) -> Result<OptimizeResponse, (StatusCode, String)> {
    let catalog = Arc::new(build_catalog(&req.tables));
    let plan = req
        .plan
        .to_plan(&catalog)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid plan: {}", e)))?;

    let config = req.config.unwrap_or_else(|| state.default_config.clone());
    let oracle = StatisticsOracle::new(catalog, state.cost_model.clone());
    let mut optimizer = Optimizer::new(Box::new(oracle), config);

    let optimized = match pass {
        Pass::Pushdown => optimizer.pushdown_operators(&plan),
        Pass::JoinOrder => optimizer.pick_join_order(&plan),
        Pass::Full => optimizer.optimize_query(&plan),
    }
    .map_err(reject)?;

    let cost = match pass {
        Pass::Pushdown => None,
        Pass::JoinOrder | Pass::Full => Some(optimizer.plan_cost(&optimized).map_err(reject)?.total),
    };

    let root = optimized.require_root().map_err(reject)?;
    debug!("Optimized plan ({:?}):\n{}", pass, optimized.explain());

    Ok(OptimizeResponse {
        plan: PlanTree::from_plan(&optimized, root),
        explain: optimized.explain(),
        relations: optimized.relations().into_iter().collect(),
        cost,
    })
}
