//! # sysr-server: HTTP Service for the System-R Query Optimizer
//!
//! Exposes the optimizer passes as a JSON service. A caller sends a plan tree
//! together with the statistics of the relations it scans and receives the
//! optimized plan.
//!
//! ## Endpoints
//!
//! - `GET  /health`               - Health check
//! - `POST /optimize`             - Selection pushdown followed by join ordering
//! - `POST /optimize/pushdown`    - Selection pushdown only
//! - `POST /optimize/join-order`  - Join ordering only
//!
//! ## Configuration
//!
//! The server listens on `0.0.0.0:3000` by default; set `SYSR_LISTEN_ADDR` to
//! override. Logging is controlled by the `RUST_LOG` environment variable
//! (defaults to `sysr=debug`).

mod routes;
mod state;
mod wire;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sysr=debug".parse()?))
        .init();

    let config = state::ServerConfig::from_env()?;
    let state = Arc::new(state::AppState::new());

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/optimize", post(routes::optimize))
        .route("/optimize/pushdown", post(routes::pushdown))
        .route("/optimize/join-order", post(routes::join_order))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!("sysr-server listening on http://{}", config.listen_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
