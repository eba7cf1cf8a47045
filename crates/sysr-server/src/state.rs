//! # Application State
//!
//! Shared by all request handlers through `Arc`. The state holds no catalog:
//! every request carries the statistics of the relations it scans, so each
//! request gets its own catalog, oracle and optimizer and there is no shared
//! mutable state between requests.

use std::net::SocketAddr;
use std::sync::Arc;
use sysr_core::cost::{CostModel, DefaultCostModel};
use sysr_rules::OptimizerConfig;

/// Address the server binds when `SYSR_LISTEN_ADDR` is not set.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

/// Process-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
}

impl ServerConfig {
    /// Read the configuration from the environment.
    pub fn from_env() -> Result<Self, std::net::AddrParseError> {
        let addr = std::env::var("SYSR_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
        Ok(Self {
            listen_addr: addr.parse()?,
        })
    }
}

/// Shared application state.
pub struct AppState {
    /// Cost model shared by the per-request oracles. Stateless.
    pub cost_model: Arc<dyn CostModel>,
    /// Configuration used when a request carries none.
    pub default_config: OptimizerConfig,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            cost_model: Arc::new(DefaultCostModel::default()),
            default_config: OptimizerConfig::default(),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
