//! actual-budget-mcp - HTTP Server Entry Point
//!
//! Starts the HTTP server that exposes the budget tools over MCP.

use std::sync::Arc;

use actual_budget_mcp::{
    api,
    budget::{ActualBackend, BudgetAccessor},
    config::Config,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "actual_budget_mcp=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: server={} budget={} cache={}",
        config.remote.server_url.as_deref().unwrap_or("(unset)"),
        config.remote.budget_id.as_deref().unwrap_or("(unset)"),
        config.cache_dir.display()
    );

    let backend = Arc::new(ActualBackend::new(config.remote.clone())?);
    let accessor = Arc::new(BudgetAccessor::new(config.cache_dir.clone(), backend));

    // Operations retry initialization, so a failure here is not fatal.
    match accessor.initialize().await {
        Ok(()) => info!("Budget downloaded"),
        Err(e) => warn!("Could not initialize budget cache: {}", e),
    }

    api::serve(&config, accessor).await
}
