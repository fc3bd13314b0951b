//! MCP server for the budget tools over stdio.
//!
//! Reads one JSON-RPC message per line from stdin and writes one response
//! per line to stdout. Logs go to stderr.

use std::sync::Arc;

use actual_budget_mcp::{
    budget::{ActualBackend, BudgetAccessor},
    config::Config,
    mcp::McpServer,
    tools::ToolRegistry,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "actual_budget_mcp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting MCP server for budget tools on stdio...");

    let config = Config::from_env()?;
    let backend = Arc::new(ActualBackend::new(config.remote.clone())?);
    let accessor = Arc::new(BudgetAccessor::new(config.cache_dir.clone(), backend));
    if let Err(e) = accessor.initialize().await {
        tracing::warn!("Could not initialize budget cache: {}", e);
    }

    let server = McpServer::new(ToolRegistry::new(accessor));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let Some(response) = server.handle_message(&line).await else {
            continue;
        };
        match serde_json::to_string(&response) {
            Ok(mut text) => {
                text.push('\n');
                stdout.write_all(text.as_bytes()).await?;
                stdout.flush().await?;
            }
            Err(e) => tracing::error!("Failed to serialize response: {}", e),
        }
    }

    tracing::info!("stdin closed, exiting");
    Ok(())
}
