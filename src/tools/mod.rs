//! Tool system exposed over MCP.
//!
//! Each tool validates its own arguments, calls into the [`BudgetAccessor`]
//! and returns pretty-printed JSON text. Errors are returned as
//! `anyhow::Error` and turned into `isError` results by the dispatcher.

mod budget;

pub use budget::{CategorizeTransactions, GetCategories, GetUncategorizedTransactions};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::budget::BudgetAccessor;

/// Information about a tool for listing purposes.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub title: String,
    pub description: String,
    pub input_schema: Value,
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// Human-readable display name.
    fn title(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> anyhow::Result<String>;
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a registry with the budget tools bound to `accessor`.
    pub fn new(accessor: Arc<BudgetAccessor>) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(GetCategories::new(Arc::clone(&accessor))));
        registry.register(Arc::new(GetUncategorizedTransactions::new(Arc::clone(
            &accessor,
        ))));
        registry.register(Arc::new(CategorizeTransactions::new(accessor)));
        tracing::debug!("Tool registry ready with {} tools", registry.tools.len());
        registry
    }

    /// Create an empty registry (no built-in tools).
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// List all available tools, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        let mut tools: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                title: t.title().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Check if a tool exists by name.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, args: Value) -> anyhow::Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", name))?;

        tool.execute(args).await
    }
}
