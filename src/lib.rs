//! # actual-budget-mcp
//!
//! MCP server that lets an assistant review and categorize transactions in
//! an Actual Budget file.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP (/mcp)  or  stdio
//!            │
//!            ▼
//!      ┌───────────┐     ┌──────────────┐     ┌────────────────┐
//!      │ McpServer │ ──▶ │ ToolRegistry │ ──▶ │ BudgetAccessor │
//!      └───────────┘     └──────────────┘     └───────┬────────┘
//!                                                     │
//!                                      ┌──────────────┴─────────────┐
//!                                      ▼                            ▼
//!                               cache directory             ActualBackend
//!                            (SQLite working copy)      (Actual HTTP API)
//! ```
//!
//! ## Modules
//! - `budget`: cache lifecycle, pagination and bulk categorization
//! - `tools`: the MCP tools and their argument validation
//! - `mcp`: JSON-RPC types and the dispatcher
//! - `api`: axum HTTP transport and health check
//! - `config`: environment configuration

pub mod api;
pub mod budget;
pub mod config;
pub mod mcp;
pub mod tools;
pub mod util;

pub use config::Config;
