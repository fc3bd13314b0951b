//! Model Context Protocol (MCP) server side.
//!
//! `types` holds the JSON-RPC 2.0 envelope and MCP payloads, `server` the
//! dispatcher shared by the HTTP and stdio transports.

pub mod server;
pub mod types;

pub use server::McpServer;
pub use types::{JsonRpcRequest, JsonRpcResponse};
