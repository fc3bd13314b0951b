//! HTTP API for the budget MCP server.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send a JSON-RPC message (streamable HTTP, session via `mcp-session-id`)
//! - `GET /mcp` - Open the server-to-client SSE stream of a session
//! - `DELETE /mcp` - Terminate a session
//! - `GET /health` - Health check (cache directory present)

pub mod mcp;
mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
