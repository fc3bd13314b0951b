//! HTTP route handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderName, Method, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::budget::BudgetAccessor;
use crate::config::Config;
use crate::mcp::McpServer;
use crate::tools::ToolRegistry;

use super::mcp::{self as mcp_api, McpSessions, SESSION_HEADER};
use super::types::*;

/// Largest accepted MCP request body.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Shared application state.
pub struct AppState {
    /// Cache-aware budget access, also used by the health check
    pub accessor: Arc<BudgetAccessor>,
    /// MCP dispatcher shared by all sessions
    pub mcp: McpServer,
    /// Live streamable-HTTP sessions
    pub sessions: McpSessions,
}

impl AppState {
    pub fn new(accessor: Arc<BudgetAccessor>) -> Self {
        let mcp = McpServer::new(ToolRegistry::new(Arc::clone(&accessor)));
        Self {
            accessor,
            mcp,
            sessions: McpSessions::new(),
        }
    }
}

fn cors_layer() -> CorsLayer {
    let session = HeaderName::from_static(SESSION_HEADER);
    let api_key = HeaderName::from_static("x-api-key");
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            api_key.clone(),
            session.clone(),
            HeaderName::from_static("last-event-id"),
        ])
        .expose_headers([header::CONTENT_TYPE, header::AUTHORIZATION, api_key, session])
        .max_age(Duration::from_secs(86400))
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let mcp_routes = Router::new()
        .route(
            "/mcp",
            get(mcp_api::open_stream)
                .post(mcp_api::post_message)
                .delete(mcp_api::delete_session),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES));

    Router::new()
        .route("/health", get(health))
        .merge(mcp_routes)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: &Config, accessor: Arc<BudgetAccessor>) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(accessor));
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check: http://{}/health", addr);
    tracing::info!("MCP endpoint: http://{}/mcp", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, closing connections...");
}

/// Health check: healthy iff the cache directory exists.
async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    if state.accessor.cache_available().await {
        (StatusCode::OK, Json(HealthResponse::healthy()))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::cache_missing()),
        )
    }
}
