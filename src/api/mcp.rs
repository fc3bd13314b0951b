//! MCP streamable-HTTP endpoint.
//!
//! A session starts with an `initialize` POST that carries no
//! `mcp-session-id` header; the new id is returned in that header and must
//! accompany every later request.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use super::routes::AppState;
use crate::mcp::types::{JsonRpcResponse, PARSE_ERROR, SERVER_ERROR};
use crate::mcp::JsonRpcRequest;

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Upper bound on live sessions; the least recently used one is evicted.
const MAX_SESSIONS: usize = 256;

/// Sessions with no request for this long are dropped on the next create.
const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

struct McpSession {
    created_at: DateTime<Utc>,
    last_seen: Instant,
    /// Bumped on every use; orders sessions for eviction.
    last_use: u64,
    /// Dropped on termination, which ends the session's SSE streams.
    closed: watch::Sender<()>,
}

/// Live MCP sessions keyed by id.
pub struct McpSessions {
    sessions: RwLock<HashMap<String, McpSession>>,
    uses: AtomicU64,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl Default for McpSessions {
    fn default() -> Self {
        Self::with_limits(MAX_SESSIONS, SESSION_IDLE_TIMEOUT)
    }
}

impl McpSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_sessions: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            uses: AtomicU64::new(0),
            max_sessions: max_sessions.max(1),
            idle_timeout,
        }
    }

    pub async fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let (closed, _) = watch::channel(());
        {
            let mut sessions = self.sessions.write().await;
            self.prune(&mut sessions);
            sessions.insert(
                id.clone(),
                McpSession {
                    created_at: Utc::now(),
                    last_seen: Instant::now(),
                    last_use: self.uses.fetch_add(1, Ordering::Relaxed),
                    closed,
                },
            );
        }
        tracing::info!("MCP session {} created ({} active)", id, self.len().await);
        id
    }

    /// Drop idle sessions, then evict until there is room for one more.
    fn prune(&self, sessions: &mut HashMap<String, McpSession>) {
        let before = sessions.len();
        sessions.retain(|_, s| s.last_seen.elapsed() < self.idle_timeout);
        let expired = before - sessions.len();
        if expired > 0 {
            tracing::info!("Expired {} idle MCP session(s)", expired);
        }

        while sessions.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, s)| s.last_use)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            sessions.remove(&oldest);
            tracing::warn!("MCP session limit reached, evicted {}", oldest);
        }
    }

    /// Mark a session as used. Returns whether it exists.
    pub async fn touch(&self, id: &str) -> bool {
        match self.sessions.write().await.get_mut(id) {
            Some(session) => {
                session.last_seen = Instant::now();
                session.last_use = self.uses.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Remove a session. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        match self.sessions.write().await.remove(id) {
            Some(session) => {
                let age = Utc::now() - session.created_at;
                tracing::info!(
                    "MCP session {} terminated after {}s",
                    id,
                    age.num_seconds()
                );
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn subscribe(&self, id: &str) -> Option<watch::Receiver<()>> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|s| s.closed.subscribe())
    }
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn rpc_error(status: StatusCode, code: i32, message: impl Into<String>) -> Response {
    (
        status,
        Json(JsonRpcResponse::error(Value::Null, code, message)),
    )
        .into_response()
}

fn invalid_session() -> Response {
    (StatusCode::BAD_REQUEST, "Invalid or missing session ID").into_response()
}

/// POST /mcp - client-to-server JSON-RPC message.
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                PARSE_ERROR,
                format!("Parse error: {}", e),
            )
        }
    };

    let known = match session_id(&headers) {
        Some(id) => state.sessions.touch(&id).await.then_some(id),
        None => None,
    };
    let (session, created) = match known {
        Some(id) => (id, false),
        None if request.method == "initialize" && !headers.contains_key(SESSION_HEADER) => {
            (state.sessions.create().await, true)
        }
        None => {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                SERVER_ERROR,
                "Bad Request: No valid session ID provided",
            )
        }
    };

    let mut response = match state.mcp.handle_request(request).await {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    if created {
        if let Ok(value) = HeaderValue::from_str(&session) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(SESSION_HEADER), value);
        }
    }
    response
}

/// GET /mcp - server-to-client SSE stream.
///
/// There are no unsolicited server messages, so the stream only carries
/// keep-alive comments until the session is terminated.
pub async fn open_stream(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return invalid_session();
    };
    let Some(mut closed) = state.sessions.subscribe(&id).await else {
        return invalid_session();
    };

    tracing::debug!("SSE stream opened for MCP session {}", id);
    let stream = stream::once(async move {
        // Resolves only once the session's sender is dropped.
        let _ = closed.changed().await;
    })
    .filter_map(|()| futures::future::ready(None::<Result<Event, Infallible>>));

    sse_response(stream)
}

fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response()
}

/// DELETE /mcp - terminate a session.
pub async fn delete_session(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(id) = session_id(&headers) else {
        return invalid_session();
    };
    if state.sessions.remove(&id).await {
        StatusCode::OK.into_response()
    } else {
        invalid_session()
    }
}
