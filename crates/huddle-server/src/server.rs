//! `HuddleServer`: Axum HTTP + WebSocket server.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use huddle_core::{ChatId, RoomId, WorkflowId};
use huddle_realtime::{AuthError, EventRouter, Identity, IdentityGate, ServerEvent, SessionManager};
use huddle_workflows::{WorkflowEngine, WorkflowError};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::ws_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections, rooms, and presence.
    pub sessions: Arc<SessionManager>,
    /// Inbound event dispatch.
    pub router: Arc<EventRouter>,
    /// Workflow store and execution.
    pub engine: Arc<WorkflowEngine>,
    /// Credential resolution.
    pub gate: Arc<dyn IdentityGate>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
}

/// The main huddle server.
pub struct HuddleServer {
    config: Arc<ServerConfig>,
    sessions: Arc<SessionManager>,
    router: Arc<EventRouter>,
    engine: Arc<WorkflowEngine>,
    gate: Arc<dyn IdentityGate>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl HuddleServer {
    /// Create a new server over an identity gate and a workflow engine.
    #[must_use]
    pub fn new(config: ServerConfig, gate: Arc<dyn IdentityGate>, engine: WorkflowEngine) -> Self {
        let sessions = Arc::new(SessionManager::new());
        Self {
            config: Arc::new(config),
            router: Arc::new(EventRouter::new(Arc::clone(&sessions))),
            sessions,
            engine: Arc::new(engine),
            gate,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            sessions: Arc::clone(&self.sessions),
            router: Arc::clone(&self.router),
            engine: Arc::clone(&self.engine),
            gate: Arc::clone(&self.gate),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
        };
        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .route("/workflows/{id}/execute", post(execute_workflow))
            .route("/workflows/{id}/history", get(workflow_history))
            .route("/chats/{id}/messages", post(post_chat_message))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// The session manager.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The workflow engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// The shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// API error body: a status code plus `{"error": "..."}`.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, e.to_string())
    }
}

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        let status = match e {
            WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::Unauthorized => StatusCode::FORBIDDEN,
            WorkflowError::UnsupportedStepType(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self::new(status, e.to_string())
    }
}

/// Resolve the caller from the `Authorization: Bearer` header.
async fn bearer_identity(
    headers: &HeaderMap,
    gate: &Arc<dyn IdentityGate>,
) -> Result<Identity, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();
    Ok(gate.authenticate(token).await?)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.sessions.connection_count();
    let online = state.sessions.online_users().await;
    Json(health::health_check(state.start_time, connections, online))
}

/// POST /workflows/{id}/execute
///
/// Step-level failures are a 200 with `success: false` in the body; only
/// an unknown workflow is a 404.
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let identity = bearer_identity(&headers, &state.gate).await?;
    let input: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid body: {e}")))?
    };
    let id = WorkflowId::from(id);
    let outcome = state.engine.execute(&id, &input, identity.user_id).await?;
    info!(workflow_id = %id, success = outcome.success, "workflow executed via api");
    Ok(Json(outcome).into_response())
}

/// GET /workflows/{id}/history
async fn workflow_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let _ = bearer_identity(&headers, &state.gate).await?;
    let history = state.engine.history(&WorkflowId::from(id)).await?;
    Ok(Json(history).into_response())
}

/// Body of POST /chats/{id}/messages.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageBody {
    content: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    attachments: Vec<Value>,
}

/// POST /chats/{id}/messages
///
/// The REST send path: fans the message out to every subscriber of the
/// chat room, the caller's own connections included. Storage of the
/// message is the upstream service's concern.
async fn post_chat_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let identity = bearer_identity(&headers, &state.gate).await?;
    let body: PostMessageBody = serde_json::from_slice(&body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("invalid body: {e}")))?;
    let chat_id = ChatId::from(id);
    let event = ServerEvent::message_receive(
        &chat_id,
        &identity.user_id,
        &body.content,
        body.kind.as_deref().unwrap_or("text"),
        &body.attachments,
    );
    state
        .sessions
        .emit(&RoomId::Chat(chat_id), &event, None)
        .await;
    Ok((StatusCode::CREATED, Json(event.data)).into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
