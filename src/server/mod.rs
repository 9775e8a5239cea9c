//! Thin HTTP surface over the conversation engine.
//!
//! Routes:
//!
//! - `POST /chat`              — one conversational turn
//! - `GET  /start_chat`        — greeting, surfacing any previous risk
//! - `GET  /new_chat`          — archive-and-reset
//! - `GET  /get_message`       — fetch one persisted message
//! - `POST /send_notification` — fire-and-forget push delivery
//! - `GET  /health`, `GET /`   — liveness
//!
//! The handlers only translate between HTTP and the engine; all state-machine
//! logic lives in [`crate::engine`].

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::engine::ConversationEngine;
use crate::notify::{Notification, Notifier};
use crate::store::StoreError;

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the HTTP handlers.
pub struct AppState {
    /// The conversation engine.
    pub engine: ConversationEngine,
    /// Push delivery client.
    pub notifier: Notifier,
}

/// Handler state handle.
pub type SharedState = Arc<AppState>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the application router.
///
/// CORS is fully permissive: the API is consumed by a mobile app through
/// an app-level auth layer, not by browsers on this origin.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .route("/start_chat", get(start_chat_handler))
        .route("/new_chat", get(new_chat_handler))
        .route("/get_message", get(get_message_handler))
        .route("/send_notification", post(send_notification_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    user_id: String,
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    risk_level: Option<String>,
}

#[derive(Deserialize)]
struct UserParams {
    user_id: Option<String>,
}

#[derive(Serialize)]
struct StartChatResponse {
    response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_risk: Option<String>,
}

#[derive(Deserialize)]
struct MessageParams {
    user_id: Option<String>,
    message_id: Option<String>,
}

#[derive(Deserialize)]
struct NotificationRequest {
    user_id: String,
    title: String,
    body: String,
    #[serde(default)]
    data: Option<Value>,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn root_handler() -> Json<Value> {
    Json(json!({ "message": "Sabai health assistant" }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "Service is running" }))
}

async fn chat_handler(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> impl IntoResponse {
    if request.message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Message cannot be empty");
    }

    match state.engine.converse(&request.user_id, &request.message).await {
        Ok(reply) => (
            StatusCode::OK,
            Json(json!(ChatResponse {
                response: reply.response,
                risk_level: reply.risk_label,
            })),
        ),
        Err(err) => internal_error(&err),
    }
}

async fn start_chat_handler(
    State(state): State<SharedState>,
    Query(params): Query<UserParams>,
) -> impl IntoResponse {
    let Some(user_id) = params.user_id else {
        return error_response(StatusCode::BAD_REQUEST, "user_id is required");
    };

    match state.engine.start_chat(&user_id).await {
        Ok(reply) => (
            StatusCode::OK,
            Json(json!(StartChatResponse {
                response: reply.response,
                previous_risk: reply.previous_risk,
            })),
        ),
        Err(err) => internal_error(&err),
    }
}

async fn new_chat_handler(
    State(state): State<SharedState>,
    Query(params): Query<UserParams>,
) -> impl IntoResponse {
    let Some(user_id) = params.user_id else {
        return error_response(StatusCode::BAD_REQUEST, "user_id is required");
    };

    match state.engine.new_chat(&user_id).await {
        Ok(response) => (StatusCode::OK, Json(json!({ "response": response }))),
        Err(err) => internal_error(&err),
    }
}

async fn get_message_handler(
    State(state): State<SharedState>,
    Query(params): Query<MessageParams>,
) -> impl IntoResponse {
    let (Some(user_id), Some(message_id)) = (params.user_id, params.message_id) else {
        return error_response(StatusCode::BAD_REQUEST, "user_id and message_id are required");
    };

    match state.engine.get_message(&user_id, &message_id).await {
        Ok(message) => (StatusCode::OK, Json(json!({ "message": message }))),
        Err(StoreError::UserNotFound) => {
            error_response(StatusCode::NOT_FOUND, "ไม่พบข้อมูลผู้ใช้")
        }
        Err(StoreError::MessageNotFound) => {
            error_response(StatusCode::NOT_FOUND, "ไม่พบข้อความที่ระบุ")
        }
        Err(err) => internal_error(&err),
    }
}

async fn send_notification_handler(
    State(state): State<SharedState>,
    Json(request): Json<NotificationRequest>,
) -> impl IntoResponse {
    let token = match state.engine.store().lookup_push_token(&request.user_id).await {
        Ok(Some(token)) => token,
        Ok(None) => {
            return error_response(StatusCode::NOT_FOUND, "no push token registered for user")
        }
        Err(err) => return internal_error(&err),
    };

    let notification = Notification {
        title: request.title,
        body: request.body,
        data: request.data,
    };
    let delivered = state.notifier.send(&token, &notification).await;
    (StatusCode::OK, Json(json!({ "success": delivered })))
}

// ── Error helpers ─────────────────────────────────────────────────────────

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message })))
}

fn internal_error(err: &StoreError) -> (StatusCode, Json<Value>) {
    error!(error = %err, "request failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}
