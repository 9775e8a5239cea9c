//! Tests for `src/server/mod.rs` — routing, status codes, JSON shapes.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tower::ServiceExt;

use sabai::engine::{ConversationEngine, EngineSettings};
use sabai::notify::Notifier;
use sabai::providers::{GenerativeBackend, ProviderError};
use sabai::retrieval::{ContextIndex, RetrievalError};
use sabai::server::{router, AppState};
use sabai::store::{SessionStore, Turn};

struct CannedBackend {
    reply: String,
}

#[async_trait]
impl GenerativeBackend for CannedBackend {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Ok(self.reply.clone())
    }

    fn model_id(&self) -> &str {
        "canned"
    }
}

struct EmptyIndex;

#[async_trait]
impl ContextIndex for EmptyIndex {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<String>, RetrievalError> {
        Ok(Vec::new())
    }
}

async fn setup_app() -> (Router, SessionStore) {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("pool should connect");

    let schema = include_str!("../../migrations/001_schema.sql");
    sqlx::raw_sql(schema)
        .execute(&pool)
        .await
        .expect("schema should apply");

    let store = SessionStore::new(pool);
    let engine = ConversationEngine::new(
        Arc::new(CannedBackend {
            reply: "สบายดีค่ะ".to_owned(),
        }),
        Arc::new(EmptyIndex),
        store.clone(),
        EngineSettings::default(),
    );
    let state = Arc::new(AppState {
        engine,
        notifier: Notifier::new(None, None),
    });
    (router(state), store)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

#[tokio::test]
async fn health_endpoints_report_liveness() {
    let (app, _store) = setup_app().await;

    let response = app.clone().oneshot(get("/health")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");

    let response = app.oneshot(get("/")).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn chat_answers_and_omits_the_risk_field_off_trigger() {
    let (app, store) = setup_app().await;

    let request = post_json(
        "/chat",
        &serde_json::json!({ "user_id": "u1", "message": "ปวดหัวค่ะ" }),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["response"], "สบายดีค่ะ");
    assert!(body.get("risk_level").is_none());

    assert_eq!(store.turn_count("u1").await.expect("count"), 1);
}

#[tokio::test]
async fn blank_chat_message_is_a_bad_request() {
    let (app, _store) = setup_app().await;

    let request = post_json(
        "/chat",
        &serde_json::json!({ "user_id": "u1", "message": "   " }),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["error"], "Message cannot be empty");
}

#[tokio::test]
async fn start_chat_requires_a_user_id() {
    let (app, _store) = setup_app().await;

    let response = app
        .clone()
        .oneshot(get("/start_chat"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(get("/start_chat?user_id=u1"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["response"]
        .as_str()
        .expect("greeting is a string")
        .contains("สวัสดี!"));
    assert!(body.get("previous_risk").is_none());
}

#[tokio::test]
async fn new_chat_resets_the_session() {
    let (app, store) = setup_app().await;
    let turn = Turn::exchange("u1", "q", "r");
    store.append_turn("u1", &turn, None).await.expect("append");

    let response = app
        .oneshot(get("/new_chat?user_id=u1"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.turn_count("u1").await.expect("count"), 0);
}

#[tokio::test]
async fn get_message_maps_store_misses_to_not_found() {
    let (app, store) = setup_app().await;

    let response = app
        .clone()
        .oneshot(get("/get_message?user_id=nobody&message_id=0"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"], "ไม่พบข้อมูลผู้ใช้");

    store.ensure_session("u1").await.expect("session");
    let response = app
        .clone()
        .oneshot(get("/get_message?user_id=u1&message_id=5"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"], "ไม่พบข้อความที่ระบุ");

    let response = app
        .oneshot(get("/get_message?user_id=u1"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_message_returns_the_stored_response() {
    let (app, store) = setup_app().await;
    let turn = Turn::exchange("u1", "q", "คำตอบที่เก็บไว้");
    store.append_turn("u1", &turn, None).await.expect("append");

    let response = app
        .oneshot(get("/get_message?user_id=u1&message_id=0"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "คำตอบที่เก็บไว้");
}

#[tokio::test]
async fn send_notification_without_a_token_is_not_found() {
    let (app, _store) = setup_app().await;

    let request = post_json(
        "/send_notification",
        &serde_json::json!({ "user_id": "u1", "title": "t", "body": "b" }),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn send_notification_with_no_endpoint_reports_failure() {
    let (app, store) = setup_app().await;
    sqlx::query("INSERT INTO users (user_id, push_token) VALUES ('u1', 'tok-1')")
        .execute(store.pool())
        .await
        .expect("insert user");

    let request = post_json(
        "/send_notification",
        &serde_json::json!({ "user_id": "u1", "title": "t", "body": "b" }),
    );
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
}
