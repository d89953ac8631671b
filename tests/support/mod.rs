//! Shared test helpers: an in-process mock of the loyalty backend.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use loyalty_companion::api::ApiClient;
use loyalty_companion::storage::SessionStore;

/// Mutable fixture backing the mock backend handlers.
pub struct Backend {
    /// Access token currently accepted on bearer calls.
    pub valid_access: Mutex<String>,
    /// Refresh token the refresh endpoint accepts.
    pub valid_refresh: Mutex<String>,
    /// Access token handed out by the next token issue.
    pub next_access: Mutex<String>,
    /// Rotated refresh token included in the next token issue, if any.
    pub next_refresh: Mutex<Option<String>>,
    /// Identity payload the Telegram exchange accepts; `None` rejects all.
    pub valid_init_data: Mutex<Option<String>>,
    /// Delay inside the refresh handler, to hold the refresh window open.
    pub refresh_delay_ms: AtomicU64,
    /// Delay inside the Telegram exchange handler.
    pub exchange_delay_ms: AtomicU64,
    /// When set, bearer endpoints reject every token.
    pub reject_all_bearer: AtomicBool,
    /// Profile flag returned by the /me/ endpoint.
    pub me_is_barista: AtomicBool,
    pub refresh_calls: AtomicUsize,
    pub telegram_calls: AtomicUsize,
    /// Whether the last no-auth endpoint call carried an Authorization header.
    pub noauth_saw_authorization: AtomicBool,
    /// X-Telegram-Init-Data seen on the most recent call, any endpoint.
    pub last_telegram_header: Mutex<Option<String>>,
}

impl Backend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            valid_access: Mutex::new("fresh".into()),
            valid_refresh: Mutex::new("r1".into()),
            next_access: Mutex::new("fresh".into()),
            next_refresh: Mutex::new(None),
            valid_init_data: Mutex::new(None),
            refresh_delay_ms: AtomicU64::new(0),
            exchange_delay_ms: AtomicU64::new(0),
            reject_all_bearer: AtomicBool::new(false),
            me_is_barista: AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
            telegram_calls: AtomicUsize::new(0),
            noauth_saw_authorization: AtomicBool::new(false),
            last_telegram_header: Mutex::new(None),
        })
    }
}

/// Serve the mock backend on an ephemeral port; returns its base URL.
pub async fn spawn_backend(backend: Arc<Backend>) -> String {
    let app = Router::new()
        .route("/token/", post(token))
        .route("/token/refresh/", post(refresh))
        .route("/telegram-auth/", post(telegram_auth))
        .route("/me/", get(me))
        .route("/loyalty/status/", get(loyalty_status))
        .route("/loyalty/add-stamp/", post(add_stamp))
        .route("/loyalty/generate-code/", post(generate_code))
        .route("/loyalty/redeem-code/", post(redeem_code))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

/// Fresh store in a temp directory; keep the guard alive for the test.
pub fn setup_store() -> (Arc<SessionStore>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SessionStore::open(temp_dir.path()));
    (store, temp_dir)
}

/// Store + client wired against a freshly spawned mock backend.
pub async fn setup_client(backend: Arc<Backend>) -> (Arc<ApiClient>, Arc<SessionStore>, TempDir) {
    let base_url = spawn_backend(backend).await;
    let (store, temp_dir) = setup_store();
    let api = Arc::new(ApiClient::new(&base_url, Arc::clone(&store)));
    (api, store, temp_dir)
}

fn bearer_ok(backend: &Backend, headers: &HeaderMap) -> bool {
    if backend.reject_all_bearer.load(Ordering::SeqCst) {
        return false;
    }
    let expected = format!("Bearer {}", backend.valid_access.lock().unwrap());
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false)
}

fn record_headers(backend: &Backend, headers: &HeaderMap) {
    *backend.last_telegram_header.lock().unwrap() = headers
        .get("x-telegram-init-data")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
}

fn record_noauth(backend: &Backend, headers: &HeaderMap) {
    backend
        .noauth_saw_authorization
        .store(headers.contains_key("authorization"), Ordering::SeqCst);
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "Invalid or expired token" })),
    )
        .into_response()
}

/// Hand out the configured token pair and start accepting it.
fn issue_tokens(backend: &Backend) -> Response {
    let access = backend.next_access.lock().unwrap().clone();
    *backend.valid_access.lock().unwrap() = access.clone();

    let mut body = json!({ "access": access });
    if let Some(refresh) = backend.next_refresh.lock().unwrap().clone() {
        *backend.valid_refresh.lock().unwrap() = refresh.clone();
        body["refresh"] = json!(refresh);
    }
    Json(body).into_response()
}

async fn token(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_headers(&backend, &headers);
    record_noauth(&backend, &headers);

    if body["username"] == "alice" && body["password"] == "secret" {
        issue_tokens(&backend)
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "No active account found with the given credentials" })),
        )
            .into_response()
    }
}

async fn refresh(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_headers(&backend, &headers);
    record_noauth(&backend, &headers);
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);

    let delay = backend.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let expected = backend.valid_refresh.lock().unwrap().clone();
    if body["refresh"] == expected.as_str() {
        issue_tokens(&backend)
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Refresh token is invalid or expired" })),
        )
            .into_response()
    }
}

async fn telegram_auth(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_headers(&backend, &headers);
    record_noauth(&backend, &headers);
    backend.telegram_calls.fetch_add(1, Ordering::SeqCst);

    let delay = backend.exchange_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let accepted = backend.valid_init_data.lock().unwrap().clone();
    match accepted {
        Some(expected) if body["init_data"] == expected.as_str() => issue_tokens(&backend),
        _ => (
            StatusCode::FORBIDDEN,
            Json(json!({ "detail": "Telegram user is not registered" })),
        )
            .into_response(),
    }
}

async fn me(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    record_headers(&backend, &headers);
    if !bearer_ok(&backend, &headers) {
        return unauthorized();
    }
    Json(json!({
        "username": "alice",
        "is_barista": backend.me_is_barista.load(Ordering::SeqCst),
        "is_staff": false,
    }))
    .into_response()
}

async fn loyalty_status(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    record_headers(&backend, &headers);
    if !bearer_ok(&backend, &headers) {
        return unauthorized();
    }
    let username = params.get("username").cloned().unwrap_or_default();
    Json(json!({
        "username": username,
        "stamps": 7,
        "stamps_required": 10,
        "rewards_available": 0,
    }))
    .into_response()
}

async fn add_stamp(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_headers(&backend, &headers);
    if !bearer_ok(&backend, &headers) {
        return unauthorized();
    }
    if body["username"] == "ghost" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "Customer not found" })),
        )
            .into_response();
    }
    let amount = body["amount"].as_u64().unwrap_or(1);
    Json(json!({ "stamps": 7 + amount, "detail": "ok" })).into_response()
}

async fn generate_code(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    record_headers(&backend, &headers);
    if !bearer_ok(&backend, &headers) {
        return unauthorized();
    }
    Json(json!({ "code": "CODE-1234" })).into_response()
}

async fn redeem_code(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    record_headers(&backend, &headers);
    if !bearer_ok(&backend, &headers) {
        return unauthorized();
    }
    if body["code"] == "CODE-1234" {
        Json(json!({ "valid": true, "detail": "Reward redeemed" })).into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "Unknown code" })),
        )
            .into_response()
    }
}
