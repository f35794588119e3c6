//! Pairing HTTP contract tests against an in-process mock panel.
//!
//! The mock device implements the three pairing endpoints with the real
//! semantics: bearer-gated `/api/info`, unauthenticated idempotent
//! `/api/unpair`, and `/pair` secret delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde_json::json;
use trestle_coordinator::transport::{ClientError, HttpClient};

// ============================================================================
// Mock Panel Device
// ============================================================================

struct MockDevice {
    /// Secret currently stored on the device; None when unpaired.
    stored_secret: std::sync::Mutex<Option<String>>,
    unpair_calls: AtomicUsize,
    info_calls: AtomicUsize,
    pair_calls: AtomicUsize,
    /// When set, the device keeps rejecting even after unpair.
    always_reject: AtomicBool,
    /// When set, `/pair` answers 503.
    reject_pairing: AtomicBool,
    /// When set, `/api/unpair` answers 500.
    reject_unpair: AtomicBool,
}

impl MockDevice {
    fn new(stored_secret: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            stored_secret: std::sync::Mutex::new(stored_secret.map(str::to_string)),
            unpair_calls: AtomicUsize::new(0),
            info_calls: AtomicUsize::new(0),
            pair_calls: AtomicUsize::new(0),
            always_reject: AtomicBool::new(false),
            reject_pairing: AtomicBool::new(false),
            reject_unpair: AtomicBool::new(false),
        })
    }
}

fn bearer_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn info_handler(State(device): State<Arc<MockDevice>>, headers: HeaderMap) -> impl IntoResponse {
    device.info_calls.fetch_add(1, Ordering::SeqCst);

    if device.always_reject.load(Ordering::SeqCst) {
        return (StatusCode::UNAUTHORIZED, axum::Json(json!({}))).into_response();
    }

    let stored = device.stored_secret.lock().unwrap().clone();
    match stored {
        // Paired device: the bearer must match the stored secret.
        Some(secret) if bearer_of(&headers).as_deref() != Some(secret.as_str()) => {
            (StatusCode::UNAUTHORIZED, axum::Json(json!({}))).into_response()
        }
        _ => axum::Json(json!({"id": "panel-1234"})).into_response(),
    }
}

async fn unpair_handler(State(device): State<Arc<MockDevice>>) -> impl IntoResponse {
    device.unpair_calls.fetch_add(1, Ordering::SeqCst);
    if device.reject_unpair.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "busy").into_response();
    }
    // Idempotent: clearing an absent secret still succeeds.
    device.stored_secret.lock().unwrap().take();
    (StatusCode::OK, "OK").into_response()
}

async fn pair_handler(
    State(device): State<Arc<MockDevice>>,
    axum::Json(body): axum::Json<serde_json::Value>,
) -> impl IntoResponse {
    device.pair_calls.fetch_add(1, Ordering::SeqCst);
    if device.reject_pairing.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match body.get("secret").and_then(serde_json::Value::as_str) {
        Some(secret) => {
            *device.stored_secret.lock().unwrap() = Some(secret.to_string());
            StatusCode::OK
        }
        None => StatusCode::BAD_REQUEST,
    }
}

async fn spawn_device(device: Arc<MockDevice>) -> u16 {
    let app = Router::new()
        .route("/api/info", get(info_handler))
        .route("/api/unpair", post(unpair_handler))
        .route("/pair", post(pair_handler))
        .with_state(device);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn info_succeeds_with_matching_secret() {
    let device = MockDevice::new(Some("s3cret"));
    let port = spawn_device(Arc::clone(&device)).await;

    let client = HttpClient::new("127.0.0.1", port, Some("s3cret".to_string()));
    let id = client.fetch_device_id().await.unwrap();
    assert_eq!(id.as_deref(), Some("panel-1234"));
    assert_eq!(device.unpair_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn info_succeeds_unauthenticated_before_pairing() {
    let device = MockDevice::new(None);
    let port = spawn_device(Arc::clone(&device)).await;

    let client = HttpClient::new("127.0.0.1", port, None);
    let id = client.fetch_device_id().await.unwrap();
    assert_eq!(id.as_deref(), Some("panel-1234"));
}

#[tokio::test]
async fn orphan_panel_recovers_via_unpair() {
    // The device holds a secret the coordinator lost: the coordinator's
    // stale secret earns a 401, recovery unpairs and retries without auth.
    let device = MockDevice::new(Some("device-kept-this"));
    let port = spawn_device(Arc::clone(&device)).await;

    let client = HttpClient::new("127.0.0.1", port, Some("stale-secret".to_string()));
    let id = client.fetch_device_id().await.unwrap();

    assert_eq!(id.as_deref(), Some("panel-1234"));
    assert_eq!(device.unpair_calls.load(Ordering::SeqCst), 1);
    assert_eq!(device.info_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn second_rejection_is_terminal_with_single_unpair() {
    let device = MockDevice::new(Some("device-kept-this"));
    device.always_reject.store(true, Ordering::SeqCst);
    let port = spawn_device(Arc::clone(&device)).await;

    let client = HttpClient::new("127.0.0.1", port, Some("stale-secret".to_string()));
    let id = client.fetch_device_id().await.unwrap();

    assert_eq!(id, None);
    assert_eq!(device.unpair_calls.load(Ordering::SeqCst), 1);
    assert_eq!(device.info_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rejection_without_stored_secret_is_terminal() {
    let device = MockDevice::new(Some("someone-elses-secret"));
    let port = spawn_device(Arc::clone(&device)).await;

    // Coordinator has no secret at all: no recovery attempt.
    let client = HttpClient::new("127.0.0.1", port, None);
    let id = client.fetch_device_id().await.unwrap();

    assert_eq!(id, None);
    assert_eq!(device.unpair_calls.load(Ordering::SeqCst), 0);
    assert_eq!(device.info_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unpair_is_idempotent() {
    let device = MockDevice::new(Some("s3cret"));
    let port = spawn_device(Arc::clone(&device)).await;

    let client = HttpClient::new("127.0.0.1", port, None);
    client.unpair_device().await.unwrap();
    client.unpair_device().await.unwrap();
    assert_eq!(device.unpair_calls.load(Ordering::SeqCst), 2);
    assert!(device.stored_secret.lock().unwrap().is_none());
}

#[tokio::test]
async fn pairing_stores_the_secret() {
    let device = MockDevice::new(None);
    let port = spawn_device(Arc::clone(&device)).await;

    let client = HttpClient::new("127.0.0.1", port, None);
    client.send_pairing_secret("fresh-secret").await.unwrap();
    assert_eq!(
        device.stored_secret.lock().unwrap().as_deref(),
        Some("fresh-secret")
    );

    // The paired device now answers with that bearer.
    let client = HttpClient::new("127.0.0.1", port, Some("fresh-secret".to_string()));
    let id = client.fetch_device_id().await.unwrap();
    assert_eq!(id.as_deref(), Some("panel-1234"));
}

#[tokio::test]
async fn pairing_rejection_surfaces_the_status() {
    let device = MockDevice::new(None);
    device.reject_pairing.store(true, Ordering::SeqCst);
    let port = spawn_device(Arc::clone(&device)).await;

    let client = HttpClient::new("127.0.0.1", port, None);
    match client.send_pairing_secret("fresh-secret").await {
        Err(ClientError::Response { status, .. }) => assert_eq!(status, 503),
        other => panic!("expected response error, got {other:?}"),
    }
}

#[tokio::test]
async fn unpair_rejection_surfaces_the_status() {
    let device = MockDevice::new(None);
    device.reject_unpair.store(true, Ordering::SeqCst);
    let port = spawn_device(Arc::clone(&device)).await;

    let client = HttpClient::new("127.0.0.1", port, None);
    match client.unpair_device().await {
        Err(ClientError::Response { status, .. }) => assert_eq!(status, 500),
        other => panic!("expected response error, got {other:?}"),
    }
}
