//! Common test utilities
//!
//! Builds the full router over an in-memory store seeded with two partners,
//! and signs partner requests the way a real client would.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tower::util::ServiceExt;
use uuid::Uuid;

use pos_partner_api::api::{create_router, AppState};
use pos_partner_api::config::Config;
use pos_partner_api::crypto::sign_hex;
use pos_partner_api::domain::{
    ApiKey, Money, Partner, Permission, Terminal, TerminalStatus, Transaction, TxnStatus,
};
use pos_partner_api::store::{MemoryStore, Repositories};

pub const CLIENT_IP: &str = "127.0.0.1";

pub const KEY_A: &str = "pk_test_partner_a";
pub const SECRET_A: &str = "sk_test_partner_a";
pub const TERMINAL_A: &str = "TERM1";

pub const KEY_B: &str = "pk_test_partner_b";
pub const SECRET_B: &str = "sk_test_partner_b";
pub const TERMINAL_B: &str = "TERM2";

/// Read-only key for partner A
pub const KEY_A_READ_ONLY: &str = "pk_test_partner_a_ro";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub storage_dir: tempfile::TempDir,
    pub partner_a: Uuid,
    pub partner_b: Uuid,
}

pub fn setup() -> TestApp {
    setup_with(|_| {})
}

/// Setup test app - seed partners, keys and terminals, then build the router
pub fn setup_with(customize: impl FnOnce(&mut Config)) -> TestApp {
    let storage_dir = tempfile::tempdir().expect("Failed to create storage dir");

    let mut config = Config::default();
    config.storage.root = storage_dir.path().to_path_buf();
    config.storage.public_url = "http://localhost:3000".to_string();
    config.storage.signed_url_secret = "test-url-secret".to_string();
    config.export.temp_dir = Some(storage_dir.path().join("scratch"));
    customize(&mut config);

    let store = Arc::new(MemoryStore::new());
    let partner_a = seed_partner(&store, "Partner A", KEY_A, SECRET_A, TERMINAL_A);
    let partner_b = seed_partner(&store, "Partner B", KEY_B, SECRET_B, TERMINAL_B);
    store.insert_api_key(ApiKey {
        api_key: KEY_A_READ_ONLY.to_string(),
        partner_id: partner_a,
        secret: SECRET_A.to_string(),
        permissions: vec![Permission::Read],
        ip_allowlist: vec![CLIENT_IP.to_string()],
        is_active: true,
        expires_at: None,
        last_used_at: None,
    });

    let state = AppState::new(config, Repositories::in_memory(store.clone()));
    let router = create_router(state.clone());

    TestApp {
        router,
        state,
        store,
        storage_dir,
        partner_a,
        partner_b,
    }
}

fn seed_partner(store: &MemoryStore, name: &str, key: &str, secret: &str, terminal_id: &str) -> Uuid {
    let partner_id = Uuid::new_v4();
    store.insert_partner(Partner {
        id: partner_id,
        name: name.to_string(),
        status: "active".to_string(),
    });
    store.insert_api_key(ApiKey {
        api_key: key.to_string(),
        partner_id,
        secret: secret.to_string(),
        permissions: vec![Permission::Read, Permission::Export],
        ip_allowlist: vec![CLIENT_IP.to_string(), "10.0.0.0/8".to_string()],
        is_active: true,
        expires_at: None,
        last_used_at: None,
    });
    store.insert_terminal(Terminal {
        terminal_id: terminal_id.to_string(),
        device_serial: Some(format!("SN-{}", terminal_id)),
        machine_type: Some("android_pos".to_string()),
        model: Some("A920".to_string()),
        partner_id,
        retailer_id: None,
        status: TerminalStatus::Active,
        last_txn_at: None,
        created_at: Utc::now(),
    });
    partner_id
}

/// A stored transaction owned by `partner_id`
pub fn transaction_at(
    partner_id: Uuid,
    terminal_id: &str,
    status: TxnStatus,
    minor: i64,
    txn_time: DateTime<Utc>,
) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        partner_id,
        terminal_id: terminal_id.to_string(),
        external_txn_id: format!("EXT-{}", Uuid::new_v4()),
        external_ref: None,
        amount: Money::from_minor(minor),
        currency: "INR".to_string(),
        status,
        settlement_status: None,
        payment_mode: Some("CARD".to_string()),
        card_brand: Some("VISA".to_string()),
        card_type: Some("CREDIT".to_string()),
        card_masked: Some("411111******1111".to_string()),
        customer_name: None,
        auth_code: None,
        rrn: None,
        issuing_bank: None,
        acquiring_bank: None,
        receipt_url: None,
        device_serial: None,
        txn_time,
        raw_payload: Value::Null,
        created_at: txn_time,
        updated_at: txn_time,
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn peer() -> SocketAddr {
    SocketAddr::new(CLIENT_IP.parse().unwrap(), 40_000)
}

/// A partner request signed over `body ++ timestamp`
pub fn signed_request(method: &str, uri: &str, key: &str, secret: &str, body: Option<&Value>) -> Request<Body> {
    signed_request_at(method, uri, key, secret, body, now_millis())
}

pub fn signed_request_at(
    method: &str,
    uri: &str,
    key: &str,
    secret: &str,
    body: Option<&Value>,
    timestamp_ms: i64,
) -> Request<Body> {
    let bytes = body.map(|b| serde_json::to_vec(b).unwrap()).unwrap_or_default();
    let timestamp = timestamp_ms.to_string();
    let signature = sign_hex(secret.as_bytes(), &[bytes.as_slice(), timestamp.as_bytes()]);

    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", key)
        .header("x-signature", signature)
        .header("x-timestamp", timestamp);
    if body.is_some() {
        builder = builder.header("content-type", "application/json");
    }
    let mut request = builder.body(Body::from(bytes)).unwrap();
    request.extensions_mut().insert(ConnectInfo(peer()));
    request
}

pub fn webhook_request(payload: &Value) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri("/webhook/razorpay-pos")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(payload).unwrap()))
        .unwrap();
    request.extensions_mut().insert(ConnectInfo(peer()));
    request
}

pub fn plain_get(uri: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    request.extensions_mut().insert(ConnectInfo(peer()));
    request
}

/// Send a request and decode the JSON body (`Value::Null` when not JSON)
pub async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

pub fn today() -> String {
    Utc::now().date_naive().to_string()
}

pub fn days_ago(days: i64) -> String {
    (Utc::now().date_naive() - chrono::Duration::days(days)).to_string()
}
