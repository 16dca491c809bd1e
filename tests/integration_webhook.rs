//! Webhook Integration Tests
//!
//! Idempotent, monotonic ingestion of processor notifications, observed
//! through the partner query API.

use axum::http::StatusCode;
use pos_partner_api::config::WindowConfig;
use pos_partner_api::domain::TxnStatus;
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;

use common::*;

const TXN_PATH: &str = "/api/v1/partner/pos-transactions";

#[tokio::test]
async fn test_authorize_then_capture_scenario() {
    let app = setup();

    let (status, json) = send(
        &app,
        webhook_request(&json!({
            "txnId": "T1", "tid": "TERM1", "amount": 100, "status": "AUTHORIZED"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["action"], "inserted");
    assert_eq!(json["data"]["txnId"], "T1");
    let first_id = json["data"]["transaction_id"].clone();

    let (status, json) = send(
        &app,
        webhook_request(&json!({
            "txnId": "T1", "tid": "TERM1", "amount": 100, "status": "CAPTURED", "settlementStatus": "PENDING"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["action"], "updated");
    assert_eq!(json["data"]["transaction_id"], first_id);

    // The owning partner sees exactly one captured row
    let body = json!({ "date_from": days_ago(1), "date_to": today() });
    let (status, json) = send(&app, signed_request("POST", TXN_PATH, KEY_A, SECRET_A, Some(&body))).await;
    assert_eq!(status, StatusCode::OK);
    let items = json["data"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["external_txn_id"], "T1");
    assert_eq!(items[0]["status"], "CAPTURED");
    assert_eq!(items[0]["settlement_status"], "PENDING");
    assert_eq!(items[0]["amount"], "100.00");
    assert_eq!(items[0]["device_serial"], "SN-TERM1");

    // Partner B never sees it
    let (_, json) = send(&app, signed_request("POST", TXN_PATH, KEY_B, SECRET_B, Some(&body))).await;
    assert_eq!(json["data"], json!([]));
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let app = setup();
    let payload = json!({
        "txnId": "DUP-1", "tid": "TERM1", "amount": "250.50", "status": "CAPTURED",
        "paymentMode": "CARD", "postingDate": "2024-05-01 10:15:00"
    });

    let (_, first) = send(&app, webhook_request(&payload)).await;
    assert_eq!(first["data"]["action"], "inserted");

    for _ in 0..3 {
        let (status, again) = send(&app, webhook_request(&payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["success"], true);
        assert_eq!(again["data"]["action"], "duplicate");
        assert_eq!(again["data"]["transaction_id"], first["data"]["transaction_id"]);
    }

    let rows = app.store.transactions();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].amount.to_string(), "250.50");
    assert_eq!(rows[0].txn_time.to_rfc3339(), "2024-05-01T10:15:00+00:00");
    assert_eq!(rows[0].partner_id, app.partner_a);
}

#[tokio::test]
async fn test_out_of_order_delivery_keeps_highest_status() {
    let app = setup();
    let deliveries = ["REFUNDED", "AUTHORISED", "CAPTURED", "void", "FAILED"];

    for status in deliveries {
        let (code, _) = send(
            &app,
            webhook_request(&json!({ "txnId": "OOO-1", "tid": "TERM1", "amount": 10, "status": status })),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
    }

    let rows = app.store.transactions();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, TxnStatus::Voided);
}

#[tokio::test]
async fn test_same_id_outside_window_is_new_transaction() {
    let app = setup();
    let at = |date: &str| json!({ "txnId": "REUSED", "tid": "TERM1", "amount": 5, "postingDate": date });

    let (_, first) = send(&app, webhook_request(&at("2024-01-01T12:00:00Z"))).await;
    let (_, second) = send(&app, webhook_request(&at("2024-01-05T12:00:00Z"))).await;
    assert_eq!(first["data"]["action"], "inserted");
    assert_eq!(second["data"]["action"], "inserted");
    assert_eq!(app.store.transactions().len(), 2);
}

#[tokio::test]
async fn test_failures_still_answer_200() {
    let app = setup();

    let (status, json) = send(&app, webhook_request(&json!({ "txnId": "X1", "tid": "UNKNOWN" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], false);
    assert_eq!(json["data"]["action"], "unmatched");

    let (status, json) = send(&app, webhook_request(&json!({ "tid": "TERM1" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["action"], "rejected");

    let (status, json) = send(
        &app,
        webhook_request(&json!({ "txnId": "X2", "tid": "TERM1", "amount": "abc" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["action"], "rejected");

    let (status, json) = send(
        &app,
        webhook_request(&json!({ "txnId": "X3", "tid": "TERM1", "status": "SETTLED" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["action"], "rejected");

    assert!(app.store.transactions().is_empty());
}

#[tokio::test]
async fn test_terminal_last_txn_is_stamped() {
    let app = setup();
    send(&app, webhook_request(&json!({ "txnId": "STAMP-1", "tid": "TERM1" }))).await;

    for _ in 0..50 {
        if app.store.terminal(TERMINAL_A).and_then(|t| t.last_txn_at).is_some() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("terminal last_txn_at was never stamped");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redelivery_inserts_once() {
    let app = setup();
    let payload = json!({
        "txnId": "RACE-1", "tid": "TERM1", "amount": "42.00", "status": "CAPTURED",
        "postingDate": "2024-05-01T09:00:00Z"
    });

    let deliveries = (0..10).map(|_| {
        let router = app.router.clone();
        let request = webhook_request(&payload);
        tokio::spawn(async move {
            let response = router.oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            serde_json::from_slice::<Value>(&body).unwrap()
        })
    });
    let acks: Vec<Value> = futures::future::join_all(deliveries)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let actions: Vec<&str> = acks.iter().map(|a| a["data"]["action"].as_str().unwrap()).collect();
    assert_eq!(actions.iter().filter(|a| **a == "inserted").count(), 1);
    assert_eq!(actions.iter().filter(|a| **a == "duplicate").count(), 9);

    let ids: Vec<&Value> = acks.iter().map(|a| &a["data"]["transaction_id"]).collect();
    assert!(ids.iter().all(|id| *id == ids[0]));

    let rows = app.store.transactions();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].external_txn_id, "RACE-1");
}

// Refusals made before the handler runs keep their own status instead of
// the always-200 acknowledgement.

#[tokio::test]
async fn test_webhook_lane_throttles_by_ip() {
    let app = setup_with(|c| c.rate_limit.webhook = WindowConfig::new(2, 60));

    for i in 0..2 {
        let (status, _) = send(
            &app,
            webhook_request(&json!({ "txnId": format!("RL-{}", i), "tid": "TERM1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, json) = send(&app, webhook_request(&json!({ "txnId": "RL-2", "tid": "TERM1" }))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(app.store.transactions().len(), 2);
}

#[tokio::test]
async fn test_oversized_webhook_body_is_refused() {
    let app = setup();
    let padding = "x".repeat(3 * 1024 * 1024);
    let (status, _) = send(
        &app,
        webhook_request(&json!({ "txnId": "BIG-1", "tid": "TERM1", "note": padding })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(app.store.transactions().is_empty());
}
