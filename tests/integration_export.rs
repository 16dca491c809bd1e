//! Export Integration Tests
//!
//! Job creation, background production, status polling and signed
//! downloads.

use axum::{
    body::to_bytes,
    http::{header, StatusCode},
};
use chrono::{Duration, Utc};
use pos_partner_api::domain::TxnStatus;
use pos_partner_api::export::{ExportWorker, ExportWorkerConfig};
use serde_json::{json, Value};
use tower::util::ServiceExt;

mod common;

use common::*;

const EXPORT_PATH: &str = "/api/v1/partner/pos-transactions/export";

fn worker(app: &TestApp) -> ExportWorker {
    let repos = &app.state.repositories;
    ExportWorker::new(
        repos.export_jobs.clone(),
        repos.transactions.clone(),
        app.state.storage.clone(),
        ExportWorkerConfig::from(&app.state.config.export),
    )
}

fn export_body(format: &str) -> Value {
    json!({ "date_from": days_ago(7), "date_to": today(), "format": format })
}

async fn create_job(app: &TestApp, body: &Value) -> (StatusCode, Value) {
    send(app, signed_request("POST", EXPORT_PATH, KEY_A, SECRET_A, Some(body))).await
}

async fn job_status(app: &TestApp, key: &str, secret: &str, job_id: &str) -> (StatusCode, Value) {
    send(
        app,
        signed_request("GET", &format!("/api/v1/partner/export-status/{}", job_id), key, secret, None),
    )
    .await
}

/// Path and query of an issued download URL
fn local_path(url: &str) -> String {
    url.strip_prefix("http://localhost:3000").unwrap().to_string()
}

#[tokio::test]
async fn test_csv_export_end_to_end() {
    let app = setup();
    let now = Utc::now();
    for i in 0..7 {
        app.store.insert_transaction(transaction_at(
            app.partner_a,
            TERMINAL_A,
            TxnStatus::Captured,
            1_000 + i,
            now - Duration::hours(i),
        ));
    }
    app.store.insert_transaction(transaction_at(app.partner_b, TERMINAL_B, TxnStatus::Captured, 5, now));

    let (status, created) = create_job(&app, &export_body("csv")).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", created);
    assert_eq!(created["success"], true);
    assert_eq!(created["data"]["status"], "pending");
    let job_id = created["data"]["job_id"].as_str().unwrap().to_string();

    let (_, pending) = job_status(&app, KEY_A, SECRET_A, &job_id).await;
    assert_eq!(pending["data"]["status"], "pending");
    assert!(pending["data"].get("download_url").is_none());

    worker(&app).run_once().await.unwrap();

    let (status, done) = job_status(&app, KEY_A, SECRET_A, &job_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["data"]["status"], "completed");
    assert_eq!(done["data"]["row_count"], 7);
    assert!(done["data"]["expires_at"].is_string());
    let url = done["data"]["download_url"].as_str().unwrap().to_string();
    assert!(url.contains(&format!("/downloads/exports/{}/", app.partner_a)));
    assert!(url.contains(&format!("{}.csv?expires=", job_id)));

    let response = app.router.clone().oneshot(plain_get(&local_path(&url))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv; charset=utf-8");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let csv = String::from_utf8(body.to_vec()).unwrap();
    let lines: Vec<&str> = csv.split("\r\n").filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 8);
    assert!(lines[0].starts_with("transaction_id,"));
    assert!(lines[1..].iter().all(|l| l.contains(",TERM1,")));
}

#[tokio::test]
async fn test_signed_download_rejections() {
    let app = setup();
    let (_, created) = create_job(&app, &export_body("zip")).await;
    let job_id = created["data"]["job_id"].as_str().unwrap().to_string();
    worker(&app).run_once().await.unwrap();

    let (_, done) = job_status(&app, KEY_A, SECRET_A, &job_id).await;
    let url = local_path(done["data"]["download_url"].as_str().unwrap());
    assert!(url.contains(".zip?"));

    // Tampered signature
    let mut tampered = url.clone();
    let last = tampered.pop().unwrap();
    tampered.push(if last == '0' { '1' } else { '0' });
    let (status, json) = send(&app, plain_get(&tampered)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"]["code"], "FORBIDDEN");

    // No signature at all
    let bare = url.split('?').next().unwrap().to_string();
    let (status, _) = send(&app, plain_get(&bare)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Expired link
    let key = bare.trim_start_matches("/downloads/");
    let expired = app.state.signer.sign(key, Utc::now() - Duration::seconds(5));
    let (status, _) = send(&app, plain_get(&local_path(&expired.url))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Valid signature for an object that does not exist
    let missing = app
        .state
        .signer
        .sign("exports/nobody/2024-01-01/missing.csv", Utc::now() + Duration::minutes(5));
    let (status, json) = send(&app, plain_get(&local_path(&missing.url))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_export_status_scoping() {
    let app = setup();
    let (_, created) = create_job(&app, &export_body("pdf")).await;
    let job_id = created["data"]["job_id"].as_str().unwrap().to_string();

    let (status, json) = job_status(&app, KEY_B, SECRET_B, &job_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");

    let (status, _) = job_status(&app, KEY_A, SECRET_A, &uuid::Uuid::new_v4().to_string()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = job_status(&app, KEY_A, SECRET_A, "not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_export_request_validation() {
    let app = setup();

    let too_long = json!({ "date_from": days_ago(91), "date_to": today(), "format": "csv" });
    let (status, json) = create_job(&app, &too_long).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");

    let (status, _) = create_job(&app, &export_body("docx")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = create_job(&app, &json!({ "format": "csv" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Exactly 90 days is allowed
    let limit = json!({ "date_from": days_ago(90), "date_to": today(), "format": "excel" });
    let (status, _) = create_job(&app, &limit).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_daily_export_cap() {
    let app = setup_with(|c| c.export.daily_limit = 2);

    for _ in 0..2 {
        let (status, _) = create_job(&app, &export_body("csv")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let (status, json) = create_job(&app, &export_body("csv")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json["error"]["code"], "EXPORT_LIMIT_EXCEEDED");
    let retry_after = json["error"]["retry_after"].as_u64().unwrap();
    assert!(retry_after >= 1 && retry_after <= 86_400);

    // Another partner has its own allowance
    let (status, _) = send(
        &app,
        signed_request("POST", EXPORT_PATH, KEY_B, SECRET_B, Some(&export_body("csv"))),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}
