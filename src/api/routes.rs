//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, rejection::QueryRejection, Extension, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::domain::{PartnerIdentity, Terminal, Transaction};
use crate::error::AppError;
use crate::export::{CreateExportRequest, ExportCreated, ExportStatusView, StorageError};
use crate::query::{TerminalListParams, TransactionQueryRequest};
use crate::webhook::{WebhookAction, HEADER_RAZORPAY_SIGNATURE};

use super::middleware::{
    auth_middleware, export_rate_limit, global_rate_limit, logging_middleware, require_export,
    require_read, webhook_rate_limit,
};
use super::response::ApiResponse;
use super::state::AppState;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub message: String,
    #[serde(rename = "txnId")]
    pub txn_id: Option<String>,
    pub action: WebhookAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub expires: Option<i64>,
    pub signature: Option<String>,
}

// =========================================================================
// API Router
// =========================================================================

/// Build the full application router over `state`
pub fn create_router(state: AppState) -> Router {
    let read_routes = Router::new()
        .route("/partner/pos-machines", get(list_terminals))
        .route("/partner/pos-transactions", post(query_transactions))
        .route("/partner/export-status/:job_id", get(export_status))
        .route_layer(middleware::from_fn(require_read));

    // Permission is checked before the export budget is drawn down
    let export_routes = Router::new()
        .route("/partner/pos-transactions/export", post(create_export))
        .route_layer(middleware::from_fn_with_state(state.clone(), export_rate_limit))
        .route_layer(middleware::from_fn(require_export));

    // Layers run last-added first: auth -> global limit -> route checks -> handler
    let partner_routes = read_routes
        .merge(export_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), global_rate_limit))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // The handler always answers 200 with an acknowledgement. Refusals made
    // before it runs keep their own status: 413 over the default 2 MB body
    // limit and 408 from the timeout layer (framework bodies), 429 from the
    // webhook lane (error envelope).
    let webhook_routes = Router::new()
        .route("/webhook/razorpay-pos", post(razorpay_webhook))
        .route_layer(middleware::from_fn_with_state(state.clone(), webhook_rate_limit));

    let prefix = state.config.server.route_prefix.trim_end_matches('/').to_string();
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/downloads/*key", get(download))
        .merge(webhook_routes);
    let router = if prefix.is_empty() {
        router.merge(partner_routes)
    } else {
        router.nest(&prefix, partner_routes)
    };

    let timeout = Duration::from_secs(state.config.server.request_timeout_secs.max(1));

    router
        .layer(middleware::from_fn(logging_middleware))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

// =========================================================================
// GET /partner/pos-machines
// =========================================================================

async fn list_terminals(
    State(state): State<AppState>,
    Extension(identity): Extension<PartnerIdentity>,
    query: Result<Query<TerminalListParams>, QueryRejection>,
) -> Result<ApiResponse<Vec<Terminal>>, AppError> {
    let Query(params) = query?;
    let page = state.queries.list_terminals(&identity, params).await?;
    Ok(ApiResponse::ok(page.items).with_pagination(page.pagination))
}

// =========================================================================
// POST /partner/pos-transactions
// =========================================================================

async fn query_transactions(
    State(state): State<AppState>,
    Extension(identity): Extension<PartnerIdentity>,
    payload: Result<Json<TransactionQueryRequest>, JsonRejection>,
) -> Result<ApiResponse<Vec<Transaction>>, AppError> {
    let Json(request) = payload?;
    let page = state.queries.search(&identity, request).await?;
    Ok(ApiResponse::ok(page.items)
        .with_pagination(page.pagination)
        .with_summary(page.summary))
}

// =========================================================================
// POST /partner/pos-transactions/export
// =========================================================================

async fn create_export(
    State(state): State<AppState>,
    Extension(identity): Extension<PartnerIdentity>,
    payload: Result<Json<CreateExportRequest>, JsonRejection>,
) -> Result<(StatusCode, ApiResponse<ExportCreated>), AppError> {
    let Json(request) = payload?;
    let created = state.exports.create(&identity, request).await?;
    Ok((StatusCode::ACCEPTED, ApiResponse::ok(created)))
}

// =========================================================================
// GET /partner/export-status/:job_id
// =========================================================================

async fn export_status(
    State(state): State<AppState>,
    Extension(identity): Extension<PartnerIdentity>,
    Path(job_id): Path<String>,
) -> Result<ApiResponse<ExportStatusView>, AppError> {
    let view = state.exports.status(&identity, &job_id).await?;
    Ok(ApiResponse::ok(view))
}

// =========================================================================
// POST /webhook/razorpay-pos
// =========================================================================

/// Always answers 200; the outcome is carried in the body
async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResponse<WebhookAck> {
    let signature = headers
        .get(HEADER_RAZORPAY_SIGNATURE)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let outcome = state.webhooks.ingest(&body, signature).await;

    ApiResponse::new(
        outcome.action.is_success(),
        WebhookAck {
            message: outcome.message,
            txn_id: outcome.txn_id,
            action: outcome.action,
            transaction_id: outcome.transaction_id,
        },
    )
}

// =========================================================================
// GET /downloads/*key
// =========================================================================

const DOWNLOAD_CHUNK_BYTES: usize = 64 * 1024;

async fn download(
    State(state): State<AppState>,
    Path(key): Path<String>,
    query: Result<Query<DownloadQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(query) = query?;
    let (expires, signature) = match (query.expires, query.signature.as_deref()) {
        (Some(expires), Some(signature)) => (expires, signature),
        _ => return Err(AppError::Forbidden("Missing download signature".to_string())),
    };

    state
        .signer
        .verify(&key, expires, signature, Utc::now())
        .map_err(|e| AppError::Forbidden(e.to_string()))?;

    let object = match state.storage.open(&key).await {
        Ok(object) => object,
        Err(StorageError::NotFound(_)) | Err(StorageError::InvalidKey(_)) => {
            return Err(AppError::NotFound("File not found".to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(key = %key, size = object.size, "Serving export download");

    let stream = futures::stream::unfold(Some(object.file), |file| async move {
        let mut file = file?;
        let mut buf = vec![0u8; DOWNLOAD_CHUNK_BYTES];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(file)))
            }
            Err(e) => Some((Err::<Bytes, std::io::Error>(e), None)),
        }
    });

    let filename = key.rsplit('/').next().unwrap_or("export");
    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(&key)));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(object.size));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("csv") => "text/csv; charset=utf-8",
        Some("xls") => "application/vnd.ms-excel",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}
