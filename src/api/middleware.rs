//! API Middleware
//!
//! Partner authentication, permission checks, rate limiting and request
//! logging.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};
use tracing::Instrument;

use crate::auth::{client_ip, AuthRequest};
use crate::domain::{PartnerIdentity, Permission, RequestContext};
use crate::error::AppError;
use crate::rate_limit::{RateLimitDecision, RateLimitLane};

use super::state::AppState;

/// Largest partner request body read for signature verification
pub const MAX_SIGNED_BODY_BYTES: usize = 1024 * 1024;

fn resolve_client_ip(state: &AppState, request: &Request<Body>) -> Option<IpAddr> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_ip(peer, request.headers(), state.config.server.trust_proxy_headers)
}

// =========================================================================
// Partner authentication
// =========================================================================

/// Verify the signed partner headers against the exact body bytes.
///
/// The body is buffered, checked, then handed on unchanged so handlers can
/// still extract it.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let ip = resolve_client_ip(&state, &request);
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_SIGNED_BODY_BYTES)
        .await
        .map_err(|_| AppError::BadRequest("Request body too large or unreadable".to_string()))?;

    let identity = match state
        .auth
        .authenticate(AuthRequest::from_headers(&parts.headers, &bytes, ip))
        .await
    {
        Ok(identity) => identity,
        Err(e) => {
            if e.is_rejection() {
                tracing::warn!(
                    reason = %e,
                    client_ip = ?ip,
                    path = %parts.uri.path(),
                    "Partner authentication rejected"
                );
            }
            return Err(e.into());
        }
    };

    let request_id = parts.headers.get("x-request-id").and_then(|v| v.to_str().ok());
    let span = RequestContext::new(&identity, ip, request_id).span();

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(identity);

    Ok(next.run(request).instrument(span).await)
}

// =========================================================================
// Permissions
// =========================================================================

fn check_permission(request: &Request<Body>, permission: Permission) -> Result<(), AppError> {
    let identity = request
        .extensions()
        .get::<PartnerIdentity>()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;

    if !identity.has_permission(permission) {
        tracing::warn!(
            partner_id = %identity.partner_id,
            required = %permission.as_str(),
            "Permission denied"
        );
        return Err(AppError::Forbidden(format!(
            "API key lacks '{}' permission",
            permission.as_str()
        )));
    }
    Ok(())
}

pub async fn require_read(request: Request<Body>, next: Next) -> Result<Response, AppError> {
    check_permission(&request, Permission::Read)?;
    Ok(next.run(request).await)
}

pub async fn require_export(request: Request<Body>, next: Next) -> Result<Response, AppError> {
    check_permission(&request, Permission::Export)?;
    Ok(next.run(request).await)
}

// =========================================================================
// Rate limiting
// =========================================================================

/// Partner lanes are mounted behind auth and key on the partner id
fn partner_key(request: &Request<Body>) -> Result<String, AppError> {
    request
        .extensions()
        .get::<PartnerIdentity>()
        .map(|identity| identity.partner_id.to_string())
        .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))
}

/// Webhook callers are unauthenticated and key on their IP
fn ip_key(state: &AppState, request: &Request<Body>) -> String {
    resolve_client_ip(state, request)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn enforce(state: &AppState, lane: RateLimitLane, key: &str) -> Result<(), AppError> {
    match state.limiter.check(lane, key) {
        RateLimitDecision::Allowed { .. } => Ok(()),
        RateLimitDecision::Denied { retry_after_secs } => {
            tracing::warn!(lane = %lane, key = %key, retry_after_secs, "Rate limit exceeded");
            Err(AppError::RateLimitExceeded {
                retry_after: retry_after_secs,
            })
        }
    }
}

pub async fn global_rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    enforce(&state, RateLimitLane::Global, &partner_key(&request)?)?;
    Ok(next.run(request).await)
}

pub async fn export_rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    enforce(&state, RateLimitLane::Export, &partner_key(&request)?)?;
    Ok(next.run(request).await)
}

pub async fn webhook_rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    enforce(&state, RateLimitLane::Webhook, &ip_key(&state, &request))?;
    Ok(next.run(request).await)
}

// =========================================================================
// Request logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &[
    "x-api-key",
    "x-signature",
    "x-razorpay-signature",
    "authorization",
    "cookie",
    "set-cookie",
];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let headers = mask_headers_for_logging(request.headers());
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        path = %path,
        request_id = ?request_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        request_id = ?request_id,
        "Request completed"
    );

    response
}
