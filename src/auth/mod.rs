//! Partner authentication
//!
//! Every partner request carries `x-api-key`, `x-signature` and
//! `x-timestamp`. The signature is `hex(HMAC-SHA256(secret, body ++ timestamp))`
//! with an empty body for GET. Checks run in a fixed order and the first
//! failure wins.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::crypto::{ip_allowed, normalize_ip, verify_hex};
use crate::domain::PartnerIdentity;
use crate::store::{PartnerRepository, StoreError};

pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_SIGNATURE: &str = "x-signature";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";

/// Why a request was turned away.
///
/// Messages name the failed check but never the partner or key that matched.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication headers (x-api-key, x-signature, x-timestamp)")]
    MissingHeaders,

    #[error("Invalid timestamp")]
    InvalidTimestamp,

    #[error("Request timestamp outside allowed window")]
    StaleTimestamp,

    #[error("Invalid API key")]
    UnknownKey,

    #[error("API key is inactive")]
    KeyInactive,

    #[error("API key has expired")]
    KeyExpired,

    #[error("Partner account is not active")]
    PartnerInactive,

    #[error("IP allowlist not configured for this API key")]
    AllowlistMissing,

    #[error("Unable to determine client IP")]
    UnknownClientIp,

    #[error("IP address not allowed")]
    IpNotAllowed,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Failures of the caller's credentials, as opposed to our storage
    pub fn is_rejection(&self) -> bool {
        !matches!(self, AuthError::Store(_))
    }
}

/// The parts of a request the gate looks at
#[derive(Debug, Clone, Copy)]
pub struct AuthRequest<'a> {
    pub api_key: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub body: &'a [u8],
    pub client_ip: Option<IpAddr>,
}

impl<'a> AuthRequest<'a> {
    pub fn from_headers(headers: &'a HeaderMap, body: &'a [u8], client_ip: Option<IpAddr>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        Self {
            api_key: header(HEADER_API_KEY),
            signature: header(HEADER_SIGNATURE),
            timestamp: header(HEADER_TIMESTAMP),
            body,
            client_ip,
        }
    }
}

#[derive(Clone)]
pub struct AuthGate {
    partners: Arc<dyn PartnerRepository>,
    timestamp_tolerance_secs: i64,
}

impl AuthGate {
    pub fn new(partners: Arc<dyn PartnerRepository>, timestamp_tolerance_secs: i64) -> Self {
        Self {
            partners,
            timestamp_tolerance_secs,
        }
    }

    pub async fn authenticate(&self, req: AuthRequest<'_>) -> Result<PartnerIdentity, AuthError> {
        self.authenticate_at(req, Utc::now()).await
    }

    pub async fn authenticate_at(
        &self,
        req: AuthRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<PartnerIdentity, AuthError> {
        let (api_key, signature, timestamp) = match (req.api_key, req.signature, req.timestamp) {
            (Some(k), Some(s), Some(t)) => (k, s, t),
            _ => return Err(AuthError::MissingHeaders),
        };

        let ts_ms: i64 = timestamp.parse().map_err(|_| AuthError::InvalidTimestamp)?;
        let skew_ms = now.timestamp_millis().abs_diff(ts_ms);
        let tolerance_ms = self.timestamp_tolerance_secs.max(0).unsigned_abs().saturating_mul(1000);
        if skew_ms > tolerance_ms {
            return Err(AuthError::StaleTimestamp);
        }

        let record = self
            .partners
            .find_api_key(api_key)
            .await?
            .ok_or(AuthError::UnknownKey)?;

        if !record.is_active {
            return Err(AuthError::KeyInactive);
        }
        if record.is_expired(now) {
            return Err(AuthError::KeyExpired);
        }
        if !record.partner_is_active() {
            return Err(AuthError::PartnerInactive);
        }

        // Fail closed: a key without an allowlist is unusable
        if record.ip_allowlist.iter().all(|e| e.trim().is_empty()) {
            return Err(AuthError::AllowlistMissing);
        }
        let ip = req.client_ip.ok_or(AuthError::UnknownClientIp)?;
        if !ip_allowed(ip, &record.ip_allowlist) {
            return Err(AuthError::IpNotAllowed);
        }

        if !verify_hex(record.secret.as_bytes(), &[req.body, timestamp.as_bytes()], signature) {
            return Err(AuthError::InvalidSignature);
        }

        let partners = self.partners.clone();
        let key = record.api_key.clone();
        tokio::spawn(async move {
            if let Err(e) = partners.touch_api_key(&key, Utc::now()).await {
                tracing::warn!(error = %e, "Failed to record API key usage");
            }
        });

        Ok(PartnerIdentity {
            partner_id: record.partner_id,
            partner_name: record.partner_name,
            api_key: record.api_key,
            permissions: record.permissions,
        })
    }
}

/// Resolve the caller IP.
///
/// The socket peer by default; the first `x-forwarded-for` entry when the
/// service sits behind a trusted proxy.
pub fn client_ip(peer: Option<SocketAddr>, headers: &HeaderMap, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return Some(normalize_ip(ip));
        }
    }
    peer.map(|addr| normalize_ip(addr.ip()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sign_hex;
    use crate::domain::{ApiKey, Partner, Permission};
    use crate::store::MemoryStore;
    use chrono::Duration;
    use uuid::Uuid;

    const SECRET: &str = "sk_test_secret";

    fn setup() -> (Arc<MemoryStore>, AuthGate) {
        let store = Arc::new(MemoryStore::new());
        let partner_id = Uuid::new_v4();
        store.insert_partner(Partner {
            id: partner_id,
            name: "Acme".to_string(),
            status: "active".to_string(),
        });
        store.insert_api_key(ApiKey {
            api_key: "pk_test".to_string(),
            partner_id,
            secret: SECRET.to_string(),
            permissions: vec![Permission::Read],
            ip_allowlist: vec!["10.0.0.0/8".to_string()],
            is_active: true,
            expires_at: None,
            last_used_at: None,
        });
        let gate = AuthGate::new(store.clone(), 300);
        (store, gate)
    }

    fn signed<'a>(body: &'a [u8], ts: &'a str, sig: &'a str, ip: &str) -> AuthRequest<'a> {
        AuthRequest {
            api_key: Some("pk_test"),
            signature: Some(sig),
            timestamp: Some(ts),
            body,
            client_ip: Some(ip.parse().unwrap()),
        }
    }

    #[tokio::test]
    async fn test_valid_request() {
        let (_, gate) = setup();
        let now = Utc::now();
        let ts = now.timestamp_millis().to_string();
        let body = br#"{"date_from":"2024-01-01"}"#;
        let sig = sign_hex(SECRET.as_bytes(), &[body, ts.as_bytes()]);

        let identity = gate
            .authenticate_at(signed(body, &ts, &sig, "::ffff:10.1.2.3"), now)
            .await
            .unwrap();
        assert_eq!(identity.partner_name, "Acme");
        assert_eq!(identity.permissions, vec![Permission::Read]);
    }

    #[tokio::test]
    async fn test_rejections() {
        let (store, gate) = setup();
        let now = Utc::now();
        let ts = now.timestamp_millis().to_string();
        let sig = sign_hex(SECRET.as_bytes(), &[&b""[..], ts.as_bytes()]);

        let mut missing = signed(b"", &ts, &sig, "10.0.0.1");
        missing.signature = None;
        assert!(matches!(
            gate.authenticate_at(missing, now).await,
            Err(AuthError::MissingHeaders)
        ));

        let stale = (now - Duration::seconds(301)).timestamp_millis().to_string();
        let stale_sig = sign_hex(SECRET.as_bytes(), &[&b""[..], stale.as_bytes()]);
        assert!(matches!(
            gate.authenticate_at(signed(b"", &stale, &stale_sig, "10.0.0.1"), now).await,
            Err(AuthError::StaleTimestamp)
        ));

        for extreme in [i64::MIN, i64::MAX] {
            let extreme = extreme.to_string();
            assert!(matches!(
                gate.authenticate_at(signed(b"", &extreme, &sig, "10.0.0.1"), now).await,
                Err(AuthError::StaleTimestamp)
            ));
        }

        assert!(matches!(
            gate.authenticate_at(signed(b"", "yesterday", &sig, "10.0.0.1"), now).await,
            Err(AuthError::InvalidTimestamp)
        ));

        assert!(matches!(
            gate.authenticate_at(signed(b"", &ts, &sig, "192.168.1.1"), now).await,
            Err(AuthError::IpNotAllowed)
        ));

        assert!(matches!(
            gate.authenticate_at(signed(b"{}", &ts, &sig, "10.0.0.1"), now).await,
            Err(AuthError::InvalidSignature)
        ));

        let mut key = store.api_key("pk_test").unwrap();
        key.ip_allowlist.clear();
        store.insert_api_key(key.clone());
        assert!(matches!(
            gate.authenticate_at(signed(b"", &ts, &sig, "10.0.0.1"), now).await,
            Err(AuthError::AllowlistMissing)
        ));

        key.ip_allowlist = vec!["10.0.0.1".to_string()];
        key.expires_at = Some(now - Duration::minutes(1));
        store.insert_api_key(key.clone());
        assert!(matches!(
            gate.authenticate_at(signed(b"", &ts, &sig, "10.0.0.1"), now).await,
            Err(AuthError::KeyExpired)
        ));

        key.expires_at = None;
        key.is_active = false;
        store.insert_api_key(key);
        assert!(matches!(
            gate.authenticate_at(signed(b"", &ts, &sig, "10.0.0.1"), now).await,
            Err(AuthError::KeyInactive)
        ));
    }

    #[test]
    fn test_client_ip_resolution() {
        let peer: SocketAddr = "[::ffff:192.0.2.7]:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());

        assert_eq!(
            client_ip(Some(peer), &headers, false),
            Some("192.0.2.7".parse().unwrap())
        );
        assert_eq!(
            client_ip(Some(peer), &headers, true),
            Some("203.0.113.9".parse().unwrap())
        );
        assert_eq!(client_ip(None, &HeaderMap::new(), true), None);
    }
}
