//! Request Context
//!
//! Metadata about the current partner request, carried into logs.

use serde::Serialize;
use std::net::IpAddr;
use uuid::Uuid;

use super::PartnerIdentity;

/// Context for an authenticated partner request.
///
/// Handler logs run inside [`RequestContext::span`], so every event they
/// emit carries the partner and correlation id.
#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    pub partner_id: Uuid,

    /// Public API key used for this request
    pub api_key: String,

    /// Taken from `x-request-id`, generated when absent
    pub correlation_id: String,

    /// Client IP address after normalization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
}

impl RequestContext {
    pub fn new(identity: &PartnerIdentity, client_ip: Option<IpAddr>, request_id: Option<&str>) -> Self {
        let correlation_id = request_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            partner_id: identity.partner_id,
            api_key: identity.api_key.clone(),
            correlation_id,
            client_ip,
        }
    }

    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "partner_request",
            partner_id = %self.partner_id,
            api_key = %self.api_key,
            correlation_id = %self.correlation_id,
            client_ip = ?self.client_ip,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Permission;

    fn identity() -> PartnerIdentity {
        PartnerIdentity {
            partner_id: Uuid::new_v4(),
            partner_name: "Acme".to_string(),
            api_key: "pk_live_1".to_string(),
            permissions: vec![Permission::Read],
        }
    }

    #[test]
    fn test_context_from_request() {
        let identity = identity();
        let ip: IpAddr = "10.1.2.3".parse().unwrap();

        let context = RequestContext::new(&identity, Some(ip), Some("req-1"));
        assert_eq!(context.partner_id, identity.partner_id);
        assert_eq!(context.api_key, "pk_live_1");
        assert_eq!(context.correlation_id, "req-1");
        assert_eq!(context.client_ip, Some(ip));
    }

    #[test]
    fn test_correlation_id_generated_when_missing() {
        let identity = identity();
        for request_id in [None, Some("  ")] {
            let context = RequestContext::new(&identity, None, request_id);
            assert!(Uuid::parse_str(&context.correlation_id).is_ok());
        }
    }
}
