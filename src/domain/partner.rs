//! Partners and their API keys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::DomainError;

/// What an API key may do.
///
/// `Admin` implies every other permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Export,
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Export => "export",
            Permission::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Permission::Read),
            "export" => Ok(Permission::Export),
            "admin" => Ok(Permission::Admin),
            other => Err(DomainError::UnknownPermission(other.to_string())),
        }
    }
}

/// Parse stored permission strings, dropping unknown entries.
pub fn parse_permissions(raw: &[String]) -> Vec<Permission> {
    raw.iter()
        .filter_map(|p| match p.parse() {
            Ok(permission) => Some(permission),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unknown permission on API key");
                None
            }
        })
        .collect()
}

/// A third-party partner organisation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partner {
    pub id: Uuid,
    pub name: String,
    pub status: String,
}

/// An issued API key. `secret` is the HMAC key and is never logged.
#[derive(Clone)]
pub struct ApiKey {
    pub api_key: String,
    pub partner_id: Uuid,
    pub secret: String,
    pub permissions: Vec<Permission>,
    pub ip_allowlist: Vec<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("api_key", &self.api_key)
            .field("partner_id", &self.partner_id)
            .field("secret", &"***MASKED***")
            .field("permissions", &self.permissions)
            .field("ip_allowlist", &self.ip_allowlist)
            .field("is_active", &self.is_active)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// An API key joined with its owning partner, as the auth gate sees it
#[derive(Clone)]
pub struct ApiKeyRecord {
    pub api_key: String,
    pub secret: String,
    pub permissions: Vec<Permission>,
    pub ip_allowlist: Vec<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub partner_id: Uuid,
    pub partner_name: String,
    pub partner_status: String,
}

impl ApiKeyRecord {
    pub fn join(key: &ApiKey, partner: &Partner) -> Self {
        Self {
            api_key: key.api_key.clone(),
            secret: key.secret.clone(),
            permissions: key.permissions.clone(),
            ip_allowlist: key.ip_allowlist.clone(),
            is_active: key.is_active,
            expires_at: key.expires_at,
            last_used_at: key.last_used_at,
            partner_id: partner.id,
            partner_name: partner.name.clone(),
            partner_status: partner.status.clone(),
        }
    }

    pub fn partner_is_active(&self) -> bool {
        self.partner_status.eq_ignore_ascii_case("active")
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

impl fmt::Debug for ApiKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyRecord")
            .field("api_key", &self.api_key)
            .field("secret", &"***MASKED***")
            .field("permissions", &self.permissions)
            .field("partner_id", &self.partner_id)
            .field("partner_status", &self.partner_status)
            .finish()
    }
}

/// Trusted partner identity resolved by the auth gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerIdentity {
    pub partner_id: Uuid,
    pub partner_name: String,
    pub api_key: String,
    pub permissions: Vec<Permission>,
}

impl PartnerIdentity {
    /// Check if this identity holds a permission
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions
            .iter()
            .any(|p| *p == permission || *p == Permission::Admin)
    }
}
