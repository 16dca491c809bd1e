use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{parse_permissions, ApiKeyRecord};
use crate::store::{PartnerRepository, StoreError};

#[derive(Debug, Clone)]
pub struct PgPartnerRepository {
    pool: PgPool,
}

impl PgPartnerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    api_key: String,
    secret: String,
    permissions: Vec<String>,
    ip_allowlist: Vec<String>,
    is_active: bool,
    expires_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    partner_id: Uuid,
    partner_name: String,
    partner_status: String,
}

impl From<ApiKeyRow> for ApiKeyRecord {
    fn from(row: ApiKeyRow) -> Self {
        ApiKeyRecord {
            api_key: row.api_key,
            secret: row.secret,
            permissions: parse_permissions(&row.permissions),
            ip_allowlist: row.ip_allowlist,
            is_active: row.is_active,
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
            partner_id: row.partner_id,
            partner_name: row.partner_name,
            partner_status: row.partner_status,
        }
    }
}

#[async_trait]
impl PartnerRepository for PgPartnerRepository {
    async fn find_api_key(&self, api_key: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        let row: Option<ApiKeyRow> = sqlx::query_as(
            r#"
            SELECT
                k.api_key, k.secret, k.permissions, k.ip_allowlist, k.is_active,
                k.expires_at, k.last_used_at,
                p.id AS partner_id, p.name AS partner_name, p.status AS partner_status
            FROM partner_api_keys k
            JOIN partners p ON p.id = k.partner_id
            WHERE k.api_key = $1
            "#,
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ApiKeyRecord::from))
    }

    async fn touch_api_key(&self, api_key: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE partner_api_keys SET last_used_at = $2 WHERE api_key = $1")
            .bind(api_key)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
