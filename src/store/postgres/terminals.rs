use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::like_escape;
use crate::domain::{Page, PageRequest, Terminal, TerminalFilter, TerminalStatus};
use crate::store::{StoreError, TerminalRepository};

#[derive(Debug, Clone)]
pub struct PgTerminalRepository {
    pool: PgPool,
}

impl PgTerminalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TERMINAL_COLUMNS: &str = "terminal_id, device_serial, machine_type, model, partner_id, \
     retailer_id, status, last_txn_at, created_at";

#[derive(sqlx::FromRow)]
struct TerminalRow {
    terminal_id: String,
    device_serial: Option<String>,
    machine_type: Option<String>,
    model: Option<String>,
    partner_id: Uuid,
    retailer_id: Option<String>,
    status: String,
    last_txn_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TerminalRow> for Terminal {
    type Error = StoreError;

    fn try_from(row: TerminalRow) -> Result<Self, Self::Error> {
        let status: TerminalStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::corrupt(format!("terminal {}: {}", row.terminal_id, e)))?;
        Ok(Terminal {
            terminal_id: row.terminal_id,
            device_serial: row.device_serial,
            machine_type: row.machine_type,
            model: row.model,
            partner_id: row.partner_id,
            retailer_id: row.retailer_id,
            status,
            last_txn_at: row.last_txn_at,
            created_at: row.created_at,
        })
    }
}

fn push_filter<'a>(qb: &mut QueryBuilder<'a, Postgres>, partner_id: Uuid, filter: &'a TerminalFilter) {
    qb.push(" WHERE partner_id = ").push_bind(partner_id);
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(ref machine_type) = filter.machine_type {
        qb.push(" AND LOWER(machine_type) = LOWER(")
            .push_bind(machine_type.as_str())
            .push(")");
    }
    if let Some(ref search) = filter.search {
        let pattern = format!("%{}%", like_escape(search));
        qb.push(" AND (terminal_id ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR device_serial ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl TerminalRepository for PgTerminalRepository {
    async fn find(&self, terminal_id: &str) -> Result<Option<Terminal>, StoreError> {
        let row: Option<TerminalRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pos_terminals WHERE terminal_id = $1",
            TERMINAL_COLUMNS
        ))
        .bind(terminal_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Terminal::try_from).transpose()
    }

    async fn list_for_partner(
        &self,
        partner_id: Uuid,
        filter: &TerminalFilter,
        page: PageRequest,
    ) -> Result<Page<Terminal>, StoreError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM pos_terminals");
        push_filter(&mut count, partner_id, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        if total == 0 {
            return Ok(Page::empty());
        }

        let mut select = QueryBuilder::new(format!("SELECT {} FROM pos_terminals", TERMINAL_COLUMNS));
        push_filter(&mut select, partner_id, filter);
        select
            .push(" ORDER BY terminal_id ASC LIMIT ")
            .push_bind(page.page_size)
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows: Vec<TerminalRow> = select.build_query_as().fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(Terminal::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page { items, total })
    }

    async fn touch_last_txn(&self, terminal_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE pos_terminals
            SET last_txn_at = GREATEST(COALESCE(last_txn_at, $2), $2)
            WHERE terminal_id = $1
            "#,
        )
        .bind(terminal_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
