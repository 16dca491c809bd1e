use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::domain::{
    ApplyOutcome, Money, NewTransaction, Page, PageRequest, StatusBucket, StatusTransition,
    StreamCursor, Transaction, TransactionFilter, TransactionSummary, TxnStatus,
};
use crate::store::{StoreError, TransactionRepository};

#[derive(Debug, Clone)]
pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TXN_COLUMNS: &str = "id, partner_id, terminal_id, external_txn_id, external_ref, amount, \
     currency, status, settlement_status, payment_mode, card_brand, card_type, card_masked, \
     customer_name, auth_code, rrn, issuing_bank, acquiring_bank, receipt_url, device_serial, \
     txn_time, raw_payload, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    partner_id: Uuid,
    terminal_id: String,
    external_txn_id: String,
    external_ref: Option<String>,
    amount: Decimal,
    currency: String,
    status: String,
    settlement_status: Option<String>,
    payment_mode: Option<String>,
    card_brand: Option<String>,
    card_type: Option<String>,
    card_masked: Option<String>,
    customer_name: Option<String>,
    auth_code: Option<String>,
    rrn: Option<String>,
    issuing_bank: Option<String>,
    acquiring_bank: Option<String>,
    receipt_url: Option<String>,
    device_serial: Option<String>,
    txn_time: DateTime<Utc>,
    raw_payload: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let status: TxnStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::corrupt(format!("transaction {}: {}", row.id, e)))?;
        let amount = Money::from_decimal(row.amount)
            .map_err(|e| StoreError::corrupt(format!("transaction {}: {}", row.id, e)))?;
        Ok(Transaction {
            id: row.id,
            partner_id: row.partner_id,
            terminal_id: row.terminal_id,
            external_txn_id: row.external_txn_id,
            external_ref: row.external_ref,
            amount,
            currency: row.currency,
            status,
            settlement_status: row.settlement_status,
            payment_mode: row.payment_mode,
            card_brand: row.card_brand,
            card_type: row.card_type,
            card_masked: row.card_masked,
            customer_name: row.customer_name,
            auth_code: row.auth_code,
            rrn: row.rrn,
            issuing_bank: row.issuing_bank,
            acquiring_bank: row.acquiring_bank,
            receipt_url: row.receipt_url,
            device_serial: row.device_serial,
            txn_time: row.txn_time,
            raw_payload: row.raw_payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_transactions(rows: Vec<TransactionRow>) -> Result<Vec<Transaction>, StoreError> {
    rows.into_iter().map(Transaction::try_from).collect()
}

/// Partner scope plus the caller's filters
fn push_filter<'a>(
    qb: &mut QueryBuilder<'a, Postgres>,
    partner_id: Uuid,
    filter: &'a TransactionFilter,
) {
    qb.push(" WHERE partner_id = ").push_bind(partner_id);
    qb.push(" AND txn_time >= ").push_bind(filter.date_from);
    qb.push(" AND txn_time <= ").push_bind(filter.date_to);
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(ref terminal_id) = filter.terminal_id {
        qb.push(" AND terminal_id = ").push_bind(terminal_id.as_str());
    }
    if let Some(ref payment_mode) = filter.payment_mode {
        qb.push(" AND UPPER(payment_mode) = UPPER(")
            .push_bind(payment_mode.as_str())
            .push(")");
    }
    if let Some(ref settlement_status) = filter.settlement_status {
        qb.push(" AND UPPER(settlement_status) = UPPER(")
            .push_bind(settlement_status.as_str())
            .push(")");
    }
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    async fn apply(&self, txn: NewTransaction) -> Result<ApplyOutcome, StoreError> {
        let (window_start, window_end) = txn.dedup_window();
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent notifications for the same external id
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&txn.external_txn_id)
            .execute(&mut *tx)
            .await?;

        let existing: Option<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, status
            FROM pos_transactions
            WHERE external_txn_id = $1 AND txn_time BETWEEN $2 AND $3
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(&txn.external_txn_id)
        .bind(window_start)
        .bind(window_end)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            Some((id, stored)) => {
                let stored: TxnStatus = stored
                    .parse()
                    .map_err(|e| StoreError::corrupt(format!("transaction {}: {}", id, e)))?;
                match StatusTransition::decide(Some(stored), txn.status) {
                    StatusTransition::Advance => {
                        let result = sqlx::query(
                            r#"
                            UPDATE pos_transactions
                            SET status = $2,
                                status_rank = $3,
                                settlement_status = COALESCE($4, settlement_status),
                                updated_at = NOW()
                            WHERE id = $1 AND status_rank < $3
                            "#,
                        )
                        .bind(id)
                        .bind(txn.status.as_str())
                        .bind(txn.status.rank())
                        .bind(&txn.settlement_status)
                        .execute(&mut *tx)
                        .await?;

                        if result.rows_affected() == 1 {
                            ApplyOutcome::Updated(id)
                        } else {
                            ApplyOutcome::Duplicate(id)
                        }
                    }
                    _ => ApplyOutcome::Duplicate(id),
                }
            }
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO pos_transactions (
                        id, partner_id, terminal_id, external_txn_id, external_ref, amount,
                        currency, status, status_rank, settlement_status, payment_mode,
                        card_brand, card_type, card_masked, customer_name, auth_code, rrn,
                        issuing_bank, acquiring_bank, receipt_url, device_serial, txn_time,
                        raw_payload
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                            $16, $17, $18, $19, $20, $21, $22, $23)
                    "#,
                )
                .bind(id)
                .bind(txn.partner_id)
                .bind(&txn.terminal_id)
                .bind(&txn.external_txn_id)
                .bind(&txn.external_ref)
                .bind(txn.amount.to_decimal())
                .bind(&txn.currency)
                .bind(txn.status.as_str())
                .bind(txn.status.rank())
                .bind(&txn.settlement_status)
                .bind(&txn.payment_mode)
                .bind(&txn.card_brand)
                .bind(&txn.card_type)
                .bind(&txn.card_masked)
                .bind(&txn.customer_name)
                .bind(&txn.auth_code)
                .bind(&txn.rrn)
                .bind(&txn.issuing_bank)
                .bind(&txn.acquiring_bank)
                .bind(&txn.receipt_url)
                .bind(&txn.device_serial)
                .bind(txn.txn_time)
                .bind(&txn.raw_payload)
                .execute(&mut *tx)
                .await?;

                ApplyOutcome::Inserted(id)
            }
        };

        tx.commit().await?;

        Ok(outcome)
    }

    async fn page(
        &self,
        partner_id: Uuid,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<Transaction>, StoreError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM pos_transactions");
        push_filter(&mut count, partner_id, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        if total == 0 {
            return Ok(Page::empty());
        }

        let mut select = QueryBuilder::new(format!("SELECT {} FROM pos_transactions", TXN_COLUMNS));
        push_filter(&mut select, partner_id, filter);
        select
            .push(" ORDER BY txn_time DESC, id DESC LIMIT ")
            .push_bind(page.page_size)
            .push(" OFFSET ")
            .push_bind(page.offset());

        let rows: Vec<TransactionRow> = select.build_query_as().fetch_all(&self.pool).await?;

        Ok(Page {
            items: into_transactions(rows)?,
            total,
        })
    }

    async fn summary(
        &self,
        partner_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<TransactionSummary, StoreError> {
        let mut grouped = QueryBuilder::new(
            "SELECT status, COUNT(*), COALESCE(SUM(amount), 0) FROM pos_transactions",
        );
        push_filter(&mut grouped, partner_id, filter);
        grouped.push(" GROUP BY status");
        let rows: Vec<(String, i64, Decimal)> =
            grouped.build_query_as().fetch_all(&self.pool).await?;

        let mut distinct =
            QueryBuilder::new("SELECT COUNT(DISTINCT terminal_id) FROM pos_transactions");
        push_filter(&mut distinct, partner_id, filter);
        let unique_terminals: i64 = distinct.build_query_scalar().fetch_one(&self.pool).await?;

        let mut buckets = Vec::with_capacity(rows.len());
        for (status, count, amount) in rows {
            let status: TxnStatus = status.parse().map_err(|e| StoreError::corrupt(format!("{}", e)))?;
            buckets.push((status, StatusBucket { count, amount: Money::from_sum(amount) }));
        }

        Ok(TransactionSummary::from_buckets(buckets, unique_terminals))
    }

    async fn stream_batch(
        &self,
        partner_id: Uuid,
        filter: &TransactionFilter,
        after: Option<StreamCursor>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let mut select = QueryBuilder::new(format!("SELECT {} FROM pos_transactions", TXN_COLUMNS));
        push_filter(&mut select, partner_id, filter);
        if let Some(cursor) = after {
            select
                .push(" AND (txn_time, id) < (")
                .push_bind(cursor.txn_time)
                .push(", ")
                .push_bind(cursor.id)
                .push(")");
        }
        select
            .push(" ORDER BY txn_time DESC, id DESC LIMIT ")
            .push_bind(limit);

        let rows: Vec<TransactionRow> = select.build_query_as().fetch_all(&self.pool).await?;
        into_transactions(rows)
    }
}
