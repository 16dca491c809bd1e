//! POS transactions as recorded from processor notifications

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use super::{Money, TxnStatus};

/// A stored POS transaction.
///
/// `partner_id` is always the owner of `terminal_id` at ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub partner_id: Uuid,
    pub terminal_id: String,
    pub external_txn_id: String,
    pub external_ref: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub status: TxnStatus,
    pub settlement_status: Option<String>,
    pub payment_mode: Option<String>,
    pub card_brand: Option<String>,
    pub card_type: Option<String>,
    pub card_masked: Option<String>,
    pub customer_name: Option<String>,
    pub auth_code: Option<String>,
    pub rrn: Option<String>,
    pub issuing_bank: Option<String>,
    pub acquiring_bank: Option<String>,
    pub receipt_url: Option<String>,
    pub device_serial: Option<String>,
    pub txn_time: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub raw_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A transaction about to be inserted on first sighting
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub partner_id: Uuid,
    pub terminal_id: String,
    pub external_txn_id: String,
    pub external_ref: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub status: TxnStatus,
    pub settlement_status: Option<String>,
    pub payment_mode: Option<String>,
    pub card_brand: Option<String>,
    pub card_type: Option<String>,
    pub card_masked: Option<String>,
    pub customer_name: Option<String>,
    pub auth_code: Option<String>,
    pub rrn: Option<String>,
    pub issuing_bank: Option<String>,
    pub acquiring_bank: Option<String>,
    pub receipt_url: Option<String>,
    pub device_serial: Option<String>,
    pub txn_time: DateTime<Utc>,
    pub raw_payload: serde_json::Value,
}

/// Half-width of the window in which a repeated `external_txn_id` is the same transaction
pub const DEDUP_WINDOW_HOURS: i64 = 24;

impl NewTransaction {
    /// `txn_time ± 1 day`
    pub fn dedup_window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let half = Duration::hours(DEDUP_WINDOW_HOURS);
        (self.txn_time - half, self.txn_time + half)
    }

    pub fn into_transaction(self, id: Uuid, now: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            partner_id: self.partner_id,
            terminal_id: self.terminal_id,
            external_txn_id: self.external_txn_id,
            external_ref: self.external_ref,
            amount: self.amount,
            currency: self.currency,
            status: self.status,
            settlement_status: self.settlement_status,
            payment_mode: self.payment_mode,
            card_brand: self.card_brand,
            card_type: self.card_type,
            card_masked: self.card_masked,
            customer_name: self.customer_name,
            auth_code: self.auth_code,
            rrn: self.rrn,
            issuing_bank: self.issuing_bank,
            acquiring_bank: self.acquiring_bank,
            receipt_url: self.receipt_url,
            device_serial: self.device_serial,
            txn_time: self.txn_time,
            raw_payload: self.raw_payload,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of applying one notification to storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted(Uuid),
    Updated(Uuid),
    Duplicate(Uuid),
}

impl ApplyOutcome {
    pub fn transaction_id(&self) -> Uuid {
        match *self {
            ApplyOutcome::Inserted(id) | ApplyOutcome::Updated(id) | ApplyOutcome::Duplicate(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusBucket {
    pub count: i64,
    pub amount: Money,
}

/// Aggregates over a full filtered set, independent of paging
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionSummary {
    pub total_transactions: i64,
    pub total_amount: Money,
    pub captured_amount: Money,
    pub by_status: BTreeMap<String, StatusBucket>,
    pub unique_terminals: i64,
}

impl Default for TransactionSummary {
    fn default() -> Self {
        let by_status = TxnStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), StatusBucket::default()))
            .collect();
        Self {
            total_transactions: 0,
            total_amount: Money::ZERO,
            captured_amount: Money::ZERO,
            by_status,
            unique_terminals: 0,
        }
    }
}

impl TransactionSummary {
    /// Fold per-status rows into a summary
    pub fn from_buckets(
        buckets: impl IntoIterator<Item = (TxnStatus, StatusBucket)>,
        unique_terminals: i64,
    ) -> Self {
        let mut summary = Self::default();
        for (status, bucket) in buckets {
            summary.total_transactions += bucket.count;
            summary.total_amount = summary.total_amount.saturating_add(bucket.amount);
            if status == TxnStatus::Captured {
                summary.captured_amount = summary.captured_amount.saturating_add(bucket.amount);
            }
            let entry = summary
                .by_status
                .entry(status.as_str().to_string())
                .or_default();
            entry.count += bucket.count;
            entry.amount = entry.amount.saturating_add(bucket.amount);
        }
        summary.unique_terminals = unique_terminals;
        summary
    }

    pub fn from_transactions<'a>(rows: impl IntoIterator<Item = &'a Transaction>) -> Self {
        let mut buckets: BTreeMap<TxnStatus, StatusBucket> = BTreeMap::new();
        let mut terminals = HashSet::new();
        for txn in rows {
            let bucket = buckets.entry(txn.status).or_default();
            bucket.count += 1;
            bucket.amount = bucket.amount.saturating_add(txn.amount);
            terminals.insert(txn.terminal_id.as_str());
        }
        Self::from_buckets(buckets, terminals.len() as i64)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn transaction(partner_id: Uuid, terminal_id: &str, status: TxnStatus, minor: i64) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            partner_id,
            terminal_id: terminal_id.to_string(),
            external_txn_id: Uuid::new_v4().to_string(),
            external_ref: None,
            amount: Money::from_minor(minor),
            currency: "INR".to_string(),
            status,
            settlement_status: None,
            payment_mode: Some("CARD".to_string()),
            card_brand: None,
            card_type: None,
            card_masked: None,
            customer_name: None,
            auth_code: None,
            rrn: None,
            issuing_bank: None,
            acquiring_bank: None,
            receipt_url: None,
            device_serial: None,
            txn_time: now,
            raw_payload: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }
}
