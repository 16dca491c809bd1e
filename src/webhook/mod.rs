//! Processor webhook ingestion
//!
//! Turns at-least-once, possibly out-of-order Razorpay POS notifications
//! into one stored transaction per external id whose status only moves
//! forward. The outcome is always reported back as an action; nothing here
//! ever surfaces as an HTTP error to the sender.

pub mod payload;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::verify_hex;
use crate::domain::{ApplyOutcome, NewTransaction};
use crate::store::{TerminalRepository, TransactionRepository};

pub use payload::{parse_posting_date, RazorpayPosPayload, ValidNotification};

pub const HEADER_RAZORPAY_SIGNATURE: &str = "x-razorpay-signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookAction {
    Inserted,
    Updated,
    Duplicate,
    Unmatched,
    Rejected,
}

impl WebhookAction {
    /// Whether the notification was applied or recognised as already applied
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            WebhookAction::Inserted | WebhookAction::Updated | WebhookAction::Duplicate
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookAction::Inserted => "inserted",
            WebhookAction::Updated => "updated",
            WebhookAction::Duplicate => "duplicate",
            WebhookAction::Unmatched => "unmatched",
            WebhookAction::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WebhookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookOutcome {
    pub action: WebhookAction,
    pub message: String,
    pub txn_id: Option<String>,
    pub transaction_id: Option<Uuid>,
}

impl WebhookOutcome {
    fn new(action: WebhookAction, message: impl Into<String>, txn_id: Option<String>) -> Self {
        Self {
            action,
            message: message.into(),
            txn_id,
            transaction_id: None,
        }
    }

    fn applied(outcome: ApplyOutcome, txn_id: String) -> Self {
        let (action, message) = match outcome {
            ApplyOutcome::Inserted(_) => (WebhookAction::Inserted, "Transaction recorded"),
            ApplyOutcome::Updated(_) => (WebhookAction::Updated, "Transaction status updated"),
            ApplyOutcome::Duplicate(_) => (WebhookAction::Duplicate, "Duplicate notification ignored"),
        };
        Self {
            action,
            message: message.to_string(),
            txn_id: Some(txn_id),
            transaction_id: Some(outcome.transaction_id()),
        }
    }
}

#[derive(Clone)]
pub struct WebhookIngestor {
    terminals: Arc<dyn TerminalRepository>,
    transactions: Arc<dyn TransactionRepository>,
    secret: Option<String>,
}

impl WebhookIngestor {
    pub fn new(
        terminals: Arc<dyn TerminalRepository>,
        transactions: Arc<dyn TransactionRepository>,
        secret: Option<String>,
    ) -> Self {
        Self {
            terminals,
            transactions,
            secret,
        }
    }

    /// Process one raw notification body
    pub async fn ingest(&self, body: &[u8], signature: Option<&str>) -> WebhookOutcome {
        let outcome = self.ingest_at(body, signature, Utc::now()).await;
        tracing::info!(
            txn_id = outcome.txn_id.as_deref().unwrap_or("-"),
            action = %outcome.action,
            transaction_id = ?outcome.transaction_id,
            "Webhook processed: {}",
            outcome.message
        );
        outcome
    }

    pub async fn ingest_at(
        &self,
        body: &[u8],
        signature: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> WebhookOutcome {
        if let (Some(secret), Some(signature)) = (self.secret.as_deref(), signature) {
            if !verify_hex(secret.as_bytes(), &[body], signature) {
                tracing::warn!("Webhook signature mismatch");
                return WebhookOutcome::new(WebhookAction::Rejected, "Invalid signature", None);
            }
        }

        let raw: serde_json::Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "Webhook body is not valid JSON");
                return WebhookOutcome::new(WebhookAction::Rejected, "Malformed JSON payload", None);
            }
        };

        let payload: RazorpayPosPayload = match serde_json::from_value(raw.clone()) {
            Ok(p) => p,
            Err(e) => {
                return WebhookOutcome::new(
                    WebhookAction::Rejected,
                    format!("Unreadable payload: {}", e),
                    None,
                )
            }
        };
        let txn_id = payload.txn_id.clone();

        let valid = match payload.validate(received_at) {
            Ok(v) => v,
            Err(e) => return WebhookOutcome::new(WebhookAction::Rejected, e.to_string(), txn_id),
        };
        let txn_id = valid.external_txn_id.clone();

        let terminal = match self.terminals.find(&valid.terminal_id).await {
            Ok(Some(t)) => t,
            Ok(None) => {
                return WebhookOutcome::new(
                    WebhookAction::Unmatched,
                    format!("Unknown terminal {}", valid.terminal_id),
                    Some(txn_id),
                )
            }
            Err(e) => {
                tracing::error!(error = %e, terminal_id = %valid.terminal_id, "Terminal lookup failed");
                return internal_failure(txn_id);
            }
        };

        if !terminal.is_active() {
            return WebhookOutcome::new(
                WebhookAction::Rejected,
                format!("Terminal {} is {}", terminal.terminal_id, terminal.status),
                Some(txn_id),
            );
        }

        let new_txn = NewTransaction {
            partner_id: terminal.partner_id,
            terminal_id: terminal.terminal_id.clone(),
            external_txn_id: valid.external_txn_id,
            external_ref: valid.external_ref,
            amount: valid.amount,
            currency: valid.currency,
            status: valid.status,
            settlement_status: valid.settlement_status,
            payment_mode: valid.payment_mode,
            card_brand: valid.card_brand,
            card_type: valid.card_type,
            card_masked: valid.card_masked,
            customer_name: valid.customer_name,
            auth_code: valid.auth_code,
            rrn: valid.rrn,
            issuing_bank: valid.issuing_bank,
            acquiring_bank: valid.acquiring_bank,
            receipt_url: valid.receipt_url,
            device_serial: valid.device_serial.or(terminal.device_serial),
            txn_time: valid.txn_time,
            raw_payload: raw,
        };

        let applied = match self.transactions.apply(new_txn).await {
            Ok(applied) => applied,
            Err(e) => {
                tracing::error!(error = %e, txn_id = %txn_id, "Failed to store webhook transaction");
                return internal_failure(txn_id);
            }
        };

        let terminals = self.terminals.clone();
        let terminal_id = terminal.terminal_id;
        tokio::spawn(async move {
            if let Err(e) = terminals.touch_last_txn(&terminal_id, received_at).await {
                tracing::warn!(error = %e, terminal_id = %terminal_id, "Failed to stamp terminal last_txn_at");
            }
        });

        WebhookOutcome::applied(applied, txn_id)
    }
}

fn internal_failure(txn_id: String) -> WebhookOutcome {
    WebhookOutcome::new(
        WebhookAction::Rejected,
        "Notification could not be processed",
        Some(txn_id),
    )
}
