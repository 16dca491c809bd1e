//! Razorpay POS notification payloads
//!
//! The processor is loose about types: ids arrive as strings or numbers,
//! amounts as either, and posting dates in several shapes. Everything is
//! read leniently here and validated in [`RazorpayPosPayload::validate`].

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::domain::{DomainError, Money, TxnStatus};

pub const DEFAULT_CURRENCY: &str = "INR";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RazorpayPosPayload {
    #[serde(default, alias = "txn_id", deserialize_with = "lenient_string")]
    pub txn_id: Option<String>,
    #[serde(default, alias = "terminalId", deserialize_with = "lenient_string")]
    pub tid: Option<String>,
    #[serde(default, alias = "externalRef", deserialize_with = "lenient_string")]
    pub external_ref_number: Option<String>,
    #[serde(default)]
    pub amount: Value,
    #[serde(default, alias = "currency", deserialize_with = "lenient_string")]
    pub currency_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub settlement_status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub payment_mode: Option<String>,
    #[serde(default, alias = "cardBrand", deserialize_with = "lenient_string")]
    pub payment_card_brand: Option<String>,
    #[serde(default, alias = "cardType", deserialize_with = "lenient_string")]
    pub payment_card_type: Option<String>,
    #[serde(
        default,
        alias = "maskedCardNumber",
        alias = "cardMasked",
        deserialize_with = "lenient_string"
    )]
    pub formatted_pan: Option<String>,
    #[serde(default, alias = "payerName", deserialize_with = "lenient_string")]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub auth_code: Option<String>,
    #[serde(default, alias = "rrn", deserialize_with = "lenient_string")]
    pub rr_number: Option<String>,
    #[serde(default, alias = "issuerBank", deserialize_with = "lenient_string")]
    pub issuing_bank: Option<String>,
    #[serde(default, alias = "acquirerCode", deserialize_with = "lenient_string")]
    pub acquiring_bank: Option<String>,
    #[serde(default, alias = "customerReceiptUrl", deserialize_with = "lenient_string")]
    pub receipt_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub device_serial: Option<String>,
    #[serde(default)]
    pub posting_date: Value,
}

/// A notification that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidNotification {
    pub external_txn_id: String,
    pub terminal_id: String,
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
    /// `postingDate` when present and readable, else receipt time
    pub txn_time: DateTime<Utc>,
}

impl RazorpayPosPayload {
    pub fn validate(self, received_at: DateTime<Utc>) -> Result<ValidNotification, DomainError> {
        let external_txn_id = self.txn_id.ok_or(DomainError::MissingField("txnId"))?;
        let terminal_id = self.tid.ok_or(DomainError::MissingField("tid"))?;

        let amount = Money::from_json(&self.amount)?.unwrap_or(Money::ZERO);

        let status = match self.status {
            Some(ref raw) => raw.parse()?,
            None => TxnStatus::Authorized,
        };

        let txn_time = match parse_posting_date(&self.posting_date) {
            Some(at) => at,
            None => {
                if !self.posting_date.is_null() {
                    tracing::warn!(
                        txn_id = %external_txn_id,
                        posting_date = %self.posting_date,
                        "Unreadable postingDate, using receipt time"
                    );
                }
                received_at
            }
        };

        Ok(ValidNotification {
            external_txn_id,
            terminal_id,
            external_ref: self.external_ref_number,
            amount,
            currency: self
                .currency_code
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            status,
            settlement_status: self.settlement_status,
            payment_mode: self.payment_mode,
            card_brand: self.payment_card_brand,
            card_type: self.payment_card_type,
            card_masked: self.formatted_pan,
            customer_name: self.customer_name,
            auth_code: self.auth_code,
            rrn: self.rr_number,
            issuing_bank: self.issuing_bank,
            acquiring_bank: self.acquiring_bank,
            receipt_url: self.receipt_url,
            device_serial: self.device_serial,
            txn_time,
        })
    }
}

/// Epoch milliseconds (number or digit string), RFC 3339, or
/// `YYYY-MM-DD HH:MM:SS` read as UTC
pub fn parse_posting_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                return s
                    .parse::<i64>()
                    .ok()
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                .ok()
                .map(|naive| naive.and_utc())
        }
        _ => None,
    }
}

/// Strings are trimmed, numbers stringified, blanks and other shapes dropped
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
