//! Transaction filters, date ranges and paging

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DomainError, Transaction, TxnStatus};

/// Partner-facing filters. The owning partner is never part of this;
/// it always comes from the authenticated identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub date_from: DateTime<Utc>,
    /// Inclusive upper bound
    pub date_to: DateTime<Utc>,
    #[serde(default)]
    pub status: Option<TxnStatus>,
    #[serde(default)]
    pub terminal_id: Option<String>,
    #[serde(default)]
    pub payment_mode: Option<String>,
    #[serde(default)]
    pub settlement_status: Option<String>,
}

impl TransactionFilter {
    pub fn new(date_from: DateTime<Utc>, date_to: DateTime<Utc>) -> Self {
        Self {
            date_from,
            date_to,
            status: None,
            terminal_id: None,
            payment_mode: None,
            settlement_status: None,
        }
    }

    /// In-process evaluation, mirroring the SQL predicate
    pub fn matches(&self, txn: &Transaction) -> bool {
        if txn.txn_time < self.date_from || txn.txn_time > self.date_to {
            return false;
        }
        if let Some(status) = self.status {
            if txn.status != status {
                return false;
            }
        }
        if let Some(ref terminal_id) = self.terminal_id {
            if &txn.terminal_id != terminal_id {
                return false;
            }
        }
        if !eq_opt_ignore_case(&self.payment_mode, &txn.payment_mode) {
            return false;
        }
        if !eq_opt_ignore_case(&self.settlement_status, &txn.settlement_status) {
            return false;
        }
        true
    }
}

fn eq_opt_ignore_case(wanted: &Option<String>, actual: &Option<String>) -> bool {
    match (wanted, actual) {
        (None, _) => true,
        (Some(w), Some(a)) => w.eq_ignore_ascii_case(a),
        (Some(_), None) => false,
    }
}

/// A parsed boundary: the instant, and whether the input was a bare date
fn parse_boundary(raw: &str, field: &str) -> Result<(DateTime<Utc>, bool), DomainError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok((dt.with_timezone(&Utc), false));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok((naive.and_utc(), false));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok((date.and_time(NaiveTime::MIN).and_utc(), true));
    }
    Err(DomainError::invalid_range(format!(
        "{} must be an ISO-8601 date or datetime (got '{}')",
        field, raw
    )))
}

/// Parse and bound a `date_from`/`date_to` pair.
///
/// A bare `date_to` covers its whole day. The span limit is measured
/// between the boundaries as given, so `2024-01-01..2024-03-31` is 90 days.
pub fn parse_date_range(
    date_from: Option<&str>,
    date_to: Option<&str>,
    max_days: i64,
) -> Result<(DateTime<Utc>, DateTime<Utc>), DomainError> {
    let from_raw = date_from
        .filter(|s| !s.trim().is_empty())
        .ok_or(DomainError::MissingField("date_from"))?;
    let to_raw = date_to
        .filter(|s| !s.trim().is_empty())
        .ok_or(DomainError::MissingField("date_to"))?;

    let (from, _) = parse_boundary(from_raw, "date_from")?;
    let (to, to_is_date) = parse_boundary(to_raw, "date_to")?;

    if to < from {
        return Err(DomainError::invalid_range("date_from must not be after date_to"));
    }
    if to - from > Duration::days(max_days) {
        return Err(DomainError::invalid_range(format!(
            "date range must not exceed {} days",
            max_days
        )));
    }

    let to = if to_is_date {
        to + Duration::days(1) - Duration::milliseconds(1)
    } else {
        to
    };

    Ok((from, to))
}

/// 1-based page request, already clamped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl PageRequest {
    /// Clamp caller input: pages start at 1, sizes fall in `[1, max]`.
    pub fn clamped(page: Option<i64>, page_size: Option<i64>, default_size: i64, max_size: i64) -> Self {
        let page = page.unwrap_or(1).max(1);
        let page_size = page_size.unwrap_or(default_size).clamp(1, max_size.max(1));
        Self { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

/// One page of results plus the size of the whole set
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self { items: Vec::new(), total: 0 }
    }
}

/// Pagination block of a listing response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
    pub total_records: i64,
    pub total_pages: i64,
    pub has_next: bool,
}

impl Pagination {
    pub fn new(request: PageRequest, total_records: i64) -> Self {
        let total_pages = if total_records == 0 {
            0
        } else {
            (total_records + request.page_size - 1) / request.page_size
        };
        Self {
            page: request.page,
            page_size: request.page_size,
            total_records,
            total_pages,
            has_next: request.page < total_pages,
        }
    }
}

/// Keyset position for streaming rows in `txn_time DESC, id DESC` order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamCursor {
    pub txn_time: DateTime<Utc>,
    pub id: Uuid,
}

impl StreamCursor {
    pub fn after(txn: &Transaction) -> Self {
        Self { txn_time: txn.txn_time, id: txn.id }
    }

    /// Whether `txn` sorts strictly after this cursor
    pub fn precedes(&self, txn: &Transaction) -> bool {
        (txn.txn_time, txn.id) < (self.txn_time, self.id)
    }
}
