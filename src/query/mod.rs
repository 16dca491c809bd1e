//! Partner-scoped transaction queries and terminal listing

use serde::Deserialize;
use std::sync::Arc;

use crate::config::QueryConfig;
use crate::domain::{
    parse_date_range, DomainError, PageRequest, Pagination, PartnerIdentity, Terminal,
    TerminalFilter, TerminalStatus, Transaction, TransactionFilter, TransactionSummary, TxnStatus,
};
use crate::error::AppResult;
use crate::store::{TerminalRepository, TransactionRepository};

/// Filters as a partner sends them. Shared by queries and export creation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterParams {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub status: Option<String>,
    pub terminal_id: Option<String>,
    pub payment_mode: Option<String>,
    pub settlement_status: Option<String>,
}

impl FilterParams {
    /// Validate into a filter whose range spans at most `max_days`
    pub fn into_filter(self, max_days: i64) -> Result<TransactionFilter, DomainError> {
        let (date_from, date_to) =
            parse_date_range(self.date_from.as_deref(), self.date_to.as_deref(), max_days)?;

        let status = non_blank(self.status)
            .map(|s| s.parse::<TxnStatus>())
            .transpose()?;

        Ok(TransactionFilter {
            date_from,
            date_to,
            status,
            terminal_id: non_blank(self.terminal_id),
            payment_mode: non_blank(self.payment_mode),
            settlement_status: non_blank(self.settlement_status),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Body of `POST /partner/pos-transactions`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionQueryRequest {
    #[serde(flatten)]
    pub filters: FilterParams,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TransactionPage {
    pub items: Vec<Transaction>,
    pub pagination: Pagination,
    pub summary: TransactionSummary,
}

/// Query string of `GET /partner/pos-machines`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TerminalListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub machine_type: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TerminalPage {
    pub items: Vec<Terminal>,
    pub pagination: Pagination,
}

#[derive(Clone)]
pub struct TransactionQueryService {
    transactions: Arc<dyn TransactionRepository>,
    terminals: Arc<dyn TerminalRepository>,
    config: QueryConfig,
}

impl TransactionQueryService {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        terminals: Arc<dyn TerminalRepository>,
        config: QueryConfig,
    ) -> Self {
        Self {
            transactions,
            terminals,
            config,
        }
    }

    /// One page of the caller's transactions plus a summary of the whole set.
    ///
    /// The partner scope comes from `identity` only. A terminal filter naming
    /// someone else's terminal simply matches nothing.
    pub async fn search(
        &self,
        identity: &PartnerIdentity,
        request: TransactionQueryRequest,
    ) -> AppResult<TransactionPage> {
        let filter = request.filters.into_filter(self.config.max_range_days)?;
        let page = PageRequest::clamped(
            request.page,
            request.page_size,
            self.config.default_page_size,
            self.config.max_page_size,
        );

        let rows = self
            .transactions
            .page(identity.partner_id, &filter, page)
            .await?;
        let summary = if rows.total == 0 {
            TransactionSummary::default()
        } else {
            self.transactions
                .summary(identity.partner_id, &filter)
                .await?
        };

        tracing::debug!(
            partner_id = %identity.partner_id,
            total = rows.total,
            page = page.page,
            "Transaction query served"
        );

        Ok(TransactionPage {
            pagination: Pagination::new(page, rows.total),
            items: rows.items,
            summary,
        })
    }

    pub async fn list_terminals(
        &self,
        identity: &PartnerIdentity,
        params: TerminalListParams,
    ) -> AppResult<TerminalPage> {
        let status = non_blank(params.status)
            .map(|s| s.parse::<TerminalStatus>())
            .transpose()?;
        let filter = TerminalFilter {
            status,
            machine_type: non_blank(params.machine_type),
            search: non_blank(params.search),
        };
        let page = PageRequest::clamped(
            params.page,
            params.limit,
            self.config.default_page_size,
            self.config.max_page_size,
        );

        let rows = self
            .terminals
            .list_for_partner(identity.partner_id, &filter, page)
            .await?;

        Ok(TerminalPage {
            pagination: Pagination::new(page, rows.total),
            items: rows.items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::fixtures::transaction;
    use crate::domain::Permission;
    use crate::error::AppError;
    use crate::store::MemoryStore;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn identity(partner_id: Uuid) -> PartnerIdentity {
        PartnerIdentity {
            partner_id,
            partner_name: "Acme".to_string(),
            api_key: "pk".to_string(),
            permissions: vec![Permission::Read],
        }
    }

    fn service(store: Arc<MemoryStore>) -> TransactionQueryService {
        TransactionQueryService::new(store.clone(), store, QueryConfig::default())
    }

    fn today_range() -> FilterParams {
        let today = Utc::now().date_naive();
        FilterParams {
            date_from: Some((today - Duration::days(1)).to_string()),
            date_to: Some(today.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_params_validation() {
        let params = FilterParams {
            status: Some("captured".to_string()),
            terminal_id: Some("  ".to_string()),
            ..today_range()
        };
        let filter = params.into_filter(90).unwrap();
        assert_eq!(filter.status, Some(TxnStatus::Captured));
        assert!(filter.terminal_id.is_none());

        let bad = FilterParams {
            status: Some("PENDING".to_string()),
            ..today_range()
        };
        assert!(bad.into_filter(90).is_err());
    }

    #[tokio::test]
    async fn test_search_is_partner_scoped() {
        let store = Arc::new(MemoryStore::new());
        let mine = Uuid::new_v4();
        let theirs = Uuid::new_v4();
        store.insert_transaction(transaction(mine, "T1", TxnStatus::Captured, 1000));
        store.insert_transaction(transaction(mine, "T2", TxnStatus::Failed, 500));
        store.insert_transaction(transaction(theirs, "T9", TxnStatus::Captured, 9999));

        let svc = service(store);
        let page = svc
            .search(&identity(mine), TransactionQueryRequest { filters: today_range(), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.items.iter().all(|t| t.partner_id == mine));
        assert_eq!(page.summary.total_amount.to_string(), "15.00");
        assert_eq!(page.summary.captured_amount.to_string(), "10.00");

        // Someone else's terminal: empty, not an error
        let foreign = svc
            .search(
                &identity(mine),
                TransactionQueryRequest {
                    filters: FilterParams { terminal_id: Some("T9".to_string()), ..today_range() },
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(foreign.items.is_empty());
        assert_eq!(foreign.summary.total_transactions, 0);
        assert_eq!(foreign.pagination.total_pages, 0);
    }

    #[tokio::test]
    async fn test_search_rejects_long_range() {
        let svc = service(Arc::new(MemoryStore::new()));
        let err = svc
            .search(
                &identity(Uuid::new_v4()),
                TransactionQueryRequest {
                    filters: FilterParams {
                        date_from: Some("2024-01-01".to_string()),
                        date_to: Some("2024-06-01".to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Domain(DomainError::InvalidDateRange(_))));
    }
}
