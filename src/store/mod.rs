//! Data Access
//!
//! Repository contracts over partners, terminals, transactions and export
//! jobs, with a Postgres implementation for production and an in-memory
//! one for tests and local runs.
//!
//! Every transaction query takes the partner id as a separate argument; it
//! is never read from caller-supplied filters.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    ApiKeyRecord, ApplyOutcome, ExportJob, NewExportJob, NewTransaction, Page, PageRequest,
    StreamCursor, Terminal, TerminalFilter, Transaction, TransactionFilter, TransactionSummary,
};

pub use memory::MemoryStore;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value that no longer parses into its domain type
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}

#[async_trait]
pub trait PartnerRepository: Send + Sync {
    /// Look up an API key joined with its partner
    async fn find_api_key(&self, api_key: &str) -> Result<Option<ApiKeyRecord>, StoreError>;

    /// Record that a key was used
    async fn touch_api_key(&self, api_key: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TerminalRepository: Send + Sync {
    async fn find(&self, terminal_id: &str) -> Result<Option<Terminal>, StoreError>;

    /// A partner's terminals ordered by terminal id
    async fn list_for_partner(
        &self,
        partner_id: Uuid,
        filter: &TerminalFilter,
        page: PageRequest,
    ) -> Result<Page<Terminal>, StoreError>;

    async fn touch_last_txn(&self, terminal_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Deduplicate and write one notification.
    ///
    /// Implementations run the lookup in `txn.dedup_window()` and the write
    /// as one atomic step per `external_txn_id`. An existing row only moves
    /// to a strictly higher status rank.
    async fn apply(&self, txn: NewTransaction) -> Result<ApplyOutcome, StoreError>;

    /// One page in `txn_time DESC, id DESC` order, plus the filtered total
    async fn page(
        &self,
        partner_id: Uuid,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<Transaction>, StoreError>;

    /// Aggregates over the whole filtered set
    async fn summary(
        &self,
        partner_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<TransactionSummary, StoreError>;

    /// Next keyset batch strictly after `after`, same order as `page`
    async fn stream_batch(
        &self,
        partner_id: Uuid,
        filter: &TransactionFilter,
        after: Option<StreamCursor>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError>;
}

#[async_trait]
pub trait ExportJobRepository: Send + Sync {
    async fn create(&self, job: NewExportJob) -> Result<ExportJob, StoreError>;

    /// Jobs a partner created at or after `since`
    async fn count_created_since(
        &self,
        partner_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Fetch a job only if it belongs to `partner_id`
    async fn find_for_partner(
        &self,
        partner_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<ExportJob>, StoreError>;

    /// Atomically move the oldest pending job to `processing`
    async fn claim_next(&self) -> Result<Option<ExportJob>, StoreError>;

    /// Finish a `processing` job. Returns `false` when the job is no longer
    /// `processing` (reaped or already finished); nothing is written then.
    async fn mark_completed(
        &self,
        job_id: Uuid,
        file_key: &str,
        row_count: i64,
    ) -> Result<bool, StoreError>;

    /// Fail a `processing` job. Same guard as `mark_completed`.
    async fn mark_failed(&self, job_id: Uuid, reason: &str) -> Result<bool, StoreError>;

    /// Fail jobs stuck in `processing` since before `started_before`
    async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64, StoreError>;
}

/// The repositories a running service needs, behind trait objects
#[derive(Clone)]
pub struct Repositories {
    pub partners: Arc<dyn PartnerRepository>,
    pub terminals: Arc<dyn TerminalRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub export_jobs: Arc<dyn ExportJobRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            partners: Arc::new(postgres::PgPartnerRepository::new(pool.clone())),
            terminals: Arc::new(postgres::PgTerminalRepository::new(pool.clone())),
            transactions: Arc::new(postgres::PgTransactionRepository::new(pool.clone())),
            export_jobs: Arc::new(postgres::PgExportJobRepository::new(pool)),
        }
    }

    /// All four repositories backed by one shared in-memory store
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            partners: store.clone(),
            terminals: store.clone(),
            transactions: store.clone(),
            export_jobs: store,
        }
    }
}
