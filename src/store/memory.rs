//! In-memory store
//!
//! One `parking_lot::Mutex` guards every table, so `apply` is trivially
//! atomic. No lock is ever held across an await point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::{
    ExportJobRepository, PartnerRepository, StoreError, TerminalRepository, TransactionRepository,
};
use crate::domain::{
    ApiKey, ApiKeyRecord, ApplyOutcome, ExportJob, ExportState, NewExportJob, NewTransaction,
    Page, PageRequest, Partner, StatusTransition, StreamCursor, Terminal, TerminalFilter,
    TerminalStatus, Transaction, TransactionFilter, TransactionSummary,
};

#[derive(Default)]
struct Tables {
    partners: HashMap<Uuid, Partner>,
    api_keys: HashMap<String, ApiKey>,
    terminals: BTreeMap<String, Terminal>,
    transactions: Vec<Transaction>,
    export_jobs: Vec<ExportJob>,
}

impl Tables {
    fn filtered<'a>(
        &'a self,
        partner_id: Uuid,
        filter: &'a TransactionFilter,
    ) -> impl Iterator<Item = &'a Transaction> + 'a {
        self.transactions
            .iter()
            .filter(move |t| t.partner_id == partner_id && filter.matches(t))
    }

    fn sorted(&self, partner_id: Uuid, filter: &TransactionFilter) -> Vec<Transaction> {
        let mut rows: Vec<Transaction> = self.filtered(partner_id, filter).cloned().collect();
        rows.sort_by(|a, b| (b.txn_time, b.id).cmp(&(a.txn_time, a.id)));
        rows
    }
}

/// Process-local store implementing every repository trait
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_partner(&self, partner: Partner) {
        self.tables.lock().partners.insert(partner.id, partner);
    }

    pub fn insert_api_key(&self, key: ApiKey) {
        self.tables.lock().api_keys.insert(key.api_key.clone(), key);
    }

    pub fn insert_terminal(&self, terminal: Terminal) {
        self.tables
            .lock()
            .terminals
            .insert(terminal.terminal_id.clone(), terminal);
    }

    /// Bypass dedup and insert a row as-is
    pub fn insert_transaction(&self, txn: Transaction) {
        self.tables.lock().transactions.push(txn);
    }

    pub fn set_terminal_status(&self, terminal_id: &str, status: TerminalStatus) {
        if let Some(t) = self.tables.lock().terminals.get_mut(terminal_id) {
            t.status = status;
        }
    }

    pub fn terminal(&self, terminal_id: &str) -> Option<Terminal> {
        self.tables.lock().terminals.get(terminal_id).cloned()
    }

    pub fn api_key(&self, api_key: &str) -> Option<ApiKey> {
        self.tables.lock().api_keys.get(api_key).cloned()
    }

    /// Snapshot of every stored transaction
    pub fn transactions(&self) -> Vec<Transaction> {
        self.tables.lock().transactions.clone()
    }

    pub fn export_job(&self, job_id: Uuid) -> Option<ExportJob> {
        self.tables
            .lock()
            .export_jobs
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
    }

    /// Overwrite a job's timestamps, for exercising time-based rules
    pub fn backdate_export_job(
        &self,
        job_id: Uuid,
        created_at: DateTime<Utc>,
        started_at: Option<DateTime<Utc>>,
    ) {
        let mut tables = self.tables.lock();
        if let Some(job) = tables.export_jobs.iter_mut().find(|j| j.id == job_id) {
            job.created_at = created_at;
            job.started_at = started_at;
        }
    }
}

#[async_trait]
impl PartnerRepository for MemoryStore {
    async fn find_api_key(&self, api_key: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        let tables = self.tables.lock();
        let Some(key) = tables.api_keys.get(api_key) else {
            return Ok(None);
        };
        Ok(tables
            .partners
            .get(&key.partner_id)
            .map(|partner| ApiKeyRecord::join(key, partner)))
    }

    async fn touch_api_key(&self, api_key: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(key) = self.tables.lock().api_keys.get_mut(api_key) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl TerminalRepository for MemoryStore {
    async fn find(&self, terminal_id: &str) -> Result<Option<Terminal>, StoreError> {
        Ok(self.terminal(terminal_id))
    }

    async fn list_for_partner(
        &self,
        partner_id: Uuid,
        filter: &TerminalFilter,
        page: PageRequest,
    ) -> Result<Page<Terminal>, StoreError> {
        let tables = self.tables.lock();
        // BTreeMap iteration is already ordered by terminal id
        let matching: Vec<&Terminal> = tables
            .terminals
            .values()
            .filter(|t| t.partner_id == partner_id && filter.matches(t))
            .collect();
        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .cloned()
            .collect();
        Ok(Page { items, total })
    }

    async fn touch_last_txn(&self, terminal_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(t) = self.tables.lock().terminals.get_mut(terminal_id) {
            t.last_txn_at = Some(t.last_txn_at.map_or(at, |prev| prev.max(at)));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn apply(&self, txn: NewTransaction) -> Result<ApplyOutcome, StoreError> {
        let (window_start, window_end) = txn.dedup_window();
        let now = Utc::now();
        let mut tables = self.tables.lock();

        let existing = tables.transactions.iter_mut().find(|t| {
            t.external_txn_id == txn.external_txn_id
                && t.txn_time >= window_start
                && t.txn_time <= window_end
        });

        match existing {
            Some(stored) => match StatusTransition::decide(Some(stored.status), txn.status) {
                StatusTransition::Advance => {
                    stored.status = txn.status;
                    if txn.settlement_status.is_some() {
                        stored.settlement_status = txn.settlement_status;
                    }
                    stored.updated_at = now;
                    Ok(ApplyOutcome::Updated(stored.id))
                }
                _ => Ok(ApplyOutcome::Duplicate(stored.id)),
            },
            None => {
                let id = Uuid::new_v4();
                tables.transactions.push(txn.into_transaction(id, now));
                Ok(ApplyOutcome::Inserted(id))
            }
        }
    }

    async fn page(
        &self,
        partner_id: Uuid,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<Transaction>, StoreError> {
        let rows = self.tables.lock().sorted(partner_id, filter);
        let total = rows.len() as i64;
        let items = rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .collect();
        Ok(Page { items, total })
    }

    async fn summary(
        &self,
        partner_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<TransactionSummary, StoreError> {
        let tables = self.tables.lock();
        Ok(TransactionSummary::from_transactions(
            tables.filtered(partner_id, filter),
        ))
    }

    async fn stream_batch(
        &self,
        partner_id: Uuid,
        filter: &TransactionFilter,
        after: Option<StreamCursor>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = self.tables.lock().sorted(partner_id, filter);
        Ok(rows
            .into_iter()
            .filter(|t| after.map_or(true, |c| c.precedes(t)))
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[async_trait]
impl ExportJobRepository for MemoryStore {
    async fn create(&self, job: NewExportJob) -> Result<ExportJob, StoreError> {
        let job = job.into_job(Uuid::new_v4(), Utc::now());
        self.tables.lock().export_jobs.push(job.clone());
        Ok(job)
    }

    async fn count_created_since(
        &self,
        partner_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        Ok(self
            .tables
            .lock()
            .export_jobs
            .iter()
            .filter(|j| j.partner_id == partner_id && j.created_at >= since)
            .count() as i64)
    }

    async fn find_for_partner(
        &self,
        partner_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<ExportJob>, StoreError> {
        Ok(self
            .export_job(job_id)
            .filter(|j| j.partner_id == partner_id))
    }

    async fn claim_next(&self) -> Result<Option<ExportJob>, StoreError> {
        let mut tables = self.tables.lock();
        let next = tables
            .export_jobs
            .iter_mut()
            .filter(|j| j.state == ExportState::Pending)
            .min_by_key(|j| j.created_at);
        Ok(next.map(|job| {
            job.state = ExportState::Processing;
            job.started_at = Some(Utc::now());
            job.clone()
        }))
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        file_key: &str,
        row_count: i64,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let Some(job) = tables
            .export_jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.state == ExportState::Processing)
        else {
            return Ok(false);
        };
        job.state = ExportState::Completed;
        job.file_key = Some(file_key.to_string());
        job.row_count = Some(row_count);
        job.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn mark_failed(&self, job_id: Uuid, reason: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock();
        let Some(job) = tables
            .export_jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.state == ExportState::Processing)
        else {
            return Ok(false);
        };
        job.state = ExportState::Failed;
        job.error_message = Some(reason.to_string());
        job.completed_at = Some(Utc::now());
        Ok(true)
    }

    async fn fail_stale(
        &self,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut reaped = 0;
        for job in self.tables.lock().export_jobs.iter_mut() {
            let stale = job.state == ExportState::Processing
                && job.started_at.map_or(true, |at| at < started_before);
            if stale {
                job.state = ExportState::Failed;
                job.error_message = Some(reason.to_string());
                job.completed_at = Some(now);
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}
