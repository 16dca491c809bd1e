//! Domain module
//!
//! Core domain types and validation rules.

pub mod context;
pub mod error;
pub mod export;
pub mod filter;
pub mod money;
pub mod partner;
pub mod status;
pub mod terminal;
pub mod transaction;

pub use context::RequestContext;
pub use error::DomainError;
pub use export::{ExportFormat, ExportJob, ExportState, NewExportJob};
pub use filter::{parse_date_range, Page, PageRequest, Pagination, StreamCursor, TransactionFilter};
pub use money::{Money, MoneyError};
pub use partner::{parse_permissions, ApiKey, ApiKeyRecord, Partner, PartnerIdentity, Permission};
pub use status::{StatusTransition, TxnStatus};
pub use terminal::{Terminal, TerminalFilter, TerminalStatus};
pub use transaction::{
    ApplyOutcome, NewTransaction, StatusBucket, Transaction, TransactionSummary,
};
