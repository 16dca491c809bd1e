//! Asynchronous transaction exports
//!
//! Partners request an export, a background worker produces the file into
//! object storage, and the status endpoint hands back a signed link once it
//! is ready.

pub mod encoder;
pub mod manager;
pub mod storage;
pub mod worker;

use crate::store::StoreError;

pub use encoder::{encoder_for, ExportEncoder};
pub use manager::{CreateExportRequest, ExportCreated, ExportJobManager, ExportStatusView};
pub use storage::{
    LocalDiskStorage, ObjectStorage, SignedUrl, SignedUrlError, StorageError, StoredObject,
    UrlSigner,
};
pub use worker::{ExportWorker, ExportWorkerConfig};

/// Failures while producing an export file
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Export task aborted: {0}")]
    Join(String),
}
