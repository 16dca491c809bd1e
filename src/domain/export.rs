//! Export jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{DomainError, TransactionFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Excel,
    Pdf,
    Zip,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "excel",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Zip => "zip",
        }
    }

    /// File extension of the produced object
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "xls",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Zip => "zip",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Excel => "application/vnd.ms-excel",
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Zip => "application/zip",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "excel" | "xls" => Ok(ExportFormat::Excel),
            "pdf" => Ok(ExportFormat::Pdf),
            "zip" => Ok(ExportFormat::Zip),
            other => Err(DomainError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// `pending` → `processing` → `completed` | `failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ExportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportState::Pending => "pending",
            ExportState::Processing => "processing",
            ExportState::Completed => "completed",
            ExportState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportState::Completed | ExportState::Failed)
    }
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExportState::Pending),
            "processing" => Ok(ExportState::Processing),
            "completed" => Ok(ExportState::Completed),
            "failed" => Ok(ExportState::Failed),
            other => Err(format!("unknown export state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportJob {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub format: ExportFormat,
    /// Filters as they were when the job was requested
    pub filter: TransactionFilter,
    pub state: ExportState,
    pub row_count: Option<i64>,
    pub file_key: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportJob {
    /// `exports/{partner_id}/{YYYY-MM-DD}/{job_id}.{ext}`, dated by creation
    pub fn storage_key(&self) -> String {
        format!(
            "exports/{}/{}/{}.{}",
            self.partner_id,
            self.created_at.format("%Y-%m-%d"),
            self.id,
            self.format.extension()
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewExportJob {
    pub partner_id: Uuid,
    pub format: ExportFormat,
    pub filter: TransactionFilter,
}

impl NewExportJob {
    pub fn into_job(self, id: Uuid, now: DateTime<Utc>) -> ExportJob {
        ExportJob {
            id,
            partner_id: self.partner_id,
            format: self.format,
            filter: self.filter,
            state: ExportState::Pending,
            row_count: None,
            file_key: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}
