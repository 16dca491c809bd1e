//! Domain Error Types
//!
//! Validation failures raised while turning raw input into domain values.

use thiserror::Error;

/// Domain-specific errors
///
/// Each of these is the caller's fault and maps to a 400 at the boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Amount could not be parsed or is out of range
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Status string outside the known set
    #[error("Unknown transaction status: {0}")]
    UnknownStatus(String),

    /// Terminal status string outside the known set
    #[error("Unknown terminal status: {0}")]
    UnknownTerminalStatus(String),

    /// Permission string outside the known set
    #[error("Unknown permission: {0}")]
    UnknownPermission(String),

    /// Export format outside the supported set
    #[error("Unsupported export format: {0} (expected csv, excel, pdf or zip)")]
    UnsupportedFormat(String),

    /// Missing, malformed, inverted or oversized date range
    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    /// A required field is missing
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

impl DomainError {
    pub fn invalid_range(msg: impl Into<String>) -> Self {
        Self::InvalidDateRange(msg.into())
    }
}

impl From<super::MoneyError> for DomainError {
    fn from(e: super::MoneyError) -> Self {
        DomainError::InvalidAmount(e.to_string())
    }
}
