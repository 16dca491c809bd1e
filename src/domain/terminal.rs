//! POS terminals

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Active,
    Inactive,
    Maintenance,
    Decommissioned,
}

impl TerminalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalStatus::Active => "active",
            TerminalStatus::Inactive => "inactive",
            TerminalStatus::Maintenance => "maintenance",
            TerminalStatus::Decommissioned => "decommissioned",
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TerminalStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(TerminalStatus::Active),
            "inactive" => Ok(TerminalStatus::Inactive),
            "maintenance" => Ok(TerminalStatus::Maintenance),
            "decommissioned" => Ok(TerminalStatus::Decommissioned),
            other => Err(DomainError::UnknownTerminalStatus(other.to_string())),
        }
    }
}

/// A POS machine owned by exactly one partner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Terminal {
    pub terminal_id: String,
    pub device_serial: Option<String>,
    pub machine_type: Option<String>,
    pub model: Option<String>,
    #[serde(skip_serializing)]
    pub partner_id: Uuid,
    pub retailer_id: Option<String>,
    pub status: TerminalStatus,
    pub last_txn_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Terminal {
    pub fn is_active(&self) -> bool {
        self.status == TerminalStatus::Active
    }
}

/// Filters for the terminal listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerminalFilter {
    pub status: Option<TerminalStatus>,
    pub machine_type: Option<String>,
    /// Case-insensitive substring over terminal id and device serial
    pub search: Option<String>,
}

impl TerminalFilter {
    pub fn matches(&self, terminal: &Terminal) -> bool {
        if let Some(status) = self.status {
            if terminal.status != status {
                return false;
            }
        }
        if let Some(ref machine_type) = self.machine_type {
            match terminal.machine_type {
                Some(ref t) if t.eq_ignore_ascii_case(machine_type) => {}
                _ => return false,
            }
        }
        if let Some(ref search) = self.search {
            let needle = search.to_lowercase();
            let in_tid = terminal.terminal_id.to_lowercase().contains(&needle);
            let in_serial = terminal
                .device_serial
                .as_deref()
                .map(|s| s.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !in_tid && !in_serial {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminal() -> Terminal {
        Terminal {
            terminal_id: "TERM1".to_string(),
            device_serial: Some("SN-00A1".to_string()),
            machine_type: Some("android_pos".to_string()),
            model: None,
            partner_id: Uuid::new_v4(),
            retailer_id: None,
            status: TerminalStatus::Active,
            last_txn_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Maintenance".parse::<TerminalStatus>().unwrap(), TerminalStatus::Maintenance);
        assert!("broken".parse::<TerminalStatus>().is_err());
    }

    #[test]
    fn test_filter_matching() {
        let t = terminal();
        assert!(TerminalFilter::default().matches(&t));

        let by_search = TerminalFilter { search: Some("00a".to_string()), ..Default::default() };
        assert!(by_search.matches(&t));

        let by_type = TerminalFilter { machine_type: Some("MPOS".to_string()), ..Default::default() };
        assert!(!by_type.matches(&t));

        let by_status = TerminalFilter {
            status: Some(TerminalStatus::Inactive),
            ..Default::default()
        };
        assert!(!by_status.matches(&t));
    }
}
