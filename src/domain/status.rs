//! Transaction status ordering
//!
//! Processor notifications may arrive late, twice, or out of order. Status
//! only ever advances along the rank below; anything else is a no-op.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// POS transaction status, ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxnStatus {
    Authorized,
    Captured,
    Failed,
    Refunded,
    Voided,
}

impl TxnStatus {
    pub const ALL: [TxnStatus; 5] = [
        TxnStatus::Authorized,
        TxnStatus::Captured,
        TxnStatus::Failed,
        TxnStatus::Refunded,
        TxnStatus::Voided,
    ];

    /// Position in the progression, 1-based
    pub fn rank(&self) -> i16 {
        match self {
            TxnStatus::Authorized => 1,
            TxnStatus::Captured => 2,
            TxnStatus::Failed => 3,
            TxnStatus::Refunded => 4,
            TxnStatus::Voided => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxnStatus::Authorized => "AUTHORIZED",
            TxnStatus::Captured => "CAPTURED",
            TxnStatus::Failed => "FAILED",
            TxnStatus::Refunded => "REFUNDED",
            TxnStatus::Voided => "VOIDED",
        }
    }

    /// Whether moving from `self` to `incoming` is a forward step
    pub fn advances_to(&self, incoming: TxnStatus) -> bool {
        incoming.rank() > self.rank()
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxnStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTHORIZED" | "AUTHORISED" | "AUTH" => Ok(TxnStatus::Authorized),
            "CAPTURED" | "CAPTURE" => Ok(TxnStatus::Captured),
            "FAILED" | "FAILURE" => Ok(TxnStatus::Failed),
            "REFUNDED" | "REFUND" => Ok(TxnStatus::Refunded),
            "VOIDED" | "VOID" => Ok(TxnStatus::Voided),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// What a notification does to the stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTransition {
    /// No record in the dedup window
    Insert,
    /// Record exists with a lower rank
    Advance,
    /// Record exists with an equal or higher rank
    NoOp,
}

impl StatusTransition {
    pub fn decide(stored: Option<TxnStatus>, incoming: TxnStatus) -> Self {
        match stored {
            None => StatusTransition::Insert,
            Some(current) if current.advances_to(incoming) => StatusTransition::Advance,
            Some(_) => StatusTransition::NoOp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_order() {
        let ranks: Vec<i16> = TxnStatus::ALL.iter().map(|s| s.rank()).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
        assert!(TxnStatus::Authorized < TxnStatus::Voided);
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("authorised".parse::<TxnStatus>().unwrap(), TxnStatus::Authorized);
        assert_eq!(" Captured ".parse::<TxnStatus>().unwrap(), TxnStatus::Captured);
        assert_eq!("VOID".parse::<TxnStatus>().unwrap(), TxnStatus::Voided);
        assert!(matches!(
            "PENDING".parse::<TxnStatus>(),
            Err(DomainError::UnknownStatus(_))
        ));
    }

    #[test]
    fn test_transition_decisions() {
        use StatusTransition::*;
        assert_eq!(StatusTransition::decide(None, TxnStatus::Captured), Insert);
        assert_eq!(
            StatusTransition::decide(Some(TxnStatus::Authorized), TxnStatus::Captured),
            Advance
        );
        assert_eq!(
            StatusTransition::decide(Some(TxnStatus::Captured), TxnStatus::Authorized),
            NoOp
        );
        assert_eq!(
            StatusTransition::decide(Some(TxnStatus::Captured), TxnStatus::Captured),
            NoOp
        );
    }

    #[test]
    fn test_serde_uses_upper_case() {
        assert_eq!(serde_json::to_string(&TxnStatus::Refunded).unwrap(), "\"REFUNDED\"");
    }
}
