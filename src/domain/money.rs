//! Money type
//!
//! Monetary values held as integer minor units (paise). Values enter from
//! decimal strings or JSON numbers and leave as decimal strings, so no
//! amount ever passes through floating point.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Decimal places carried by a minor unit
const SCALE: u32 = 2;

/// Largest accepted value in major units (100 billion)
const MAX_MAJOR: i64 = 100_000_000_000;

/// Non-negative amount in minor units.
///
/// # Example
/// ```
/// use pos_partner_api::domain::Money;
///
/// let amount: Money = "100.5".parse().unwrap();
/// assert_eq!(amount.minor_units(), 10050);
/// assert_eq!(amount.to_string(), "100.50");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

/// Errors that can occur when creating a Money value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("Amount must not be negative (got {0})")]
    Negative(Decimal),

    #[error("Amount has too many decimal places (max {SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds maximum allowed value")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl Money {
    pub const ZERO: Money = Money(0);

    /// Create from minor units. Negative input is clamped to zero.
    pub fn from_minor(minor: i64) -> Self {
        Self(minor.max(0))
    }

    /// Convert a decimal in major units.
    ///
    /// # Errors
    /// - `MoneyError::Negative` if value < 0
    /// - `MoneyError::TooManyDecimals` if more than 2 significant decimal places
    /// - `MoneyError::Overflow` above 100 billion
    pub fn from_decimal(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::Negative(value));
        }

        let normalized = value.normalize();
        if normalized.scale() > SCALE {
            return Err(MoneyError::TooManyDecimals(normalized.scale()));
        }

        if value > Decimal::from(MAX_MAJOR) {
            return Err(MoneyError::Overflow);
        }

        let minor = (normalized * Decimal::from(10_i64.pow(SCALE)))
            .to_i64()
            .ok_or(MoneyError::Overflow)?;

        Ok(Self(minor))
    }

    /// Convert an aggregate such as a SQL `SUM`.
    ///
    /// Totals may legitimately exceed the per-amount cap, so this saturates
    /// at `i64::MAX` minor units the same way [`Money::saturating_add`] does.
    pub fn from_sum(value: Decimal) -> Self {
        if value.is_sign_negative() {
            return Money::ZERO;
        }
        let minor = value
            .round_dp(SCALE)
            .checked_mul(Decimal::from(10_i64.pow(SCALE)))
            .and_then(|scaled| scaled.to_i64())
            .unwrap_or(i64::MAX);
        Self(minor)
    }

    /// Read an amount out of a JSON value.
    ///
    /// `null` yields `None`; numbers are converted through their textual form.
    pub fn from_json(value: &serde_json::Value) -> Result<Option<Self>, MoneyError> {
        match value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::Number(n) => n.to_string().parse().map(Some),
            serde_json::Value::String(s) if s.trim().is_empty() => Ok(None),
            serde_json::Value::String(s) => s.parse().map(Some),
            other => Err(MoneyError::ParseError(other.to_string())),
        }
    }

    pub fn minor_units(&self) -> i64 {
        self.0
    }

    /// Major units as a decimal with two places
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, SCALE)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Summation used for aggregates; saturates instead of wrapping.
    pub fn saturating_add(self, other: Money) -> Money {
        Money(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let decimal = Decimal::from_str(s)
            .or_else(|_| Decimal::from_scientific(s))
            .map_err(|_| MoneyError::ParseError(s.to_string()))?;
        Money::from_decimal(decimal)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Money::from_decimal(value)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Money::saturating_add)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Money::from_json(&value)
            .map_err(serde::de::Error::custom)?
            .ok_or_else(|| serde::de::Error::custom("amount is required"))
    }
}
