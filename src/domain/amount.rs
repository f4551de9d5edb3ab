//! Amount type
//!
//! Domain primitive for prices, quantities and order amounts.
//! All amounts are validated at construction time, ensuring negative values
//! cannot exist in the system.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Amount represents a validated, non-negative exact decimal.
///
/// # Invariants
/// - Value is never negative (zero is allowed)
/// - Arithmetic is exact; binary floating point never enters the value
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use order_aggregator::domain::Amount;
///
/// let price = Amount::new(Decimal::new(45, 1)).unwrap();
/// assert_eq!(price.value(), Decimal::new(45, 1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

/// Errors that can occur when creating an Amount
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must not be negative (got {0})")]
    Negative(Decimal),

    #[error("Amount arithmetic overflowed")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::Negative` if value < 0
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::Negative(value));
        }
        // -0 normalizes to 0
        Ok(Self(value.abs()))
    }

    /// Create an Amount from an integer (no decimal places).
    pub fn from_integer(value: i64) -> Result<Self, AmountError> {
        Self::new(Decimal::from(value))
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Exact product, used for `unit_price * quantity`.
    pub fn checked_mul(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_mul(other.0)
            .map(|v| Amount(v.normalize()))
            .ok_or(AmountError::Overflow)
    }

    pub fn checked_add(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }

    /// Subtract without going below zero.
    ///
    /// Returns the result and whether it had to be clamped.
    pub fn saturating_sub(&self, other: &Amount) -> (Amount, bool) {
        if other.0 > self.0 {
            (Amount::ZERO, true)
        } else {
            (Amount(self.0 - other.0), false)
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Parse a JSON number or numeric string.
    ///
    /// Accepts plain (`"4.5"`) and scientific (`"4.5e1"`) notation.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, AmountError> {
        match value {
            serde_json::Value::Number(n) => n.to_string().parse(),
            serde_json::Value::String(s) => s.trim().parse(),
            other => Err(AmountError::ParseError(format!("not a number: {}", other))),
        }
    }

    /// Render as a JSON number: an integer when exactly whole, a decimal otherwise.
    pub fn to_json_number(&self) -> serde_json::Value {
        render_decimal(self.0)
    }
}

/// Render a decimal as a JSON number.
///
/// Whole values become JSON integers; fractional values become JSON floats.
/// Whole values beyond the `i64` range fall back to a float.
pub fn render_decimal(value: Decimal) -> serde_json::Value {
    let normalized = value.normalize();
    if normalized.fract().is_zero() {
        if let Some(i) = normalized.to_i64() {
            return serde_json::Value::from(i);
        }
    }
    normalized
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s)
            .or_else(|_| Decimal::from_scientific(s))
            .map_err(|e| AmountError::ParseError(format!("{}: {}", s, e)))?;
        Amount::new(decimal)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::ZERO
    }
}
