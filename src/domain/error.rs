//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

use super::AmountError;

/// Reasons an inbound payload cannot become an `OrderEvent`.
///
/// These are never retried: the payload is malformed and will stay malformed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NormalizationError {
    /// Required field absent
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// `account_id` present but blank
    #[error("Empty account_id")]
    EmptyAccountId,

    /// Field present but not a number
    #[error("Field {field} is not numeric: {reason}")]
    NotNumeric { field: &'static str, reason: String },

    /// Field is numeric but below zero
    #[error("Field {field} must not be negative (got {value})")]
    Negative {
        field: &'static str,
        value: rust_decimal::Decimal,
    },

    /// Operation tag is not one of INSERT, MODIFY, REMOVE
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// `unit_price * quantity` does not fit in a decimal
    #[error("Amount overflow")]
    Overflow,

    /// Payload is not a JSON object of the expected shape
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl NormalizationError {
    /// Map an amount parsing failure onto the field it came from.
    pub fn for_field(field: &'static str, err: AmountError) -> Self {
        match err {
            AmountError::Negative(value) => Self::Negative { field, value },
            AmountError::Overflow => Self::Overflow,
            AmountError::ParseError(reason) => Self::NotNumeric { field, reason },
        }
    }
}
