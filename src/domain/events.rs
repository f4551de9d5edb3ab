//! Order Events
//!
//! Canonical representation of one observed change to an order.
//! Every inbound payload shape is normalized into an `OrderEvent`.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::amount::Amount;

/// Opaque identifier of the underlying change (stream sequence number or
/// queue message id). Used for idempotence only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kind of change observed on the order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Modify,
    Remove,
}

impl Operation {
    /// Parse a change-feed tag (`INSERT`, `MODIFY`, `REMOVE`), case-insensitive.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Some(Operation::Insert),
            "MODIFY" => Some(Operation::Modify),
            "REMOVE" => Some(Operation::Remove),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Modify => "MODIFY",
            Operation::Remove => "REMOVE",
        }
    }

    /// INSERT and MODIFY both add their amount to the account total.
    pub fn is_upsert(&self) -> bool {
        matches!(self, Operation::Insert | Operation::Modify)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed change to an order, after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub event_id: EventId,
    pub account_id: String,
    pub unit_price: Amount,
    pub quantity: Amount,
    pub operation: Operation,
    /// For REMOVE: the event whose amount is being taken back out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retracts: Option<EventId>,
    /// `unit_price * quantity`, computed once at normalization
    pub amount: Amount,
}

impl OrderEvent {
    /// Build an event, computing `amount` exactly.
    pub fn new(
        event_id: EventId,
        account_id: impl Into<String>,
        unit_price: Amount,
        quantity: Amount,
        operation: Operation,
    ) -> Result<Self, super::AmountError> {
        let amount = unit_price.checked_mul(&quantity)?;
        Ok(Self {
            event_id,
            account_id: account_id.into(),
            unit_price,
            quantity,
            operation,
            retracts: None,
            amount,
        })
    }

    pub fn with_retracts(mut self, target: EventId) -> Self {
        self.retracts = Some(target);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_operation_parse() {
        assert_eq!(Operation::parse("INSERT"), Some(Operation::Insert));
        assert_eq!(Operation::parse("modify"), Some(Operation::Modify));
        assert_eq!(Operation::parse(" Remove "), Some(Operation::Remove));
        assert_eq!(Operation::parse("UPSERT"), None);
    }

    #[test]
    fn test_operation_serde_uppercase() {
        assert_eq!(serde_json::to_string(&Operation::Remove).unwrap(), "\"REMOVE\"");
        let op: Operation = serde_json::from_str("\"MODIFY\"").unwrap();
        assert_eq!(op, Operation::Modify);
    }

    #[test]
    fn test_order_event_amount() {
        let event = OrderEvent::new(
            EventId::from("e1"),
            "A1",
            Amount::new(dec!(10)).unwrap(),
            Amount::new(dec!(3)).unwrap(),
            Operation::Insert,
        )
        .unwrap();

        assert_eq!(event.amount.value(), dec!(30));
        assert!(event.retracts.is_none());
    }
}
