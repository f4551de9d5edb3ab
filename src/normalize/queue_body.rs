//! Queue message body shape
//!
//! Plain JSON: `{account_id, amount, event_id}` as emitted by the forwarder,
//! or `{account_id, unit_price, quantity}` for raw order bodies.

use serde_json::Value;

use crate::domain::{Amount, EventId, NormalizationError, Operation, OrderEvent};

use super::{build_event, lookup, lookup_amount, read_account_id, read_event_id, read_operation};

pub(super) fn normalize_body(
    body: &Value,
    message_id: Option<&str>,
) -> Result<OrderEvent, NormalizationError> {
    let body = body
        .as_object()
        .ok_or_else(|| NormalizationError::Malformed("body is not an object".to_string()))?;

    let account_id = read_account_id(body, false)?;

    let operation = match body.get("operation") {
        Some(Value::Null) | None => Operation::Insert,
        Some(value) => read_operation(value)?,
    };

    let event_id = match lookup(body, &["event_id", "eventID"]) {
        Some(value) => read_event_id(value, false)?,
        None => message_id
            .filter(|id| !id.trim().is_empty())
            .map(EventId::from)
            .ok_or(NormalizationError::MissingField("event_id"))?,
    };

    let unit_price = lookup_amount(body, &["unit_price", "unitprice"], "unit_price", false)?;
    let (unit_price, quantity) = match unit_price {
        Some(unit_price) => {
            let quantity = lookup_amount(body, &["quantity"], "quantity", false)?
                .ok_or(NormalizationError::MissingField("quantity"))?;
            (unit_price, quantity)
        }
        // A pre-computed delta counts as one unit at that price
        None => {
            let amount = lookup_amount(body, &["amount", "total"], "amount", false)?
                .ok_or(NormalizationError::MissingField("unit_price"))?;
            (amount, Amount::from_integer(1).map_err(|e| NormalizationError::for_field("quantity", e))?)
        }
    };

    let retracts = match body.get("retracts") {
        Some(Value::Null) | None => None,
        Some(value) => Some(read_event_id(value, false)?),
    };

    build_event(event_id, account_id, unit_price, quantity, operation, retracts)
}
