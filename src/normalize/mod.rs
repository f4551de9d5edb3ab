//! Event Normalizer
//!
//! Turns heterogeneous inbound payloads into a canonical `OrderEvent`.
//! Pure: no I/O, no logging side effects beyond the returned value.

mod change_feed;
mod queue_body;

use serde_json::{Map, Value};

use crate::domain::{Amount, EventId, NormalizationError, Operation, OrderEvent};

/// Shape of the raw payload being normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Change-feed record whose images are typed attribute maps
    ChangeFeed,
    /// Plain JSON body delivered through the queue; `message_id` is the
    /// provider id used when the body carries no `event_id`
    Queue { message_id: Option<String> },
}

/// Normalize one raw payload into an `OrderEvent`.
pub fn normalize(raw: &Value, source: &SourceKind) -> Result<OrderEvent, NormalizationError> {
    match source {
        SourceKind::ChangeFeed => change_feed::normalize_record(raw),
        SourceKind::Queue { message_id } => queue_body::normalize_body(raw, message_id.as_deref()),
    }
}

/// Normalize a raw text payload (e.g. a queue message body).
pub fn normalize_str(raw: &str, source: &SourceKind) -> Result<OrderEvent, NormalizationError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| NormalizationError::Malformed(format!("invalid JSON: {}", e)))?;
    normalize(&value, source)
}

// =========================================================================
// Field access shared by both shapes
// =========================================================================

/// First present key among `names`
fn lookup<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| map.get(*name))
}

/// Strip a typed attribute wrapper (`{"S": ..}`, `{"N": ..}`, `{"M": ..}`).
fn untyped(value: &Value) -> &Value {
    if let Value::Object(map) = value {
        if map.len() == 1 {
            if let Some(inner) = map.get("S").or_else(|| map.get("N")).or_else(|| map.get("M")) {
                return inner;
            }
        }
    }
    value
}

fn leaf(value: &Value, typed: bool) -> &Value {
    if typed {
        untyped(value)
    } else {
        value
    }
}

fn read_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn read_account_id(
    map: &Map<String, Value>,
    typed: bool,
) -> Result<String, NormalizationError> {
    let raw = lookup(map, &["account_id", "accountid"])
        .map(|v| leaf(v, typed))
        .ok_or(NormalizationError::MissingField("account_id"))?;

    let account_id = read_string(raw).ok_or_else(|| {
        NormalizationError::Malformed("account_id is not a string".to_string())
    })?;

    if account_id.trim().is_empty() {
        return Err(NormalizationError::EmptyAccountId);
    }
    Ok(account_id)
}

fn read_event_id(value: &Value, typed: bool) -> Result<EventId, NormalizationError> {
    let id = read_string(leaf(value, typed))
        .filter(|s| !s.trim().is_empty())
        .ok_or(NormalizationError::MissingField("event_id"))?;
    Ok(EventId::new(id))
}

fn read_operation(value: &Value) -> Result<Operation, NormalizationError> {
    let tag = value
        .as_str()
        .ok_or_else(|| NormalizationError::UnknownOperation(value.to_string()))?;
    Operation::parse(tag).ok_or_else(|| NormalizationError::UnknownOperation(tag.to_string()))
}

fn read_amount(
    value: &Value,
    field: &'static str,
    typed: bool,
) -> Result<Amount, NormalizationError> {
    Amount::from_json(leaf(value, typed)).map_err(|e| NormalizationError::for_field(field, e))
}

/// Look up a numeric field at the top level of an image, then inside its
/// nested `details` map.
fn lookup_amount(
    map: &Map<String, Value>,
    names: &[&str],
    field: &'static str,
    typed: bool,
) -> Result<Option<Amount>, NormalizationError> {
    if let Some(value) = lookup(map, names) {
        return read_amount(value, field, typed).map(Some);
    }

    let details = map
        .get("details")
        .map(|d| leaf(d, typed))
        .and_then(Value::as_object);

    match details.and_then(|d| lookup(d, names)) {
        Some(value) => read_amount(value, field, typed).map(Some),
        None => Ok(None),
    }
}

fn build_event(
    event_id: EventId,
    account_id: String,
    unit_price: Amount,
    quantity: Amount,
    operation: Operation,
    retracts: Option<EventId>,
) -> Result<OrderEvent, NormalizationError> {
    let event = OrderEvent::new(event_id, account_id, unit_price, quantity, operation)
        .map_err(|e| NormalizationError::for_field("amount", e))?;

    Ok(match retracts {
        Some(target) => event.with_retracts(target),
        None => event,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_untyped_unwraps_single_key_wrappers() {
        assert_eq!(untyped(&json!({"S": "A1"})), &json!("A1"));
        assert_eq!(untyped(&json!({"N": "4.5"})), &json!("4.5"));
        assert_eq!(untyped(&json!({"M": {"x": 1}})), &json!({"x": 1}));
        // Not a wrapper: two keys
        let two = json!({"S": "a", "N": "1"});
        assert_eq!(untyped(&two), &two);
    }

    #[test]
    fn test_normalize_str_rejects_invalid_json() {
        let result = normalize_str("{not json", &SourceKind::Queue { message_id: None });
        assert!(matches!(result, Err(NormalizationError::Malformed(_))));
    }
}
