//! Change-feed record shape
//!
//! Accepts both the flat record (`operation`, `event_id`, `new_image`) and the
//! stream envelope (`eventName`, `eventID`, `dynamodb.NewImage`).

use serde_json::{Map, Value};

use crate::domain::{EventId, NormalizationError, Operation, OrderEvent};

use super::{build_event, lookup, lookup_amount, read_account_id, read_event_id, read_operation};

pub(super) fn normalize_record(record: &Value) -> Result<OrderEvent, NormalizationError> {
    let record = record
        .as_object()
        .ok_or_else(|| NormalizationError::Malformed("record is not an object".to_string()))?;
    let stream = record.get("dynamodb").and_then(Value::as_object);

    let operation = lookup(record, &["operation", "eventName"])
        .ok_or(NormalizationError::MissingField("operation"))
        .and_then(read_operation)?;

    let event_id = match lookup(record, &["event_id", "eventID"])
        .or_else(|| stream.and_then(|s| s.get("SequenceNumber")))
    {
        Some(value) => read_event_id(value, false)?,
        None => return Err(NormalizationError::MissingField("event_id")),
    };

    let image = select_image(record, stream, operation)?;

    let retracts = match record.get("retracts") {
        Some(Value::Null) | None => None,
        Some(value) => Some(read_event_id(value, false)?),
    };

    let account_id = read_account_id(image, true)?;
    let unit_price = lookup_amount(image, &["unit_price", "unitprice"], "unit_price", true)?
        .ok_or(NormalizationError::MissingField("unit_price"))?;
    let quantity = lookup_amount(image, &["quantity"], "quantity", true)?
        .ok_or(NormalizationError::MissingField("quantity"))?;

    build_event(event_id, account_id, unit_price, quantity, operation, retracts)
}

/// Upserts read the new image; removals carry only the old one.
fn select_image<'a>(
    record: &'a Map<String, Value>,
    stream: Option<&'a Map<String, Value>>,
    operation: Operation,
) -> Result<&'a Map<String, Value>, NormalizationError> {
    let find = |flat: &[&str], nested: &str| {
        lookup(record, flat)
            .or_else(|| stream.and_then(|s| s.get(nested)))
            .filter(|v| !v.is_null())
    };

    let new_image = find(&["new_image", "NewImage"], "NewImage");
    let old_image = find(&["old_image", "OldImage"], "OldImage");

    let image = match operation {
        Operation::Remove => old_image.or(new_image),
        Operation::Insert | Operation::Modify => new_image,
    }
    .ok_or(NormalizationError::MissingField("new_image"))?;

    image
        .as_object()
        .ok_or_else(|| NormalizationError::Malformed("image is not an object".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_flat_record_with_typed_image() {
        let record = json!({
            "operation": "INSERT",
            "event_id": "e1",
            "new_image": {
                "account_id": {"S": "A1"},
                "unit_price": {"N": "10"},
                "quantity": {"N": "3"}
            }
        });

        let event = normalize_record(&record).unwrap();
        assert_eq!(event.event_id, EventId::from("e1"));
        assert_eq!(event.account_id, "A1");
        assert_eq!(event.operation, Operation::Insert);
        assert_eq!(event.amount.value(), dec!(30));
    }

    #[test]
    fn test_stream_envelope_with_details_map() {
        let record = json!({
            "eventID": "7a1c",
            "eventName": "MODIFY",
            "dynamodb": {
                "SequenceNumber": "111",
                "NewImage": {
                    "accountid": {"S": "acct-9"},
                    "vendorid": {"S": "v-1"},
                    "details": {"M": {
                        "unitprice": {"N": "4.5"},
                        "quantity": {"N": "2"}
                    }}
                }
            }
        });

        let event = normalize_record(&record).unwrap();
        assert_eq!(event.event_id.as_str(), "7a1c");
        assert_eq!(event.account_id, "acct-9");
        assert_eq!(event.operation, Operation::Modify);
        assert_eq!(event.amount.value(), dec!(9));
    }

    #[test]
    fn test_sequence_number_is_fallback_event_id() {
        let record = json!({
            "eventName": "INSERT",
            "dynamodb": {
                "SequenceNumber": "4200",
                "NewImage": {
                    "accountid": {"S": "A1"},
                    "unitprice": {"N": "1"},
                    "quantity": {"N": "1"}
                }
            }
        });

        assert_eq!(normalize_record(&record).unwrap().event_id.as_str(), "4200");
    }

    #[test]
    fn test_remove_reads_old_image_and_retracts() {
        let record = json!({
            "eventName": "REMOVE",
            "eventID": "r1",
            "retracts": "e1",
            "dynamodb": {
                "OldImage": {
                    "accountid": {"S": "A1"},
                    "unitprice": {"N": "10"},
                    "quantity": {"N": "3"}
                }
            }
        });

        let event = normalize_record(&record).unwrap();
        assert_eq!(event.operation, Operation::Remove);
        assert_eq!(event.retracts, Some(EventId::from("e1")));
        assert_eq!(event.amount.value(), dec!(30));
    }

    #[test]
    fn test_missing_fields_rejected() {
        let no_account = json!({
            "operation": "INSERT", "event_id": "e1",
            "new_image": {"unit_price": {"N": "1"}, "quantity": {"N": "1"}}
        });
        assert_eq!(
            normalize_record(&no_account),
            Err(NormalizationError::MissingField("account_id"))
        );

        let blank_account = json!({
            "operation": "INSERT", "event_id": "e1",
            "new_image": {"account_id": {"S": "  "}, "unit_price": {"N": "1"}, "quantity": {"N": "1"}}
        });
        assert_eq!(normalize_record(&blank_account), Err(NormalizationError::EmptyAccountId));

        let no_quantity = json!({
            "operation": "INSERT", "event_id": "e1",
            "new_image": {"account_id": {"S": "A1"}, "unit_price": {"N": "1"}}
        });
        assert_eq!(
            normalize_record(&no_quantity),
            Err(NormalizationError::MissingField("quantity"))
        );

        let no_image = json!({"operation": "INSERT", "event_id": "e1"});
        assert_eq!(
            normalize_record(&no_image),
            Err(NormalizationError::MissingField("new_image"))
        );
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let negative = json!({
            "operation": "INSERT", "event_id": "e1",
            "new_image": {"account_id": {"S": "A1"}, "unit_price": {"N": "-2"}, "quantity": {"N": "1"}}
        });
        assert!(matches!(
            normalize_record(&negative),
            Err(NormalizationError::Negative { field: "unit_price", .. })
        ));

        let text = json!({
            "operation": "INSERT", "event_id": "e1",
            "new_image": {"account_id": {"S": "A1"}, "unit_price": {"N": "1"}, "quantity": {"S": "lots"}}
        });
        assert!(matches!(
            normalize_record(&text),
            Err(NormalizationError::NotNumeric { field: "quantity", .. })
        ));
    }

    #[test]
    fn test_unknown_operation_rejected() {
        let record = json!({"operation": "UPSERT", "event_id": "e1", "new_image": {}});
        assert_eq!(
            normalize_record(&record),
            Err(NormalizationError::UnknownOperation("UPSERT".to_string()))
        );
    }
}
