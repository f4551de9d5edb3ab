//! Change-feed batch handler
//!
//! Normalizes each record, then either applies it (direct mode) or forwards
//! it to the queue (forward mode). Records that failed retryably are
//! reported back so the dispatcher redelivers them.

use std::sync::Arc;

use serde_json::Value;

use crate::aggregate::ApplyError;
use crate::dead_letter::DeadLetter;
use crate::domain::{DeliverySource, ProcessingContext};
use crate::normalize::{normalize, SourceKind};

use super::{BatchItemFailure, BatchResponse, ChangeFeedBatch, Pipeline, RecordOutcome};

#[derive(Clone)]
pub struct StreamBatchHandler {
    pipeline: Arc<Pipeline>,
}

impl StreamBatchHandler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Process a batch; records are handled one at a time, to completion.
    pub async fn handle(&self, batch: ChangeFeedBatch, ctx: &ProcessingContext) -> BatchResponse {
        let mut response = BatchResponse::default();

        for (index, record) in batch.records.iter().enumerate() {
            let outcome = self.handle_record(record, ctx).await;
            if let RecordOutcome::Failed(reason) = outcome {
                let item_identifier = record_identifier(record).unwrap_or_else(|| index.to_string());
                tracing::warn!(
                    item_identifier = %item_identifier,
                    correlation_id = ?ctx.correlation_id,
                    reason = %reason,
                    "Record reported for redelivery"
                );
                response
                    .batch_item_failures
                    .push(BatchItemFailure { item_identifier });
            }
        }

        tracing::info!(
            records = batch.records.len(),
            failures = response.batch_item_failures.len(),
            correlation_id = ?ctx.correlation_id,
            "Change-feed batch processed"
        );
        response
    }

    pub async fn handle_record(&self, record: &Value, ctx: &ProcessingContext) -> RecordOutcome {
        let event = match normalize(record, &SourceKind::ChangeFeed) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    item_identifier = ?record_identifier(record),
                    error = %e,
                    "Malformed change-feed record"
                );
                let letter = DeadLetter::new(DeliverySource::ChangeFeed, record.to_string(), &e);
                return self.dead_letter(letter).await;
            }
        };

        if let Some(forwarder) = self.pipeline.forwarder() {
            return match forwarder.forward(&event).await {
                Ok(receipt) => RecordOutcome::Forwarded(receipt),
                Err(e) => {
                    tracing::error!(
                        event_id = %event.event_id,
                        account_id = %event.account_id,
                        error = %e,
                        "Failed to forward event"
                    );
                    RecordOutcome::Failed(e.to_string())
                }
            };
        }

        match self.pipeline.apply_with_retry(&event, ctx).await {
            Ok(applied) => RecordOutcome::Applied(applied),
            Err((ApplyError::Store(e), _)) => {
                tracing::error!(
                    event_id = %event.event_id,
                    account_id = %event.account_id,
                    error = %e,
                    "Store error while applying event"
                );
                RecordOutcome::Failed(e.to_string())
            }
            Err((e, attempts)) => {
                let letter = DeadLetter::new(DeliverySource::ChangeFeed, record.to_string(), &e)
                    .with_event(event.event_id.as_str(), event.account_id.as_str())
                    .with_attempts(attempts);
                self.dead_letter(letter).await
            }
        }
    }

    async fn dead_letter(&self, letter: DeadLetter) -> RecordOutcome {
        match self.pipeline.dead_letter(letter).await {
            Ok(()) => RecordOutcome::DeadLettered,
            Err(e) => {
                tracing::error!(error = %e, "Failed to write dead letter");
                RecordOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Identifier the dispatcher uses to match a failed record
fn record_identifier(record: &Value) -> Option<String> {
    ["eventID", "event_id"]
        .iter()
        .find_map(|key| record.get(*key))
        .or_else(|| record.get("dynamodb").and_then(|s| s.get("SequenceNumber")))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
