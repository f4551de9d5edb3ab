//! Queue delivery handler
//!
//! A delivery is acknowledged only after its event is durably applied or
//! its payload is durably dead-lettered. Anything else leaves it in flight
//! for the queue to redeliver.

use std::sync::Arc;

use crate::aggregate::ApplyError;
use crate::dead_letter::DeadLetter;
use crate::domain::{DeliverySource, ProcessingContext};
use crate::normalize::{normalize_str, SourceKind};
use crate::queue::{Delivery, MessageQueue};

use super::{DeliveryOutcome, Pipeline};

#[derive(Clone)]
pub struct QueueDeliveryHandler {
    pipeline: Arc<Pipeline>,
    queue: Arc<dyn MessageQueue>,
}

impl QueueDeliveryHandler {
    pub fn new(pipeline: Arc<Pipeline>, queue: Arc<dyn MessageQueue>) -> Self {
        Self { pipeline, queue }
    }

    pub async fn handle(&self, delivery: &Delivery) -> DeliveryOutcome {
        let mut ctx = ProcessingContext::new(DeliverySource::Queue)
            .with_receive_count(delivery.receive_count);
        if let Some(message_id) = &delivery.message_id {
            ctx = ctx.with_message_id(message_id.clone());
        }

        let source = SourceKind::Queue {
            message_id: delivery.message_id.clone(),
        };

        let event = match normalize_str(&delivery.body, &source) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    message_id = ?delivery.message_id,
                    error = %e,
                    "Malformed queue message"
                );
                let letter = DeadLetter::new(DeliverySource::Queue, delivery.body.clone(), &e)
                    .with_attempts(delivery.receive_count);
                return self.dead_letter_and_ack(delivery, letter).await;
            }
        };

        match self.pipeline.apply_with_retry(&event, &ctx).await {
            Ok(applied) => {
                self.ack(delivery).await;
                DeliveryOutcome::Applied(applied)
            }
            Err((ApplyError::Store(e), _)) => {
                tracing::error!(
                    event_id = %event.event_id,
                    account_id = %event.account_id,
                    message_id = ?delivery.message_id,
                    receive_count = delivery.receive_count,
                    error = %e,
                    "Store error while applying queued event, leaving for redelivery"
                );
                DeliveryOutcome::Retry
            }
            Err((e, attempts)) => {
                let letter = DeadLetter::new(DeliverySource::Queue, delivery.body.clone(), &e)
                    .with_event(event.event_id.as_str(), event.account_id.as_str())
                    .with_attempts(attempts);
                self.dead_letter_and_ack(delivery, letter).await
            }
        }
    }

    async fn dead_letter_and_ack(&self, delivery: &Delivery, letter: DeadLetter) -> DeliveryOutcome {
        match self.pipeline.dead_letter(letter).await {
            Ok(()) => {
                self.ack(delivery).await;
                DeliveryOutcome::DeadLettered
            }
            Err(e) => {
                tracing::error!(
                    message_id = ?delivery.message_id,
                    error = %e,
                    "Failed to write dead letter, leaving message for redelivery"
                );
                DeliveryOutcome::Retry
            }
        }
    }

    /// A failed ack only means a redelivery, which the ledger absorbs.
    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(&delivery.receipt_handle).await {
            tracing::warn!(
                message_id = ?delivery.message_id,
                error = %e,
                "Failed to acknowledge message"
            );
        }
    }
}
