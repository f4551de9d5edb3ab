//! Dispatch Forwarder
//!
//! Re-emits a normalized event onto the queue as a per-event delta for the
//! second-stage consumer. Delivery is at-least-once; the consumer side is
//! idempotent on `event_id`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{EventId, Operation, OrderEvent};
use crate::queue::{MessageQueue, QueueError, MAX_DELIVERY_DELAY};
use crate::retry::RetryPolicy;

/// Body of a forwarded message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedMessage {
    pub account_id: String,
    /// Delta of this event; `Decimal` serializes as a string, keeping it exact
    pub amount: rust_decimal::Decimal,
    pub event_id: EventId,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retracts: Option<EventId>,
}

impl From<&OrderEvent> for ForwardedMessage {
    fn from(event: &OrderEvent) -> Self {
        Self {
            account_id: event.account_id.clone(),
            amount: event.amount.value(),
            event_id: event.event_id.clone(),
            operation: event.operation,
            retracts: event.retracts.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardReceipt {
    pub message_id: String,
    pub attempts: u32,
}

/// Errors that can occur while forwarding
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Failed to forward event {event_id} after {attempts} attempts: {source}")]
    Transport {
        event_id: EventId,
        attempts: u32,
        #[source]
        source: QueueError,
    },

    #[error("Forwarding event {event_id} timed out after {timeout:?}")]
    Timeout { event_id: EventId, timeout: Duration },

    #[error("Failed to serialize forwarded message: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct DispatchForwarder {
    queue: Arc<dyn MessageQueue>,
    delay: Option<Duration>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl DispatchForwarder {
    pub fn new(queue: Arc<dyn MessageQueue>, delay: Duration, retry: RetryPolicy, timeout: Duration) -> Self {
        let delay = if delay.is_zero() {
            None
        } else {
            Some(delay.min(MAX_DELIVERY_DELAY))
        };
        Self {
            queue,
            delay,
            retry,
            timeout,
        }
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    /// Publish the event's delta, retrying transport failures with backoff.
    pub async fn forward(&self, event: &OrderEvent) -> Result<ForwardReceipt, ForwardError> {
        let body = serde_json::to_string(&ForwardedMessage::from(event))?;
        let mut attempt = 0;

        loop {
            let sent = tokio::time::timeout(self.timeout, self.queue.send(&body, self.delay)).await;

            let error = match sent {
                Ok(Ok(message_id)) => {
                    tracing::info!(
                        event_id = %event.event_id,
                        account_id = %event.account_id,
                        message_id = %message_id,
                        delay_secs = self.delay.map(|d| d.as_secs()).unwrap_or(0),
                        "Event forwarded"
                    );
                    return Ok(ForwardReceipt {
                        message_id,
                        attempts: attempt + 1,
                    });
                }
                Ok(Err(e)) => e,
                Err(_) => {
                    if !self.retry.should_retry(attempt) {
                        return Err(ForwardError::Timeout {
                            event_id: event.event_id.clone(),
                            timeout: self.timeout,
                        });
                    }
                    QueueError::Send(format!("timed out after {:?}", self.timeout))
                }
            };

            if !self.retry.should_retry(attempt) {
                return Err(ForwardError::Transport {
                    event_id: event.event_id.clone(),
                    attempts: attempt + 1,
                    source: error,
                });
            }

            tracing::warn!(
                event_id = %event.event_id,
                attempt = attempt + 1,
                error = %error,
                "Forward failed, retrying"
            );
            self.retry.backoff(attempt).await;
            attempt += 1;
        }
    }
}
