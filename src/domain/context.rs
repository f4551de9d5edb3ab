//! Processing Context
//!
//! Metadata about where an event came from, carried through the pipeline
//! for logging and dead-letter records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound channel an event arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverySource {
    ChangeFeed,
    Queue,
}

impl DeliverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliverySource::ChangeFeed => "change_feed",
            DeliverySource::Queue => "queue",
        }
    }
}

/// Context for processing a single delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingContext {
    pub source: DeliverySource,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Provider message id for queue deliveries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// How many times the provider has delivered this message
    pub receive_count: u32,
}

impl ProcessingContext {
    pub fn new(source: DeliverySource) -> Self {
        Self {
            source,
            correlation_id: None,
            message_id: None,
            receive_count: 1,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_receive_count(mut self, receive_count: u32) -> Self {
        self.receive_count = receive_count;
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }
}
