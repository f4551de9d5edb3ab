//! Handler inputs and outputs
//!
//! Wire shapes of the change-feed batch endpoint and the per-delivery
//! result of the queue handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::AppliedResult;
use crate::forwarder::ForwardReceipt;

/// Batch of change-feed records as posted by the dispatcher
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeFeedBatch {
    #[serde(rename = "Records", default)]
    pub records: Vec<Value>,
}

impl ChangeFeedBatch {
    pub fn new(records: Vec<Value>) -> Self {
        Self { records }
    }
}

/// Records the dispatcher must redeliver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl BatchResponse {
    pub fn is_success(&self) -> bool {
        self.batch_item_failures.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.batch_item_failures
            .iter()
            .map(|f| f.item_identifier.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemFailure {
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: String,
}

/// What happened to one change-feed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Applied(AppliedResult),
    Forwarded(ForwardReceipt),
    DeadLettered,
    /// Must be redelivered
    Failed(String),
}

/// What happened to one queue delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Applied (or found already applied) and acknowledged
    Applied(AppliedResult),
    /// Written to the dead-letter destination and acknowledged
    DeadLettered,
    /// Left unacknowledged; the queue will redeliver it
    Retry,
}

impl DeliveryOutcome {
    pub fn is_acknowledged(&self) -> bool {
        !matches!(self, DeliveryOutcome::Retry)
    }
}
