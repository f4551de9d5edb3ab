//! Message Queue
//!
//! At-least-once queue seam used by the forwarder (send), the consumer
//! workers (receive + ack) and the queue dead-letter sink.

mod memory;
mod sqs;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryQueue;
pub use sqs::{SqsConfig, SqsQueue};

/// Longest delivery delay the queue service accepts
pub const MAX_DELIVERY_DELAY: Duration = Duration::from_secs(900);

/// One received message, pending acknowledgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: Option<String>,
    /// Provider handle used to acknowledge (delete) this delivery
    pub receipt_handle: String,
    pub body: String,
    /// How many times this message has been received, this delivery included
    pub receive_count: u32,
}

/// Errors that can occur talking to a queue
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to send message: {0}")]
    Send(String),

    #[error("Failed to receive messages: {0}")]
    Receive(String),

    #[error("Failed to acknowledge message: {0}")]
    Ack(String),
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Publish a message, optionally delayed. Returns the provider message id.
    async fn send(&self, body: &str, delay: Option<Duration>) -> Result<String, QueueError>;

    /// Receive up to `max_messages`, waiting at most `wait` for the first one.
    async fn receive(&self, max_messages: i32, wait: Duration) -> Result<Vec<Delivery>, QueueError>;

    /// Acknowledge a delivery so it is not redelivered.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;
}
