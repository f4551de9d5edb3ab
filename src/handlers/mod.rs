//! Delivery handlers
//!
//! Entry points for the two inbound channels. Each handler coordinates the
//! normalizer, the aggregator, the forwarder and the dead-letter sink.

mod messages;
mod pipeline;
mod queue_handler;
mod stream_handler;


pub use messages::*;
pub use pipeline::{Pipeline, PipelineSettings};
pub use queue_handler::QueueDeliveryHandler;
pub use stream_handler::StreamBatchHandler;
