//! order_aggregator Library
//!
//! Re-exports modules for integration testing and external use.

pub mod aggregate;
pub mod api;
pub mod consumer;
pub mod dead_letter;
pub mod domain;
pub mod forwarder;
pub mod handlers;
pub mod jobs;
pub mod normalize;
pub mod queue;
pub mod retry;
pub mod store;

pub mod config;
pub mod db;
mod error;

pub use config::{Config, StreamMode};
pub use error::{AppError, AppResult, ErrorResponse};
pub use domain::{Amount, AmountError, EventId, NormalizationError, Operation, OrderEvent};
