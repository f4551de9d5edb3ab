//! Domain module
//!
//! Core domain types shared by every stage of the pipeline.

pub mod amount;
pub mod context;
pub mod error;
pub mod events;

pub use amount::{render_decimal, Amount, AmountError};
pub use context::{DeliverySource, ProcessingContext};
pub use error::NormalizationError;
pub use events::{EventId, Operation, OrderEvent};
