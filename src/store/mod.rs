//! Summary Store
//!
//! Persistence boundary for account summaries and their idempotence ledger.
//! Every implementation must commit a `Mutation` atomically: the new total,
//! the new ledger entry and the ledger updates land together or not at all,
//! and only when the summary is still at the expected version.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{AccountState, Mutation};
use crate::domain::{Amount, OrderEvent};

pub use memory::MemorySummaryStore;
pub use postgres::PgSummaryStore;

/// Errors that can occur in a summary store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row in the store could not be decoded
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// Store cannot be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Transient failures that a redelivery may get past
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StoreError::InvalidData(_))
    }
}

/// Result of a compare-and-swap commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    Committed { version: i64 },
    /// Someone else committed first, or the event was applied concurrently
    Conflict,
}

/// Read model of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRecord {
    pub account_id: String,
    pub account_total: Amount,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Load the slice of an account's state needed to plan `event`.
    async fn load_state(
        &self,
        account_id: &str,
        event: &OrderEvent,
    ) -> Result<AccountState, StoreError>;

    /// Commit a mutation if the summary is still at `expected_version`.
    async fn commit(&self, mutation: &Mutation) -> Result<CommitStatus, StoreError>;

    async fn get_summary(&self, account_id: &str) -> Result<Option<SummaryRecord>, StoreError>;

    /// Delete settled ledger entries applied before `cutoff`.
    async fn prune_ledger(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
