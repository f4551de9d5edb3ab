//! Aggregate module
//!
//! Applies normalized order events to account summaries exactly once.
//! Planning is pure (`summary::plan`); the `Aggregator` wraps it in a
//! load / plan / compare-and-swap loop against a `SummaryStore`.

pub mod summary;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::domain::{Amount, EventId, OrderEvent};
use crate::retry::RetryPolicy;
use crate::store::{CommitStatus, StoreError, SummaryStore};

pub use summary::{
    plan, AccountState, AccountSummary, ApplyOutcome, EntryKind, LedgerEntry, Mutation, Plan,
    RemovePolicy,
};

/// Aggregate trait for state folded from a sequence of changes
pub trait Aggregate: Sized + Default {
    /// The type of change this aggregate folds
    type Event;

    fn id(&self) -> &str;

    /// Get the current version (number of changes applied)
    fn version(&self) -> i64;

    /// Apply a change to update the aggregate state
    fn apply(self, event: Self::Event) -> Self;
}

/// Errors that can occur while applying an event
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// Compare-and-swap lost too many times in a row
    #[error("Conflict retry budget exhausted for account {account_id} after {attempts} attempts")]
    ConflictRetryExhausted { account_id: String, attempts: u32 },

    #[error("Apply timed out after {0:?}")]
    Timeout(Duration),

    /// Adding the event would push the total past the decimal range
    #[error("Total of account {account_id} would overflow applying event {event_id}")]
    Overflow { account_id: String, event_id: EventId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApplyError {
    /// Check if this error may succeed on redelivery
    pub fn is_retryable(&self) -> bool {
        match self {
            ApplyError::ConflictRetryExhausted { .. } => true,
            ApplyError::Timeout(_) => true,
            ApplyError::Overflow { .. } => false,
            ApplyError::Store(e) => e.is_retryable(),
        }
    }
}

/// Result of applying one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedResult {
    pub account_id: String,
    pub event_id: EventId,
    pub new_total: Amount,
    pub version: i64,
    /// The event had been applied before; nothing changed
    pub already_applied: bool,
    pub outcome: Option<ApplyOutcome>,
}

// =========================================================================
// Aggregator
// =========================================================================

/// Applies events through a summary store with optimistic concurrency
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<dyn SummaryStore>,
    policy: RemovePolicy,
    conflict_retry: RetryPolicy,
}

impl Aggregator {
    pub fn new(store: Arc<dyn SummaryStore>, policy: RemovePolicy, conflict_retry: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            conflict_retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn SummaryStore> {
        &self.store
    }

    /// Apply an event at most once.
    ///
    /// Re-reads state and re-plans after every lost compare-and-swap, so a
    /// concurrent duplicate ends as `already_applied` instead of double counting.
    pub async fn apply(&self, event: &OrderEvent) -> Result<AppliedResult, ApplyError> {
        let mut attempt = 0;

        loop {
            let state = self.store.load_state(&event.account_id, event).await?;

            let planned = plan(&state, event, self.policy).map_err(|e| {
                tracing::warn!(
                    account_id = %event.account_id,
                    event_id = %event.event_id,
                    amount = %event.amount,
                    error = %e,
                    "Event rejected"
                );
                e
            })?;

            let mutation = match planned {
                Plan::AlreadyApplied { total, version } => {
                    tracing::debug!(
                        account_id = %event.account_id,
                        event_id = %event.event_id,
                        "Event already applied, skipping"
                    );
                    return Ok(AppliedResult {
                        account_id: event.account_id.clone(),
                        event_id: event.event_id.clone(),
                        new_total: total,
                        version,
                        already_applied: true,
                        outcome: None,
                    });
                }
                Plan::Commit(mutation) => mutation,
            };

            match self.store.commit(&mutation).await? {
                CommitStatus::Committed { version } => {
                    log_outcome(event, &mutation);
                    return Ok(AppliedResult {
                        account_id: mutation.account_id,
                        event_id: event.event_id.clone(),
                        new_total: mutation.new_total,
                        version,
                        already_applied: false,
                        outcome: Some(mutation.outcome),
                    });
                }
                CommitStatus::Conflict if self.conflict_retry.should_retry(attempt) => {
                    tracing::debug!(
                        account_id = %event.account_id,
                        event_id = %event.event_id,
                        "Concurrency conflict, retrying (attempt {}/{})",
                        attempt + 1,
                        self.conflict_retry.max_attempts
                    );
                    self.conflict_retry.backoff(attempt).await;
                    attempt += 1;
                }
                CommitStatus::Conflict => {
                    tracing::warn!(
                        account_id = %event.account_id,
                        event_id = %event.event_id,
                        attempts = attempt + 1,
                        "Conflict retry budget exhausted"
                    );
                    return Err(ApplyError::ConflictRetryExhausted {
                        account_id: event.account_id.clone(),
                        attempts: attempt + 1,
                    });
                }
            }
        }
    }

    /// `apply` bounded by a deadline.
    ///
    /// A timed-out apply either committed fully or not at all, so redelivering
    /// the event is always safe.
    pub async fn apply_with_timeout(
        &self,
        event: &OrderEvent,
        timeout: Duration,
    ) -> Result<AppliedResult, ApplyError> {
        match tokio::time::timeout(timeout, self.apply(event)).await {
            Ok(result) => result,
            Err(_) => Err(ApplyError::Timeout(timeout)),
        }
    }
}

fn log_outcome(event: &OrderEvent, mutation: &Mutation) {
    if mutation.outcome.is_clamp() {
        tracing::warn!(
            account_id = %mutation.account_id,
            event_id = %event.event_id,
            retracts = ?event.retracts,
            outcome = ?mutation.outcome,
            total = %mutation.new_total,
            "Remove did not match a counted event"
        );
    } else {
        tracing::info!(
            account_id = %mutation.account_id,
            event_id = %event.event_id,
            operation = %event.operation,
            amount = %event.amount,
            total = %mutation.new_total,
            "Event applied"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Operation;
    use crate::store::MemorySummaryStore;
    use rust_decimal_macros::dec;

    fn event(id: &str, amount: rust_decimal::Decimal) -> OrderEvent {
        OrderEvent::new(
            EventId::from(id),
            "A1",
            Amount::new(amount).unwrap(),
            Amount::from_integer(1).unwrap(),
            Operation::Insert,
        )
        .unwrap()
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(
            Arc::new(MemorySummaryStore::new()),
            RemovePolicy::Clamp,
            RetryPolicy::new(100, Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn test_apply_then_duplicate() {
        let aggregator = aggregator();
        let e1 = event("e1", dec!(30));

        let first = aggregator.apply(&e1).await.unwrap();
        assert!(!first.already_applied);
        assert_eq!(first.new_total.value(), dec!(30));
        assert_eq!(first.version, 1);

        let second = aggregator.apply(&e1).await.unwrap();
        assert!(second.already_applied);
        assert_eq!(second.new_total.value(), dec!(30));
        assert_eq!(second.outcome, None);
    }

    #[tokio::test]
    async fn test_concurrent_distinct_events_all_counted() {
        let aggregator = aggregator();
        let mut handles = Vec::new();
        for i in 0..20 {
            let aggregator = aggregator.clone();
            handles.push(tokio::spawn(async move {
                aggregator.apply(&event(&format!("e{}", i), dec!(1.5))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let summary = aggregator.store().get_summary("A1").await.unwrap().unwrap();
        assert_eq!(summary.account_total.value(), dec!(30));
        assert_eq!(summary.version, 20);
    }

    #[tokio::test]
    async fn test_overflow_leaves_summary_untouched() {
        let aggregator = aggregator();
        let big = dec!(50000000000000000000000000000);
        aggregator.apply(&event("e1", big)).await.unwrap();

        let result = aggregator.apply(&event("e2", big)).await;
        assert!(matches!(result, Err(ApplyError::Overflow { .. })));

        let summary = aggregator.store().get_summary("A1").await.unwrap().unwrap();
        assert_eq!(summary.account_total.value(), big);
        assert_eq!(summary.version, 1);
    }

    #[test]
    fn test_apply_error_retryable() {
        assert!(ApplyError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ApplyError::Store(StoreError::InvalidData("bad".into())).is_retryable());
        assert!(!ApplyError::Overflow {
            account_id: "A1".into(),
            event_id: "e1".into(),
        }
        .is_retryable());
    }
}
