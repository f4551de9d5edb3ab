//! Scheduled Jobs
//!
//! Background maintenance for the idempotence ledger.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::interval;

use crate::store::{StoreError, SummaryStore};

// =========================================================================
// Ledger retention
// =========================================================================

/// Configuration for ledger retention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerRetentionConfig {
    /// Settled entries older than this are deleted
    pub retention: chrono::Duration,
    /// How often the job runs (default: 1 hour)
    pub run_interval: Duration,
}

impl LedgerRetentionConfig {
    pub fn days(days: u32) -> Self {
        Self {
            retention: chrono::Duration::days(days as i64),
            run_interval: Duration::from_secs(3600),
        }
    }
}

/// Deletes ledger entries whose effect on the total is settled: retracted
/// upserts and removes. Counted upserts and pending removes are kept.
///
/// A redelivery older than the retention window can no longer be recognized
/// as a duplicate.
pub struct LedgerRetentionJob {
    store: Arc<dyn SummaryStore>,
    config: LedgerRetentionConfig,
}

impl LedgerRetentionJob {
    pub fn new(store: Arc<dyn SummaryStore>, config: LedgerRetentionConfig) -> Self {
        Self { store, config }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.config.retention
    }

    /// Run one pruning pass (for manual trigger or testing)
    pub async fn run_once(&self) -> Result<RetentionReport, JobError> {
        let cutoff = self.cutoff(Utc::now());
        let entries_deleted = self.store.prune_ledger(cutoff).await?;

        if entries_deleted > 0 {
            tracing::info!(
                entries_deleted = entries_deleted,
                cutoff = %cutoff,
                "Pruned settled ledger entries"
            );
        }

        Ok(RetentionReport {
            entries_deleted,
            cutoff,
            completed_at: Utc::now(),
        })
    }

    /// Start the job in the background; it stops when `shutdown` flips to true.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                retention_days = self.config.retention.num_days(),
                "Ledger retention job started"
            );
            let mut ticker = interval(self.config.run_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!(error = %e, "Ledger retention failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Ledger retention job stopped");
                        break;
                    }
                }
            }
        })
    }
}

/// Report from one retention pass
#[derive(Debug, Clone)]
pub struct RetentionReport {
    pub entries_deleted: u64,
    pub cutoff: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{Aggregator, RemovePolicy};
    use crate::domain::{Amount, EventId, Operation, OrderEvent};
    use crate::retry::RetryPolicy;
    use crate::store::MemorySummaryStore;

    fn event(id: &str, operation: Operation, retracts: Option<&str>) -> OrderEvent {
        let event = OrderEvent::new(
            EventId::from(id),
            "A1",
            Amount::from_integer(5).unwrap(),
            Amount::from_integer(1).unwrap(),
            operation,
        )
        .unwrap();
        match retracts {
            Some(target) => event.with_retracts(EventId::from(target)),
            None => event,
        }
    }

    #[test]
    fn test_config_days() {
        let config = LedgerRetentionConfig::days(7);
        assert_eq!(config.retention, chrono::Duration::days(7));
        assert_eq!(config.run_interval, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_run_once_prunes_only_settled_entries() {
        let store = Arc::new(MemorySummaryStore::new());
        let aggregator = Aggregator::new(store.clone(), RemovePolicy::Clamp, RetryPolicy::none());
        aggregator.apply(&event("e1", Operation::Insert, None)).await.unwrap();
        aggregator.apply(&event("e2", Operation::Insert, None)).await.unwrap();
        aggregator.apply(&event("r1", Operation::Remove, Some("e1"))).await.unwrap();

        // Zero retention: everything settled is old enough
        let job = LedgerRetentionJob::new(
            store.clone(),
            LedgerRetentionConfig {
                retention: chrono::Duration::seconds(-60),
                run_interval: Duration::from_secs(1),
            },
        );
        let report = job.run_once().await.unwrap();
        assert_eq!(report.entries_deleted, 2);

        let summary = store.snapshot("A1").await.unwrap();
        assert!(summary.is_applied(&EventId::from("e2")));
        assert!(!summary.is_applied(&EventId::from("e1")));
        assert_eq!(summary.account_total(), Amount::from_integer(5).unwrap());
    }

    #[tokio::test]
    async fn test_job_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let job = LedgerRetentionJob::new(
            Arc::new(MemorySummaryStore::new()),
            LedgerRetentionConfig::days(1),
        );
        let handle = job.start(rx);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
