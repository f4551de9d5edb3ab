//! In-memory summary store
//!
//! Keeps whole `AccountSummary` aggregates behind one lock. Used by tests and
//! by the service when no database is involved.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::aggregate::{AccountState, AccountSummary, Aggregate, Mutation};
use crate::domain::OrderEvent;

use super::{CommitStatus, StoreError, SummaryRecord, SummaryStore};

#[derive(Debug, Default)]
pub struct MemorySummaryStore {
    accounts: RwLock<HashMap<String, AccountSummary>>,
}

impl MemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one aggregate, ledger included
    pub async fn snapshot(&self, account_id: &str) -> Option<AccountSummary> {
        self.accounts.read().await.get(account_id).cloned()
    }
}

#[async_trait]
impl SummaryStore for MemorySummaryStore {
    async fn load_state(
        &self,
        account_id: &str,
        event: &OrderEvent,
    ) -> Result<AccountState, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(match accounts.get(account_id) {
            Some(summary) => summary.state_for(event),
            None => AccountState::absent(account_id),
        })
    }

    async fn commit(&self, mutation: &Mutation) -> Result<CommitStatus, StoreError> {
        let mut accounts = self.accounts.write().await;
        let current = accounts
            .get(&mutation.account_id)
            .map(|s| s.version())
            .unwrap_or(0);

        if current != mutation.expected_version {
            return Ok(CommitStatus::Conflict);
        }

        let summary = accounts
            .remove(&mutation.account_id)
            .unwrap_or_else(|| AccountSummary::new(mutation.account_id.clone()));

        if summary.is_applied(&mutation.entry.event_id) {
            accounts.insert(mutation.account_id.clone(), summary);
            return Ok(CommitStatus::Conflict);
        }

        let summary = summary.apply(mutation.clone());
        let version = summary.version();
        accounts.insert(mutation.account_id.clone(), summary);

        Ok(CommitStatus::Committed { version })
    }

    async fn get_summary(&self, account_id: &str) -> Result<Option<SummaryRecord>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(account_id).map(|summary| SummaryRecord {
            account_id: summary.id().to_string(),
            account_total: summary.account_total(),
            version: summary.version(),
            updated_at: summary.updated_at().unwrap_or_else(Utc::now),
        }))
    }

    async fn prune_ledger(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut accounts = self.accounts.write().await;
        let pruned = accounts
            .values_mut()
            .map(|summary| summary.prune_settled(cutoff))
            .sum::<usize>();
        Ok(pruned as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
