//! Postgres summary store
//!
//! Summary rows live in the configured table; the idempotence ledger lives in
//! `<table>_events` keyed on `(account_id, event_id)`. A commit is one
//! transaction whose every statement is conditional; any statement that
//! matches no row turns the whole commit into a `Conflict`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::aggregate::{AccountState, EntryKind, LedgerEntry, Mutation};
use crate::db::{is_valid_identifier, ledger_table_name};
use crate::domain::{Amount, EventId, Operation, OrderEvent};

use super::{CommitStatus, StoreError, SummaryRecord, SummaryStore};

type LedgerRow = (
    String,
    String,
    Decimal,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
);

#[derive(Debug, Clone)]
pub struct PgSummaryStore {
    pool: PgPool,
    summary_table: String,
    ledger_table: String,
}

impl PgSummaryStore {
    /// Create a store over `summary_table`; the name must be a plain identifier.
    pub fn new(pool: PgPool, summary_table: &str) -> Result<Self, StoreError> {
        if !is_valid_identifier(summary_table) {
            return Err(StoreError::InvalidData(format!(
                "invalid summary table name: {}",
                summary_table
            )));
        }
        Ok(Self {
            pool,
            summary_table: summary_table.to_string(),
            ledger_table: ledger_table_name(summary_table),
        })
    }

    async fn try_commit(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        mutation: &Mutation,
    ) -> Result<Option<i64>, StoreError> {
        // Create-if-absent and update are the same conditional write
        let version: Option<i64> = if mutation.expected_version == 0 {
            sqlx::query_scalar(&format!(
                r#"
                INSERT INTO {} (account_id, account_total, version, created_at, updated_at)
                VALUES ($1, $2, 1, NOW(), NOW())
                ON CONFLICT (account_id) DO NOTHING
                RETURNING version
                "#,
                self.summary_table
            ))
            .bind(&mutation.account_id)
            .bind(mutation.new_total.value())
            .fetch_optional(&mut **tx)
            .await?
        } else {
            sqlx::query_scalar(&format!(
                r#"
                UPDATE {}
                SET account_total = $2, version = version + 1, updated_at = NOW()
                WHERE account_id = $1 AND version = $3
                RETURNING version
                "#,
                self.summary_table
            ))
            .bind(&mutation.account_id)
            .bind(mutation.new_total.value())
            .bind(mutation.expected_version)
            .fetch_optional(&mut **tx)
            .await?
        };

        let Some(version) = version else {
            return Ok(None);
        };

        let entry = &mutation.entry;
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO {} (account_id, event_id, kind, amount, retracts, retracted_by, applied_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (account_id, event_id) DO NOTHING
            "#,
            self.ledger_table
        ))
        .bind(&mutation.account_id)
        .bind(entry.event_id.as_str())
        .bind(entry.kind.as_str())
        .bind(entry.amount.value())
        .bind(entry.retracts.as_ref().map(EventId::as_str))
        .bind(entry.retracted_by.as_ref().map(EventId::as_str))
        .bind(entry.applied_at)
        .execute(&mut **tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Ok(None);
        }

        if let Some(target) = &mutation.retract_target {
            let updated = sqlx::query(&format!(
                r#"
                UPDATE {}
                SET retracted_by = $3
                WHERE account_id = $1 AND event_id = $2 AND kind = 'upsert' AND retracted_by IS NULL
                "#,
                self.ledger_table
            ))
            .bind(&mutation.account_id)
            .bind(target.as_str())
            .bind(entry.event_id.as_str())
            .execute(&mut **tx)
            .await?;

            if updated.rows_affected() == 0 {
                return Ok(None);
            }
        }

        if let Some(pending) = &mutation.resolve_pending {
            let updated = sqlx::query(&format!(
                r#"
                UPDATE {}
                SET kind = 'remove'
                WHERE account_id = $1 AND event_id = $2 AND kind = 'pending_remove'
                "#,
                self.ledger_table
            ))
            .bind(&mutation.account_id)
            .bind(pending.as_str())
            .execute(&mut **tx)
            .await?;

            if updated.rows_affected() == 0 {
                return Ok(None);
            }
        }

        Ok(Some(version))
    }
}

fn decode_entry(row: LedgerRow) -> Result<LedgerEntry, StoreError> {
    let (event_id, kind, amount, retracts, retracted_by, applied_at) = row;
    let kind = EntryKind::parse(&kind)
        .ok_or_else(|| StoreError::InvalidData(format!("unknown ledger entry kind: {}", kind)))?;
    let amount = Amount::new(amount).map_err(|e| StoreError::InvalidData(e.to_string()))?;

    Ok(LedgerEntry {
        event_id: EventId::new(event_id),
        kind,
        amount,
        retracts: retracts.map(EventId::new),
        retracted_by: retracted_by.map(EventId::new),
        applied_at,
    })
}

#[async_trait]
impl SummaryStore for PgSummaryStore {
    async fn load_state(
        &self,
        account_id: &str,
        event: &OrderEvent,
    ) -> Result<AccountState, StoreError> {
        // The summary row must be read before the ledger: a ledger newer than
        // the version only causes a conflict, never a lost update.
        let summary: Option<(Decimal, i64)> = sqlx::query_as(&format!(
            "SELECT account_total, version FROM {} WHERE account_id = $1",
            self.summary_table
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        let mut state = AccountState::absent(account_id);
        let Some((total, version)) = summary else {
            return Ok(state);
        };
        state.total = Amount::new(total).map_err(|e| StoreError::InvalidData(e.to_string()))?;
        state.version = version;

        let target = match (event.operation, &event.retracts) {
            (Operation::Remove, Some(target)) => Some(target.as_str()),
            _ => None,
        };

        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            r#"
            SELECT event_id, kind, amount, retracts, retracted_by, applied_at
            FROM {}
            WHERE account_id = $1
              AND (event_id = $2 OR event_id = $3
                   OR (kind = 'pending_remove' AND (retracts = $2 OR retracts = $3)))
            ORDER BY applied_at
            "#,
            self.ledger_table
        ))
        .bind(account_id)
        .bind(event.event_id.as_str())
        .bind(target)
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let entry = decode_entry(row)?;
            if entry.event_id == event.event_id {
                state.existing = Some(entry);
            } else if Some(entry.event_id.as_str()) == target {
                state.target = Some(entry);
            } else if entry.kind != EntryKind::PendingRemove {
                continue;
            } else if event.operation.is_upsert() {
                state.pending_retraction.get_or_insert(entry);
            } else if target.is_some() && entry.retracts.as_ref().map(EventId::as_str) == target {
                state.prior_retraction.get_or_insert(entry);
            }
        }

        Ok(state)
    }

    async fn commit(&self, mutation: &Mutation) -> Result<CommitStatus, StoreError> {
        let mut tx = self.pool.begin().await?;

        match self.try_commit(&mut tx, mutation).await? {
            Some(version) => {
                tx.commit().await?;
                Ok(CommitStatus::Committed { version })
            }
            None => {
                tx.rollback().await?;
                Ok(CommitStatus::Conflict)
            }
        }
    }

    async fn get_summary(&self, account_id: &str) -> Result<Option<SummaryRecord>, StoreError> {
        let row: Option<(String, Decimal, i64, DateTime<Utc>)> = sqlx::query_as(&format!(
            r#"
            SELECT account_id, account_total, version, updated_at
            FROM {}
            WHERE account_id = $1
            "#,
            self.summary_table
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(account_id, total, version, updated_at)| {
            Ok(SummaryRecord {
                account_id,
                account_total: Amount::new(total)
                    .map_err(|e| StoreError::InvalidData(e.to_string()))?,
                version,
                updated_at,
            })
        })
        .transpose()
    }

    async fn prune_ledger(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!(
            r#"
            DELETE FROM {}
            WHERE applied_at < $1
              AND (kind = 'remove' OR retracted_by IS NOT NULL)
            "#,
            self.ledger_table
        ))
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        crate::db::verify_connection(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}
