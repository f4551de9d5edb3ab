//! AccountSummary Aggregate
//!
//! The per-account running total together with its idempotence ledger.
//! Planning an event against a summary is pure: it produces either
//! `Plan::AlreadyApplied` or a `Mutation` that a store commits atomically.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Amount, AmountError, EventId, Operation, OrderEvent};

use super::{Aggregate, ApplyError};

/// How a REMOVE for an event that was never applied is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovePolicy {
    /// Record the REMOVE as a no-op; a late target still adds
    #[default]
    Clamp,
    /// Record a pending retraction that neutralizes the target when it arrives
    Tombstone,
}

impl std::str::FromStr for RemovePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clamp" => Ok(RemovePolicy::Clamp),
            "tombstone" => Ok(RemovePolicy::Tombstone),
            other => Err(format!("unknown remove policy: {}", other)),
        }
    }
}

/// Ledger entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Upsert,
    Remove,
    /// REMOVE recorded before its target, under `RemovePolicy::Tombstone`
    PendingRemove,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Upsert => "upsert",
            EntryKind::Remove => "remove",
            EntryKind::PendingRemove => "pending_remove",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upsert" => Some(EntryKind::Upsert),
            "remove" => Some(EntryKind::Remove),
            "pending_remove" => Some(EntryKind::PendingRemove),
            _ => None,
        }
    }
}

/// One event folded into (or deliberately kept out of) the total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub event_id: EventId,
    pub kind: EntryKind,
    /// Upsert: amount of the event. Remove: amount actually subtracted.
    pub amount: Amount,
    pub retracts: Option<EventId>,
    pub retracted_by: Option<EventId>,
    pub applied_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Upsert whose amount is currently part of the total
    pub fn is_counted(&self) -> bool {
        self.kind == EntryKind::Upsert && self.retracted_by.is_none()
    }
}

/// What applying an event did to the total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// INSERT/MODIFY added its amount
    Added,
    /// REMOVE subtracted its target's amount
    Retracted,
    /// REMOVE subtracted, but the total would have gone negative and was clamped to zero
    RetractedClamped,
    /// REMOVE for an event never applied; nothing changed
    IgnoredUnknownTarget,
    /// REMOVE for an event already retracted by another REMOVE
    IgnoredAlreadyRetracted,
    /// REMOVE whose target is itself a REMOVE
    IgnoredTargetNotUpsert,
    /// REMOVE recorded ahead of its target
    PendingRetraction,
    /// INSERT/MODIFY arrived after its REMOVE and was recorded as retracted
    Neutralized,
}

impl ApplyOutcome {
    /// Outcomes that deserve a warning in the logs
    pub fn is_clamp(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::RetractedClamped
                | ApplyOutcome::IgnoredUnknownTarget
                | ApplyOutcome::IgnoredAlreadyRetracted
                | ApplyOutcome::IgnoredTargetNotUpsert
                | ApplyOutcome::PendingRetraction
        )
    }
}

/// Slice of an account's state relevant to one event.
///
/// Stores build this from whatever they hold; `version == 0` means the
/// summary row does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountState {
    pub account_id: String,
    pub total: Amount,
    pub version: i64,
    /// Ledger entry for the event's own id
    pub existing: Option<LedgerEntry>,
    /// For REMOVE: ledger entry of the retracted event
    pub target: Option<LedgerEntry>,
    /// For INSERT/MODIFY: a pending REMOVE waiting for this event
    pub pending_retraction: Option<LedgerEntry>,
    /// For REMOVE: an earlier pending REMOVE of the same target
    pub prior_retraction: Option<LedgerEntry>,
}

impl AccountState {
    /// State of an account with no summary row
    pub fn absent(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            total: Amount::ZERO,
            version: 0,
            existing: None,
            target: None,
            pending_retraction: None,
            prior_retraction: None,
        }
    }
}

/// Atomic change to one account: new total, new ledger entry, and the
/// ledger updates that go with it. Committed only if the summary is still at
/// `expected_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub account_id: String,
    pub expected_version: i64,
    pub new_total: Amount,
    pub entry: LedgerEntry,
    /// Mark this entry as retracted by `entry.event_id`
    pub retract_target: Option<EventId>,
    /// Turn this pending REMOVE into a matched REMOVE
    pub resolve_pending: Option<EventId>,
    pub outcome: ApplyOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    AlreadyApplied { total: Amount, version: i64 },
    Commit(Mutation),
}

/// Decide what applying `event` to `state` does.
///
/// # Errors
/// - `ApplyError::Overflow` if adding the event would exceed the decimal range
pub fn plan(state: &AccountState, event: &OrderEvent, policy: RemovePolicy) -> Result<Plan, ApplyError> {
    if state.existing.is_some() {
        return Ok(Plan::AlreadyApplied {
            total: state.total,
            version: state.version,
        });
    }

    let now = Utc::now();
    let entry = |kind: EntryKind, amount: Amount| LedgerEntry {
        event_id: event.event_id.clone(),
        kind,
        amount,
        retracts: event.retracts.clone(),
        retracted_by: None,
        applied_at: now,
    };
    let mutation = |entry: LedgerEntry, new_total: Amount, outcome: ApplyOutcome| Mutation {
        account_id: state.account_id.clone(),
        expected_version: state.version,
        new_total,
        entry,
        retract_target: None,
        resolve_pending: None,
        outcome,
    };

    let planned = match event.operation {
        Operation::Insert | Operation::Modify => match &state.pending_retraction {
            Some(pending) => {
                let mut upsert = entry(EntryKind::Upsert, event.amount);
                upsert.retracted_by = Some(pending.event_id.clone());
                let mut m = mutation(upsert, state.total, ApplyOutcome::Neutralized);
                m.resolve_pending = Some(pending.event_id.clone());
                Plan::Commit(m)
            }
            None => {
                let new_total = state.total.checked_add(&event.amount).map_err(|_| ApplyError::Overflow {
                    account_id: state.account_id.clone(),
                    event_id: event.event_id.clone(),
                })?;
                Plan::Commit(mutation(
                    entry(EntryKind::Upsert, event.amount),
                    new_total,
                    ApplyOutcome::Added,
                ))
            }
        },
        Operation::Remove => {
            let ignored = |outcome| {
                Plan::Commit(mutation(entry(EntryKind::Remove, Amount::ZERO), state.total, outcome))
            };

            match &state.target {
                Some(target) if target.kind != EntryKind::Upsert => {
                    ignored(ApplyOutcome::IgnoredTargetNotUpsert)
                }
                Some(target) if target.retracted_by.is_some() => {
                    ignored(ApplyOutcome::IgnoredAlreadyRetracted)
                }
                Some(target) => {
                    let (new_total, clamped) = state.total.saturating_sub(&target.amount);
                    let subtracted = if clamped { state.total } else { target.amount };
                    let outcome = if clamped {
                        ApplyOutcome::RetractedClamped
                    } else {
                        ApplyOutcome::Retracted
                    };
                    let mut m = mutation(entry(EntryKind::Remove, subtracted), new_total, outcome);
                    m.retract_target = Some(target.event_id.clone());
                    Plan::Commit(m)
                }
                None => match (policy, &event.retracts) {
                    // Only the earliest pending REMOVE is resolved by the target
                    (RemovePolicy::Tombstone, Some(_)) if state.prior_retraction.is_some() => {
                        ignored(ApplyOutcome::IgnoredAlreadyRetracted)
                    }
                    (RemovePolicy::Tombstone, Some(_)) => Plan::Commit(mutation(
                        entry(EntryKind::PendingRemove, Amount::ZERO),
                        state.total,
                        ApplyOutcome::PendingRetraction,
                    )),
                    _ => ignored(ApplyOutcome::IgnoredUnknownTarget),
                },
            }
        }
    };

    Ok(planned)
}

// =========================================================================
// AccountSummary: full in-memory aggregate
// =========================================================================

/// Aggregate row: running total plus the full idempotence ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSummary {
    account_id: String,
    account_total: Amount,
    version: i64,
    ledger: HashMap<EventId, LedgerEntry>,
    updated_at: Option<DateTime<Utc>>,
}

impl AccountSummary {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            ..Default::default()
        }
    }

    pub fn account_total(&self) -> Amount {
        self.account_total
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_applied(&self, event_id: &EventId) -> bool {
        self.ledger.contains_key(event_id)
    }

    pub fn entry(&self, event_id: &EventId) -> Option<&LedgerEntry> {
        self.ledger.get(event_id)
    }

    /// Sum of counted upserts; equals `account_total` while the invariant holds
    pub fn ledger_total(&self) -> Result<Amount, AmountError> {
        self.ledger
            .values()
            .filter(|e| e.is_counted())
            .try_fold(Amount::ZERO, |acc, e| acc.checked_add(&e.amount))
    }

    /// Extract the slice of state `plan` needs for `event`.
    pub fn state_for(&self, event: &OrderEvent) -> AccountState {
        let (target, prior_retraction) = match (event.operation, &event.retracts) {
            (Operation::Remove, Some(target)) => (
                self.ledger.get(target).cloned(),
                self.pending_for(target).cloned(),
            ),
            _ => (None, None),
        };

        let pending_retraction = if event.operation.is_upsert() {
            self.pending_for(&event.event_id).cloned()
        } else {
            None
        };

        AccountState {
            account_id: self.account_id.clone(),
            total: self.account_total,
            version: self.version,
            existing: self.ledger.get(&event.event_id).cloned(),
            target,
            pending_retraction,
            prior_retraction,
        }
    }

    /// Earliest pending REMOVE of `target`
    fn pending_for(&self, target: &EventId) -> Option<&LedgerEntry> {
        self.ledger
            .values()
            .filter(|e| e.kind == EntryKind::PendingRemove && e.retracts.as_ref() == Some(target))
            .min_by_key(|e| e.applied_at)
    }

    /// Remove settled ledger entries applied before `cutoff`.
    ///
    /// Counted upserts and pending removes are always kept.
    pub fn prune_settled(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.ledger.len();
        self.ledger.retain(|_, e| {
            e.applied_at >= cutoff || e.is_counted() || e.kind == EntryKind::PendingRemove
        });
        before - self.ledger.len()
    }
}

impl Aggregate for AccountSummary {
    type Event = Mutation;

    fn id(&self) -> &str {
        &self.account_id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(mut self, mutation: Mutation) -> Self {
        if let Some(target) = &mutation.retract_target {
            if let Some(entry) = self.ledger.get_mut(target) {
                entry.retracted_by = Some(mutation.entry.event_id.clone());
            }
        }
        if let Some(pending) = &mutation.resolve_pending {
            if let Some(entry) = self.ledger.get_mut(pending) {
                entry.kind = EntryKind::Remove;
            }
        }

        self.account_id = mutation.account_id;
        self.account_total = mutation.new_total;
        self.updated_at = Some(mutation.entry.applied_at);
        self.ledger
            .insert(mutation.entry.event_id.clone(), mutation.entry);
        self.version += 1;
        self
    }
}
