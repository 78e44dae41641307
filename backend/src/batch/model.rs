use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::batch::item::{OrItem, OrStatus, Transition};
use crate::error::{DeskError, DeskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Active,
    Inactive,
    /// Reached only by exhausting every number.
    Completed,
    Hold,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Active => "active",
            BatchStatus::Inactive => "inactive",
            BatchStatus::Completed => "completed",
            BatchStatus::Hold => "hold",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "active" => Ok(BatchStatus::Active),
            "inactive" => Ok(BatchStatus::Inactive),
            "completed" => Ok(BatchStatus::Completed),
            "hold" => Ok(BatchStatus::Hold),
            other => Err(anyhow::anyhow!("invalid batch status value: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageAction {
    Issued,
    Cancelled,
    Voided,
    /// Issuance rolled back by a failed payment.
    Reverted,
}

impl UsageAction {
    pub fn as_str(self) -> &'static str {
        match self {
            UsageAction::Issued => "issued",
            UsageAction::Cancelled => "cancelled",
            UsageAction::Voided => "voided",
            UsageAction::Reverted => "reverted",
        }
    }
}

impl FromStr for UsageAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issued" => Ok(UsageAction::Issued),
            "cancelled" => Ok(UsageAction::Cancelled),
            "voided" => Ok(UsageAction::Voided),
            "reverted" => Ok(UsageAction::Reverted),
            other => Err(anyhow::anyhow!("invalid usage action value: {other}")),
        }
    }
}

/// One line of the append-only usage log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageEntry {
    pub seq: u64,
    pub or_number: u64,
    pub action: UsageAction,
    pub payment_id: Option<Uuid>,
    pub actor: String,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total_numbers: u64,
    pub used_numbers: u64,
    pub available_numbers: u64,
    pub is_exhausted: bool,
}

/// Input for `BatchRegistry::create_batch`.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub code: String,
    pub prefix: String,
    pub start: u64,
    pub end: u64,
    /// Cursor at registration; numbers below it were spent on paper and are
    /// registered as voided. Defaults to `start`.
    pub current: Option<u64>,
    pub assigned_to: String,
    pub entry_by: String,
    pub status: BatchStatus,
    pub notes: Option<String>,
}

/// Mutation requested on a single number.
#[derive(Debug, Clone)]
pub enum ItemOp {
    Issue {
        payment_id: Option<Uuid>,
        issued_to: String,
    },
    Cancel {
        reason: String,
        by: String,
    },
    Void {
        reason: String,
        by: String,
    },
    Revert {
        payment_id: Option<Uuid>,
        by: String,
    },
}

impl ItemOp {
    pub fn transition(&self) -> Transition {
        match self {
            ItemOp::Issue { .. } => Transition::Issue,
            ItemOp::Cancel { .. } => Transition::Cancel,
            ItemOp::Void { .. } => Transition::Void,
            ItemOp::Revert { .. } => Transition::Revert,
        }
    }
}

/// State captured before a mutation so a failed write can be rolled back.
#[derive(Debug, Clone)]
pub struct Undo {
    slot: usize,
    item: OrItem,
    current_number: u64,
    status: BatchStatus,
    updated_at: DateTime<Utc>,
}

/// A contiguous range of OR numbers assigned to one cashier.
///
/// `items[n - start_number]` is the item for number `n`; the item list is the
/// only source of truth for availability. `current_number` is derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub id: Uuid,
    pub code: String,
    pub prefix: String,
    pub start_number: u64,
    pub end_number: u64,
    pub current_number: u64,
    pub status: BatchStatus,
    pub assigned_to: String,
    pub entry_by: String,
    pub items: Vec<OrItem>,
    pub usage_log: Vec<UsageEntry>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// Builds a batch with one item per number. Numbers below `current` are
    /// voided so the cursor agrees with the item list from the start.
    pub fn from_new(req: &NewBatch, now: DateTime<Utc>) -> Self {
        let current = req.current.unwrap_or(req.start);

        let mut items: Vec<OrItem> = (req.start..=req.end).map(OrItem::available).collect();
        for item in items.iter_mut().take((current - req.start) as usize) {
            item.mark_retired(
                OrStatus::Voided,
                &req.entry_by,
                "consumed before registration",
                now,
            );
        }

        let mut batch = Self {
            id: Uuid::new_v4(),
            code: req.code.clone(),
            prefix: req.prefix.clone(),
            start_number: req.start,
            end_number: req.end,
            current_number: req.start,
            status: req.status,
            assigned_to: req.assigned_to.clone(),
            entry_by: req.entry_by.clone(),
            items,
            usage_log: Vec::new(),
            notes: req.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        batch.recompute_cursor();
        batch.settle_status();
        batch
    }

    pub fn label(&self, n: u64) -> String {
        format!("{}{}", self.prefix, n)
    }

    pub fn contains(&self, n: u64) -> bool {
        n >= self.start_number && n <= self.end_number
    }

    /// Inclusive-range intersection test.
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        start <= self.end_number && self.start_number <= end
    }

    fn slot(&self, n: u64) -> Option<usize> {
        self.contains(n).then(|| (n - self.start_number) as usize)
    }

    pub fn item(&self, n: u64) -> Option<&OrItem> {
        self.slot(n).and_then(|i| self.items.get(i))
    }

    /// Lowest-numbered issuable item.
    pub fn first_available(&self) -> Option<u64> {
        self.items
            .iter()
            .find(|it| it.status.is_issuable())
            .map(|it| it.or_number)
    }

    pub fn stats(&self) -> BatchStats {
        let total = self.items.len() as u64;
        let used = self.items.iter().filter(|it| it.status.is_consumed()).count() as u64;
        let available = self.items.iter().filter(|it| it.status.is_issuable()).count() as u64;

        BatchStats {
            total_numbers: total,
            used_numbers: used,
            available_numbers: available,
            is_exhausted: self.first_available().is_none(),
        }
    }

    /// Re-derives the cursor as the first number past the leading run of
    /// spent items.
    pub fn recompute_cursor(&mut self) {
        let run = self
            .items
            .iter()
            .take_while(|it| it.status.is_consumed())
            .count() as u64;
        self.current_number = self.start_number + run;
    }

    /// Only moves forward from the current cursor; cheaper than a full
    /// recompute after forward-only transitions.
    fn advance_cursor(&mut self) {
        while let Some(item) = self.item(self.current_number) {
            if !item.status.is_consumed() {
                break;
            }
            self.current_number += 1;
        }
    }

    /// Exhaustion completes a batch; a reverted number re-opens it.
    pub(crate) fn settle_status(&mut self) {
        if self.current_number > self.end_number {
            self.status = BatchStatus::Completed;
        } else if self.status == BatchStatus::Completed {
            self.status = BatchStatus::Active;
        }
    }

    /// Applies `op` to number `n`, stamps the audit trail and the usage log,
    /// and moves the cursor. Returns what is needed to roll the change back.
    pub fn apply(&mut self, n: u64, op: &ItemOp, at: DateTime<Utc>) -> DeskResult<Undo> {
        let label = self.label(n);
        let slot = self.slot(n).ok_or_else(|| {
            DeskError::NotFound(format!(
                "OR {label} is outside batch {} ({}-{})",
                self.code, self.start_number, self.end_number
            ))
        })?;

        let transition = op.transition();
        let from = self.items[slot].status;
        if transition.target(from).is_none() {
            return Err(transition.rejection(&label, from));
        }

        let undo = Undo {
            slot,
            item: self.items[slot].clone(),
            current_number: self.current_number,
            status: self.status,
            updated_at: self.updated_at,
        };

        let item = &mut self.items[slot];
        let (action, payment_id, actor, note) = match op {
            ItemOp::Issue {
                payment_id,
                issued_to,
            } => {
                item.mark_issued(*payment_id, issued_to, at);
                (UsageAction::Issued, *payment_id, issued_to.clone(), None)
            }
            ItemOp::Cancel { reason, by } => {
                let pid = item.payment_id;
                item.mark_retired(OrStatus::Cancelled, by, reason, at);
                (UsageAction::Cancelled, pid, by.clone(), Some(reason.clone()))
            }
            ItemOp::Void { reason, by } => {
                let pid = item.payment_id;
                item.mark_retired(OrStatus::Voided, by, reason, at);
                (UsageAction::Voided, pid, by.clone(), Some(reason.clone()))
            }
            ItemOp::Revert { payment_id, by } => {
                if item.payment_id != *payment_id {
                    return Err(DeskError::Conflict(format!(
                        "OR {label} is held by another payment; refusing to revert"
                    )));
                }
                item.mark_reverted();
                (UsageAction::Reverted, *payment_id, by.clone(), None)
            }
        };

        match transition {
            Transition::Revert => self.recompute_cursor(),
            _ => self.advance_cursor(),
        }
        self.settle_status();
        self.updated_at = at;

        self.usage_log.push(UsageEntry {
            seq: self.usage_log.len() as u64 + 1,
            or_number: n,
            action,
            payment_id,
            actor,
            note,
            at,
        });

        Ok(undo)
    }

    /// Restores the state captured by `apply`, dropping its log entry.
    pub fn undo(&mut self, undo: Undo) {
        self.items[undo.slot] = undo.item;
        self.current_number = undo.current_number;
        self.status = undo.status;
        self.updated_at = undo.updated_at;
        self.usage_log.pop();
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            id: self.id,
            code: self.code.clone(),
            prefix: self.prefix.clone(),
            start_number: self.start_number,
            end_number: self.end_number,
            current_number: self.current_number,
            status: self.status,
            assigned_to: self.assigned_to.clone(),
            entry_by: self.entry_by.clone(),
            notes: self.notes.clone(),
            stats: self.stats(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Batch header plus derived statistics, without the item list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub id: Uuid,
    pub code: String,
    pub prefix: String,
    pub start_number: u64,
    pub end_number: u64,
    pub current_number: u64,
    pub status: BatchStatus,
    pub assigned_to: String,
    pub entry_by: String,
    pub notes: Option<String>,
    pub stats: BatchStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of issuing, cancelling or voiding one number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrTicket {
    pub batch_id: Uuid,
    pub batch_code: String,
    pub or_number: u64,
    pub display: String,
    pub item: OrItem,
    pub batch_status: BatchStatus,
    pub current_number: u64,
    pub stats: BatchStats,
}

impl OrTicket {
    pub fn from_batch(batch: &Batch, n: u64) -> Option<Self> {
        let item = batch.item(n)?.clone();
        Some(Self {
            batch_id: batch.id,
            batch_code: batch.code.clone(),
            or_number: n,
            display: batch.label(n),
            item,
            batch_status: batch.status,
            current_number: batch.current_number,
            stats: batch.stats(),
        })
    }
}

/// The number a cashier should use next.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextOr {
    pub batch_id: Uuid,
    pub batch_code: String,
    pub or_number: u64,
    pub display: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    pub status: Option<BatchStatus>,
    pub assigned_to: Option<String>,
}

impl BatchFilter {
    pub fn matches(&self, b: &Batch) -> bool {
        self.status.is_none_or(|s| s == b.status)
            && self
                .assigned_to
                .as_deref()
                .is_none_or(|u| u == b.assigned_to)
    }
}

/// Registry-wide aggregate counts. Computed without a global lock, so they
/// may be momentarily stale.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryStatistics {
    pub total_batches: u64,
    pub pending: u64,
    pub active: u64,
    pub inactive: u64,
    pub completed: u64,
    pub hold: u64,
    pub total_numbers: u64,
    pub used_numbers: u64,
    pub available_numbers: u64,
}
