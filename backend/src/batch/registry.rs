//! OR batch registry.
//!
//! Owns every batch in memory and writes through to a [`BatchRepository`].
//!
//! Concurrency model:
//! - each batch sits behind its own async mutex; read-available → mark-issued →
//!   advance-cursor happens entirely under that lock, so two cashiers can never
//!   receive the same number;
//! - create/delete/assignment changes are serialized by `admin`, which makes the
//!   overlap check and the insert one step;
//! - the slot index (`slots`) is only touched synchronously.
//!
//! A mutation is applied to the in-memory batch, persisted, and rolled back
//! in memory if the write fails. Memory never runs ahead of storage.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::batch::item::{OrItem, OrStatus};
use crate::batch::model::{
    Batch, BatchFilter, BatchStats, BatchStatus, BatchSummary, ItemOp, NewBatch, NextOr, OrTicket,
    RegistryStatistics,
};
use crate::batch::repository::BatchRepository;
use crate::error::{DeskError, DeskResult};
use crate::logger::{annotate_span, warn_if_slow};
use crate::metrics::counters::Counters;
use crate::time;

/// Immutable facts about a batch, readable without taking its lock.
#[derive(Clone)]
struct Slot {
    start: u64,
    end: u64,
    assigned_to: String,
    cell: Arc<Mutex<Batch>>,
}

pub struct BatchRegistry {
    repo: Arc<dyn BatchRepository>,
    slots: RwLock<BTreeMap<String, Slot>>,
    admin: Mutex<()>,
    counters: Counters,
    max_batch_size: u64,
    slow_storage: Duration,
}

impl BatchRegistry {
    pub fn new(repo: Arc<dyn BatchRepository>, counters: Counters) -> Self {
        Self {
            repo,
            slots: RwLock::new(BTreeMap::new()),
            admin: Mutex::new(()),
            counters,
            max_batch_size: 100_000,
            slow_storage: Duration::from_millis(100),
        }
    }

    pub fn with_limits(mut self, max_batch_size: u64, slow_storage: Duration) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self.slow_storage = slow_storage;
        self
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Rebuilds in-memory state from storage. A stored cursor that disagrees
    /// with the item list is healed from the items.
    #[instrument(skip(self), target = "registry")]
    pub async fn restore(&self) -> DeskResult<usize> {
        let _admin = self.admin.lock().await;

        let batches = warn_if_slow("db_load_batches", self.slow_storage, self.repo.load_all())
            .await
            .context("failed to load batches")?;

        let mut slots = BTreeMap::new();
        for mut b in batches {
            let stored = b.current_number;
            b.recompute_cursor();
            if stored != b.current_number {
                warn!(
                    batch_code = %b.code,
                    stored,
                    derived = b.current_number,
                    "stored cursor drifted from item list; using derived value"
                );
            }
            let stored_status = b.status;
            b.settle_status();
            if stored_status != b.status {
                warn!(
                    batch_code = %b.code,
                    stored = %stored_status,
                    derived = %b.status,
                    "stored batch status disagrees with item list; using derived value"
                );
            }
            slots.insert(b.code.clone(), slot_for(b));
        }

        let count = slots.len();
        *self.slots.write() = slots;

        info!(count, "batch registry restored");
        Ok(count)
    }

    #[instrument(
        skip(self, req),
        target = "registry",
        fields(batch_code = %req.code, start = req.start, end = req.end)
    )]
    pub async fn create_batch(&self, req: NewBatch) -> DeskResult<BatchSummary> {
        self.validate_new(&req)?;

        let _admin = self.admin.lock().await;

        if self.slots.read().contains_key(&req.code) {
            return Err(DeskError::Conflict(format!(
                "batch code {} already exists",
                req.code
            )));
        }

        let conflicts = self.overlapping(req.start, req.end);
        if !conflicts.is_empty() {
            warn!(conflicts = ?conflicts, "rejected overlapping batch range");
            return Err(DeskError::Conflict(format!(
                "range {}-{} overlaps existing batch(es): {}",
                req.start,
                req.end,
                conflicts.join(", ")
            )));
        }

        let batch = Batch::from_new(&req, time::now());

        warn_if_slow("db_insert_batch", self.slow_storage, self.repo.insert_batch(&batch))
            .await
            .with_context(|| format!("failed to persist batch {}", batch.code))?;

        let summary = batch.summary();
        self.slots
            .write()
            .insert(batch.code.clone(), slot_for(batch));

        info!(
            total_numbers = summary.stats.total_numbers,
            status = %summary.status,
            "batch created"
        );
        Ok(summary)
    }

    fn validate_new(&self, req: &NewBatch) -> DeskResult<()> {
        if req.code.trim().is_empty() {
            return Err(DeskError::Validation("batch code is required".into()));
        }
        if req.assigned_to.trim().is_empty() {
            return Err(DeskError::Validation("assignedTo is required".into()));
        }
        if req.end <= req.start {
            return Err(DeskError::Validation(format!(
                "end number {} must be greater than start number {}",
                req.end, req.start
            )));
        }
        if req.end >= i64::MAX as u64 {
            return Err(DeskError::Validation(format!(
                "end number {} is out of range",
                req.end
            )));
        }
        let size = req.end - req.start + 1;
        if size > self.max_batch_size {
            return Err(DeskError::Validation(format!(
                "batch spans {size} numbers; the limit is {}",
                self.max_batch_size
            )));
        }
        if let Some(current) = req.current {
            if current < req.start || current > req.end + 1 {
                return Err(DeskError::Validation(format!(
                    "current number {current} must lie within {}-{}",
                    req.start,
                    req.end + 1
                )));
            }
        }
        if req.status == BatchStatus::Completed {
            return Err(DeskError::Validation(
                "a batch cannot be created as completed".into(),
            ));
        }
        Ok(())
    }

    /// Codes of every batch whose range intersects `[start, end]`.
    fn overlapping(&self, start: u64, end: u64) -> Vec<String> {
        self.slots
            .read()
            .iter()
            .filter(|(_, s)| start <= s.end && s.start <= end)
            .map(|(code, _)| code.clone())
            .collect()
    }

    fn cell(&self, code: &str) -> DeskResult<Arc<Mutex<Batch>>> {
        self.slots
            .read()
            .get(code)
            .map(|s| s.cell.clone())
            .ok_or_else(|| DeskError::NotFound(format!("batch {code}")))
    }

    pub async fn batch(&self, code: &str) -> DeskResult<BatchSummary> {
        let cell = self.cell(code)?;
        let b = cell.lock().await;
        Ok(b.summary())
    }

    pub async fn stats(&self, code: &str) -> DeskResult<BatchStats> {
        let cell = self.cell(code)?;
        let b = cell.lock().await;
        Ok(b.stats())
    }

    /// Full item list of a batch (cloned under the batch lock).
    pub async fn items(&self, code: &str) -> DeskResult<Vec<OrItem>> {
        let cell = self.cell(code)?;
        let b = cell.lock().await;
        Ok(b.items.clone())
    }

    /// Current state of one number; always reflects the latest committed write.
    pub async fn item(&self, code: &str, or_number: u64) -> DeskResult<OrItem> {
        let cell = self.cell(code)?;
        let b = cell.lock().await;
        b.item(or_number).cloned().ok_or_else(|| {
            DeskError::NotFound(format!("OR {} in batch {code}", b.label(or_number)))
        })
    }

    /// Snapshot of one number together with its batch's counters.
    pub async fn ticket(&self, code: &str, or_number: u64) -> DeskResult<OrTicket> {
        let cell = self.cell(code)?;
        let b = cell.lock().await;
        OrTicket::from_batch(&b, or_number).ok_or_else(|| {
            DeskError::NotFound(format!("OR {} in batch {code}", b.label(or_number)))
        })
    }

    pub async fn search(&self, filter: &BatchFilter) -> Vec<BatchSummary> {
        let cells: Vec<_> = self.ordered_slots(|_| true);
        let mut out = Vec::new();
        for slot in cells {
            let b = slot.cell.lock().await;
            if filter.matches(&b) {
                out.push(b.summary());
            }
        }
        out
    }

    pub async fn statistics(&self) -> RegistryStatistics {
        let mut st = RegistryStatistics::default();
        for slot in self.ordered_slots(|_| true) {
            let b = slot.cell.lock().await;
            let s = b.stats();
            st.total_batches += 1;
            match b.status {
                BatchStatus::Pending => st.pending += 1,
                BatchStatus::Active => st.active += 1,
                BatchStatus::Inactive => st.inactive += 1,
                BatchStatus::Completed => st.completed += 1,
                BatchStatus::Hold => st.hold += 1,
            }
            st.total_numbers += s.total_numbers;
            st.used_numbers += s.used_numbers;
            st.available_numbers += s.available_numbers;
        }
        st
    }

    /// Slots matching `pred`, ordered by range start.
    fn ordered_slots(&self, pred: impl Fn(&Slot) -> bool) -> Vec<Slot> {
        let mut v: Vec<Slot> = self
            .slots
            .read()
            .values()
            .filter(|s| pred(s))
            .cloned()
            .collect();
        v.sort_by_key(|s| s.start);
        v
    }

    /// Lowest available number across the user's active batches, batches
    /// taken in order of their range start.
    pub async fn next_available(&self, user: &str) -> DeskResult<NextOr> {
        for slot in self.ordered_slots(|s| s.assigned_to == user) {
            let b = slot.cell.lock().await;
            if b.status != BatchStatus::Active {
                continue;
            }
            if let Some(n) = b.first_available() {
                return Ok(NextOr {
                    batch_id: b.id,
                    batch_code: b.code.clone(),
                    or_number: n,
                    display: b.label(n),
                });
            }
        }
        Err(DeskError::InvalidState(format!(
            "no active batch with available numbers for {user}"
        )))
    }

    /// Issues the lowest available number of the user's first usable batch.
    #[instrument(skip(self), target = "registry", fields(batch_code, or_number))]
    pub async fn issue_next_for(
        &self,
        user: &str,
        payment_id: Option<Uuid>,
    ) -> DeskResult<OrTicket> {
        for slot in self.ordered_slots(|s| s.assigned_to == user) {
            let mut b = slot.cell.lock().await;
            if b.status != BatchStatus::Active {
                continue;
            }
            let Some(n) = b.first_available() else {
                continue;
            };
            let op = ItemOp::Issue {
                payment_id,
                issued_to: user.to_string(),
            };
            return self.apply_locked(&mut b, n, op).await;
        }
        Err(DeskError::InvalidState(format!(
            "no active batch with available numbers for {user}"
        )))
    }

    /// Issues the lowest available number of a specific batch.
    #[instrument(skip(self), target = "registry", fields(batch_code = %code, or_number))]
    pub async fn issue_next(
        &self,
        code: &str,
        payment_id: Option<Uuid>,
        issued_to: &str,
    ) -> DeskResult<OrTicket> {
        let cell = self.cell(code)?;
        let mut b = cell.lock().await;

        let Some(n) = b.first_available() else {
            return Err(DeskError::InvalidState(format!("batch {code} is exhausted")));
        };
        ensure_active(&b)?;

        let op = ItemOp::Issue {
            payment_id,
            issued_to: issued_to.to_string(),
        };
        self.apply_locked(&mut b, n, op).await
    }

    /// Issues a caller-chosen number (a payment referencing a printed receipt).
    #[instrument(skip(self), target = "registry", fields(batch_code = %code, or_number))]
    pub async fn issue_specific(
        &self,
        code: &str,
        or_number: u64,
        payment_id: Option<Uuid>,
        issued_to: &str,
    ) -> DeskResult<OrTicket> {
        let cell = self.cell(code)?;
        let mut b = cell.lock().await;

        if !b.contains(or_number) {
            return Err(DeskError::NotFound(format!(
                "OR {} is outside batch {code} ({}-{})",
                b.label(or_number),
                b.start_number,
                b.end_number
            )));
        }
        ensure_active(&b)?;

        let op = ItemOp::Issue {
            payment_id,
            issued_to: issued_to.to_string(),
        };
        self.apply_locked(&mut b, or_number, op).await
    }

    /// issued → cancelled. The cursor is never moved back.
    #[instrument(skip(self, reason), target = "registry", fields(batch_code = %code, or_number))]
    pub async fn cancel_or(
        &self,
        code: &str,
        or_number: u64,
        reason: &str,
        by: &str,
    ) -> DeskResult<OrTicket> {
        require_reason(reason)?;
        let op = ItemOp::Cancel {
            reason: reason.to_string(),
            by: by.to_string(),
        };
        self.apply(code, or_number, op).await
    }

    /// available/issued → voided, for numbers that must never be used.
    #[instrument(skip(self, reason), target = "registry", fields(batch_code = %code, or_number))]
    pub async fn void_or(
        &self,
        code: &str,
        or_number: u64,
        reason: &str,
        by: &str,
    ) -> DeskResult<OrTicket> {
        require_reason(reason)?;
        let op = ItemOp::Void {
            reason: reason.to_string(),
            by: by.to_string(),
        };
        self.apply(code, or_number, op).await
    }

    /// Compensation for a payment that failed after its number was issued.
    /// Only the payment that holds the number may hand it back.
    #[instrument(skip(self), target = "registry", fields(batch_code = %code, or_number))]
    pub async fn revert_issue(
        &self,
        code: &str,
        or_number: u64,
        payment_id: Uuid,
    ) -> DeskResult<OrTicket> {
        let op = ItemOp::Revert {
            payment_id: Some(payment_id),
            by: "system".to_string(),
        };
        self.apply(code, or_number, op).await
    }

    async fn apply(&self, code: &str, or_number: u64, op: ItemOp) -> DeskResult<OrTicket> {
        let cell = self.cell(code)?;
        let mut b = cell.lock().await;
        self.apply_locked(&mut b, or_number, op).await
    }

    /// Applies `op` under the caller-held batch lock and writes it through.
    async fn apply_locked(&self, b: &mut Batch, n: u64, op: ItemOp) -> DeskResult<OrTicket> {
        annotate_span(&b.code, Some(n));

        let undo = b.apply(n, &op, time::now())?;

        let persisted = {
            let item = b.item(n).cloned();
            let entry = b.usage_log.last().cloned();
            match (item, entry) {
                (Some(item), Some(entry)) => {
                    warn_if_slow(
                        "db_save_transition",
                        self.slow_storage,
                        self.repo.save_transition(b, &item, &entry),
                    )
                    .await
                }
                _ => Err(anyhow::anyhow!("transition left no item or log entry")),
            }
        };

        if let Err(e) = persisted {
            b.undo(undo);
            error!(
                batch_code = %b.code,
                or_number = n,
                error = ?e,
                "failed to persist OR transition; in-memory state rolled back"
            );
            return Err(DeskError::Storage(
                e.context(format!("persist OR {} of batch {}", b.label(n), b.code)),
            ));
        }

        match op {
            ItemOp::Issue { .. } => self.counters.inc(&self.counters.or_issued),
            ItemOp::Cancel { .. } => self.counters.inc(&self.counters.or_cancelled),
            ItemOp::Void { .. } => self.counters.inc(&self.counters.or_voided),
            ItemOp::Revert { .. } => self.counters.inc(&self.counters.or_reverted),
        }

        debug!(
            or_number = n,
            status = ?b.item(n).map(|i| i.status),
            current_number = b.current_number,
            batch_status = %b.status,
            "OR transition applied"
        );

        OrTicket::from_batch(b, n)
            .ok_or_else(|| DeskError::NotFound(format!("OR {} in batch {}", n, b.code)))
    }

    /// Admin status change. `completed` is only reached by exhaustion.
    #[instrument(skip(self), target = "registry", fields(batch_code = %code))]
    pub async fn update_status(&self, code: &str, status: BatchStatus) -> DeskResult<BatchSummary> {
        let cell = self.cell(code)?;
        let mut b = cell.lock().await;

        if status == BatchStatus::Completed {
            return Err(DeskError::InvalidState(
                "completed is reached only by exhausting the batch".into(),
            ));
        }
        if b.status == BatchStatus::Completed {
            return Err(DeskError::InvalidState(format!(
                "batch {code} is completed and cannot change status"
            )));
        }
        if status == BatchStatus::Active && b.first_available().is_none() {
            return Err(DeskError::InvalidState(format!(
                "batch {code} is exhausted"
            )));
        }
        if b.status == status {
            return Ok(b.summary());
        }

        let previous = (b.status, b.updated_at);
        b.status = status;
        b.updated_at = time::now();

        if let Err(e) = warn_if_slow("db_save_header", self.slow_storage, self.repo.save_header(&b)).await {
            (b.status, b.updated_at) = previous;
            return Err(DeskError::Storage(
                e.context(format!("persist status of batch {code}")),
            ));
        }

        info!(from = %previous.0, to = %status, "batch status changed");
        Ok(b.summary())
    }

    /// Deletes a batch that never issued a number and is not active.
    #[instrument(skip(self), target = "registry", fields(batch_code = %code))]
    pub async fn delete_batch(&self, code: &str) -> DeskResult<()> {
        let _admin = self.admin.lock().await;
        let cell = self.cell(code)?;
        let b = cell.lock().await;

        if b.current_number != b.start_number
            || b.items.iter().any(|it| it.status != OrStatus::Available)
        {
            return Err(DeskError::InvalidState(format!(
                "batch {code} has used numbers and cannot be deleted"
            )));
        }
        if b.status == BatchStatus::Active {
            return Err(DeskError::InvalidState(format!(
                "batch {code} is active; deactivate it first"
            )));
        }

        warn_if_slow("db_delete_batch", self.slow_storage, self.repo.delete_batch(&b.id))
            .await
            .with_context(|| format!("failed to delete batch {code}"))?;

        self.slots.write().remove(code);
        info!("batch deleted");
        Ok(())
    }
}

fn slot_for(batch: Batch) -> Slot {
    Slot {
        start: batch.start_number,
        end: batch.end_number,
        assigned_to: batch.assigned_to.clone(),
        cell: Arc::new(Mutex::new(batch)),
    }
}

fn ensure_active(b: &Batch) -> DeskResult<()> {
    if b.status != BatchStatus::Active {
        return Err(DeskError::InvalidState(format!(
            "batch {} is {}, not active",
            b.code, b.status
        )));
    }
    Ok(())
}

fn require_reason(reason: &str) -> DeskResult<()> {
    if reason.trim().is_empty() {
        return Err(DeskError::Validation("a reason is required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Accepts every write, or fails transitions once `fail` is set.
    #[derive(Default)]
    struct FlakyRepo {
        fail: AtomicBool,
    }

    #[async_trait]
    impl BatchRepository for FlakyRepo {
        async fn load_all(&self) -> anyhow::Result<Vec<Batch>> {
            Ok(vec![])
        }
        async fn insert_batch(&self, _: &Batch) -> anyhow::Result<()> {
            Ok(())
        }
        async fn save_transition(
            &self,
            _: &Batch,
            _: &OrItem,
            _: &crate::batch::model::UsageEntry,
        ) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                Err(anyhow::anyhow!("Database Offline"))
            } else {
                Ok(())
            }
        }
        async fn save_header(&self, _: &Batch) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_batch(&self, _: &Uuid) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn mk_new(code: &str, start: u64, end: u64) -> NewBatch {
        NewBatch {
            code: code.into(),
            prefix: "OR-".into(),
            start,
            end,
            current: None,
            assigned_to: "Cashier1".into(),
            entry_by: "admin".into(),
            status: BatchStatus::Active,
            notes: None,
        }
    }

    #[tokio::test]
    async fn failed_write_rolls_back_memory() {
        let repo = Arc::new(FlakyRepo::default());
        let reg = BatchRegistry::new(repo.clone(), Counters::default());
        reg.create_batch(mk_new("BATCH-A", 1, 5)).await.unwrap();

        repo.fail.store(true, Ordering::SeqCst);
        let err = reg.issue_next("BATCH-A", None, "Cashier1").await.unwrap_err();
        assert!(err.is_storage());
        assert!(format!("{err:?}").contains("Database Offline"));

        let summary = reg.batch("BATCH-A").await.unwrap();
        assert_eq!(summary.current_number, 1);
        assert_eq!(summary.stats.available_numbers, 5);
        assert_eq!(reg.item("BATCH-A", 1).await.unwrap().status, OrStatus::Available);

        repo.fail.store(false, Ordering::SeqCst);
        let t = reg.issue_next("BATCH-A", None, "Cashier1").await.unwrap();
        assert_eq!(t.or_number, 1);
    }

    #[tokio::test]
    async fn validation_rejects_bad_ranges() {
        let reg = BatchRegistry::new(Arc::new(FlakyRepo::default()), Counters::default());

        let err = reg.create_batch(mk_new("X", 5, 5)).await.unwrap_err();
        assert!(matches!(err, DeskError::Validation(_)));

        let mut req = mk_new("X", 1, 5);
        req.current = Some(7);
        let err = reg.create_batch(req).await.unwrap_err();
        assert!(matches!(err, DeskError::Validation(_)));

        let reg = reg.with_limits(10, Duration::from_millis(100));
        let err = reg.create_batch(mk_new("X", 1, 11)).await.unwrap_err();
        assert!(matches!(err, DeskError::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_code_is_conflict() {
        let reg = BatchRegistry::new(Arc::new(FlakyRepo::default()), Counters::default());
        reg.create_batch(mk_new("BATCH-A", 1, 5)).await.unwrap();
        let err = reg.create_batch(mk_new("BATCH-A", 10, 15)).await.unwrap_err();
        assert!(matches!(err, DeskError::Conflict(m) if m.contains("BATCH-A")));
    }

    #[tokio::test]
    async fn overlap_error_names_every_conflict() {
        let reg = BatchRegistry::new(Arc::new(FlakyRepo::default()), Counters::default());
        reg.create_batch(mk_new("BATCH-A", 1, 5)).await.unwrap();
        reg.create_batch(mk_new("BATCH-C", 10, 15)).await.unwrap();

        let err = reg.create_batch(mk_new("BATCH-B", 4, 12)).await.unwrap_err();
        match err {
            DeskError::Conflict(m) => {
                assert!(m.contains("BATCH-A"), "{m}");
                assert!(m.contains("BATCH-C"), "{m}");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_rules() {
        let reg = BatchRegistry::new(Arc::new(FlakyRepo::default()), Counters::default());
        let mut req = mk_new("BATCH-A", 1, 2);
        req.status = BatchStatus::Pending;
        reg.create_batch(req).await.unwrap();

        let err = reg.issue_next("BATCH-A", None, "c").await.unwrap_err();
        assert!(matches!(err, DeskError::InvalidState(_)));

        let err = reg
            .update_status("BATCH-A", BatchStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::InvalidState(_)));

        reg.update_status("BATCH-A", BatchStatus::Active).await.unwrap();
        reg.issue_next("BATCH-A", None, "c").await.unwrap();
        reg.issue_next("BATCH-A", None, "c").await.unwrap();

        let s = reg.batch("BATCH-A").await.unwrap();
        assert_eq!(s.status, BatchStatus::Completed);

        let err = reg
            .update_status("BATCH-A", BatchStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::InvalidState(_)));
    }

    #[tokio::test]
    async fn delete_rules() {
        let reg = BatchRegistry::new(Arc::new(FlakyRepo::default()), Counters::default());
        reg.create_batch(mk_new("BATCH-A", 1, 5)).await.unwrap();

        let err = reg.delete_batch("BATCH-A").await.unwrap_err();
        assert!(matches!(err, DeskError::InvalidState(m) if m.contains("active")));

        reg.update_status("BATCH-A", BatchStatus::Inactive).await.unwrap();
        reg.delete_batch("BATCH-A").await.unwrap();
        assert!(matches!(
            reg.batch("BATCH-A").await.unwrap_err(),
            DeskError::NotFound(_)
        ));

        // Range is free again.
        reg.create_batch(mk_new("BATCH-B", 3, 8)).await.unwrap();
    }

    #[tokio::test]
    async fn delete_refused_after_use() {
        let reg = BatchRegistry::new(Arc::new(FlakyRepo::default()), Counters::default());
        reg.create_batch(mk_new("BATCH-A", 1, 5)).await.unwrap();
        reg.issue_next("BATCH-A", None, "c").await.unwrap();
        reg.update_status("BATCH-A", BatchStatus::Hold).await.unwrap();

        let err = reg.delete_batch("BATCH-A").await.unwrap_err();
        assert!(matches!(err, DeskError::InvalidState(m) if m.contains("used")));
    }
}
