//! Payment creation.
//!
//! A payment touches two aggregates: the batch (its OR number) and the payable
//! ledger. Storage offers no transaction across them, so creation runs as a
//! saga:
//!
//! 1. plan: look up every ledger line, clamp discounts, mark missing lines skipped
//! 2. issue the OR number (per-batch lock; a taken number fails here, before any
//!    ledger write)
//! 3. apply ledger credits
//! 4. persist the payment
//!
//! A failure in 3 or 4 reverses the credits already applied and reverts the OR
//! issuance. If a compensation step itself fails, the attempt is logged with
//! enough context for manual reconciliation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::logger::child_span;
use rust_decimal::Decimal;
use tracing::{Instrument, Span, error, field, info, instrument, warn};
use uuid::Uuid;

use crate::batch::registry::BatchRegistry;
use crate::error::{DeskError, DeskResult};
use crate::ledger::{LedgerFamily, LedgerLine, PayableLedger, ReceiptLink};
use crate::logger::warn_if_slow;
use crate::metrics::counters::Counters;
use crate::payment::model::{
    AMOUNT_TOLERANCE, AllocationLine, AllocationReport, AllocationRequest, DiscountAdjustment,
    NewPayment, Payment, PaymentAmendment, PaymentFilter, PaymentOutcome, PaymentStatus,
    SkippedLine,
};
use crate::payment::repository::PaymentRepository;
use crate::time;

pub struct PaymentAllocator {
    registry: Arc<BatchRegistry>,
    ledger: Arc<dyn PayableLedger>,
    payments: Arc<dyn PaymentRepository>,
    counters: Counters,
    slow_storage: Duration,
}

impl PaymentAllocator {
    pub fn new(
        registry: Arc<BatchRegistry>,
        ledger: Arc<dyn PayableLedger>,
        payments: Arc<dyn PaymentRepository>,
        counters: Counters,
    ) -> Self {
        Self {
            registry,
            ledger,
            payments,
            counters,
            slow_storage: Duration::from_millis(100),
        }
    }

    pub fn with_slow_storage(mut self, slow_storage: Duration) -> Self {
        self.slow_storage = slow_storage;
        self
    }

    #[instrument(
        skip(self, req),
        target = "allocator",
        fields(batch_code = %req.batch_code, or_number = req.or_number, payment_id)
    )]
    pub async fn create_payment(&self, req: NewPayment) -> DeskResult<PaymentOutcome> {
        if let Some(existing) = self.lookup_or(&req.batch_code, req.or_number).await? {
            return Err(DeskError::Conflict(format!(
                "OR {} of batch {} is already referenced by payment {}",
                req.or_number, req.batch_code, existing.id
            )));
        }

        validate(&req)?;

        let (allocation, mut report) = self.plan(req.kind, &req.lines).await?;
        if !allocation.iter().any(|l| l.credited) {
            return Err(DeskError::Validation(format!(
                "none of the allocation lines match a {} ledger line",
                req.kind
            )));
        }

        let now = time::now();
        let mut payment = Payment {
            id: Uuid::new_v4(),
            client_id: req.client_id,
            payor: req.payor,
            batch_code: req.batch_code,
            or_number: req.or_number,
            kind: req.kind,
            total_amount: allocation.iter().map(|l| l.amount).sum(),
            allocation,
            status: PaymentStatus::Paid,
            payment_date: req.payment_date.unwrap_or(now),
            notes: req.notes,
            entry_by: req.entry_by,
            cancelled_at: None,
            cancelled_by: None,
            cancel_reason: None,
            created_at: now,
        };
        Span::current().record("payment_id", field::display(payment.id));

        let ticket = self
            .registry
            .issue_specific(
                &payment.batch_code,
                payment.or_number,
                Some(payment.id),
                &payment.entry_by,
            )
            .await?;

        let receipt = ReceiptLink {
            batch_code: payment.batch_code.clone(),
            or_number: payment.or_number,
            payment_id: payment.id,
        };

        let to_credit: Vec<usize> = (0..payment.allocation.len())
            .filter(|&i| payment.allocation[i].credited)
            .collect();
        let mut applied: Vec<usize> = Vec::with_capacity(to_credit.len());
        for i in to_credit {
            let (code, amount, planned) = {
                let line = &payment.allocation[i];
                (line.code.clone(), line.amount, line.discount)
            };
            let credited = warn_if_slow(
                "ledger_apply_credit",
                self.slow_storage,
                self.ledger
                    .apply_credit(payment.kind, &code, amount, planned, &receipt),
            )
            .await;

            match credited {
                Ok(credit) => {
                    let line = &mut payment.allocation[i];
                    line.is_paid_full = credit.line.remaining.is_zero();
                    if credit.discount != planned {
                        warn!(
                            line_code = %code,
                            planned = %planned,
                            applied = %credit.discount,
                            "discount clamped against a newer ledger balance"
                        );
                        line.discount = credit.discount;
                        report.record_adjustment(&code, planned, credit.discount);
                    }
                    applied.push(i);
                }
                Err(e) => {
                    let err = DeskError::Storage(e.context(format!("credit ledger line {code}")));
                    let done = lines_at(&payment, &applied);
                    self.compensate(&payment, &done, &err)
                        .instrument(child_span("compensate"))
                        .await;
                    return Err(err);
                }
            }
        }

        let stored = warn_if_slow(
            "db_insert_payment",
            self.slow_storage,
            self.payments.insert(&payment),
        )
        .await;
        if let Err(e) = stored {
            let err = DeskError::Storage(e.context(format!("persist payment {}", payment.id)));
            let done = lines_at(&payment, &applied);
            self.compensate(&payment, &done, &err)
                .instrument(child_span("compensate"))
                .await;
            return Err(err);
        }

        self.counters.inc(&self.counters.payments_created);
        self.counters
            .add(&self.counters.lines_skipped, report.skipped.len() as u64);
        self.counters
            .add(&self.counters.discounts_clamped, report.adjusted.len() as u64);

        info!(
            total_amount = %payment.total_amount,
            updated = report.updated.len(),
            skipped = report.skipped.len(),
            adjusted = report.adjusted.len(),
            "payment created"
        );

        Ok(PaymentOutcome {
            payment,
            ticket,
            report,
        })
    }

    /// Looks up each requested line and settles what will actually be
    /// credited. Missing ledger lines are skipped, not fatal.
    async fn plan(
        &self,
        kind: LedgerFamily,
        lines: &[AllocationRequest],
    ) -> DeskResult<(Vec<AllocationLine>, AllocationReport)> {
        let mut allocation = Vec::with_capacity(lines.len());
        let mut report = AllocationReport::default();

        for req in lines {
            let found = warn_if_slow(
                "ledger_find_line",
                self.slow_storage,
                self.ledger.find_by_code(kind, &req.code),
            )
            .await
            .map_err(|e| DeskError::Storage(e.context(format!("look up ledger line {}", req.code))))?;

            let planned = plan_line(kind, req, found.as_ref());
            match &planned.outcome {
                LineOutcome::Credit => report.updated.push(req.code.clone()),
                LineOutcome::Clamped(adj) => {
                    report.updated.push(req.code.clone());
                    report.adjusted.push(adj.clone());
                }
                LineOutcome::Skipped(reason) => {
                    warn!(line_code = %req.code, %reason, "allocation line skipped");
                    report.skipped.push(SkippedLine {
                        code: req.code.clone(),
                        reason: reason.clone(),
                    });
                }
            }
            allocation.push(planned.line);
        }

        Ok((allocation, report))
    }

    /// Undoes a partially applied payment: reverses `applied` credits newest
    /// first, then hands the OR number back.
    async fn compensate(&self, payment: &Payment, applied: &[&AllocationLine], cause: &DeskError) {
        self.counters.inc(&self.counters.compensations);
        let mut clean = true;

        for line in applied.iter().rev() {
            let reversed = self
                .ledger
                .reverse_credit(payment.kind, &line.code, line.amount, line.discount)
                .await;
            if let Err(e) = reversed {
                clean = false;
                error!(
                    batch_code = %payment.batch_code,
                    or_number = payment.or_number,
                    payment_id = %payment.id,
                    line_code = %line.code,
                    amount = %line.amount,
                    discount = %line.discount,
                    at = %time::now(),
                    error = ?e,
                    "compensation could not reverse ledger credit"
                );
            }
        }

        let reverted = self
            .registry
            .revert_issue(&payment.batch_code, payment.or_number, payment.id)
            .await;
        if let Err(e) = reverted {
            clean = false;
            error!(
                batch_code = %payment.batch_code,
                or_number = payment.or_number,
                payment_id = %payment.id,
                at = %time::now(),
                error = %e,
                "compensation could not revert OR issuance"
            );
        }

        if clean {
            error!(
                batch_code = %payment.batch_code,
                or_number = payment.or_number,
                payment_id = %payment.id,
                at = %time::now(),
                cause = %cause,
                reversed_lines = applied.len(),
                "payment attempt failed; credits reversed and OR returned"
            );
        } else {
            self.counters.inc(&self.counters.reconciliation_needed);
            error!(
                batch_code = %payment.batch_code,
                or_number = payment.or_number,
                payment_id = %payment.id,
                at = %time::now(),
                cause = %cause,
                "payment attempt left partial state; manual reconciliation required"
            );
        }
    }

    async fn lookup_or(&self, batch_code: &str, or_number: u64) -> DeskResult<Option<Payment>> {
        let found = warn_if_slow(
            "db_find_payment",
            self.slow_storage,
            self.payments.find_by_or(batch_code, or_number),
        )
        .await
        .map_err(|e| DeskError::Storage(e.context(format!("look up OR {or_number} of {batch_code}"))))?;
        Ok(found)
    }

    pub async fn find_by_or(&self, batch_code: &str, or_number: u64) -> DeskResult<Payment> {
        self.lookup_or(batch_code, or_number).await?.ok_or_else(|| {
            DeskError::NotFound(format!("payment for OR {or_number} of batch {batch_code}"))
        })
    }

    pub async fn find_payment(&self, id: &Uuid) -> DeskResult<Payment> {
        self.payments
            .find_by_id(id)
            .await
            .map_err(|e| DeskError::Storage(e.context(format!("look up payment {id}"))))?
            .ok_or_else(|| DeskError::NotFound(format!("payment {id}")))
    }

    pub async fn search_payments(&self, filter: &PaymentFilter) -> DeskResult<Vec<Payment>> {
        let found = self
            .payments
            .search(filter)
            .await
            .map_err(|e| DeskError::Storage(e.context("search payments")))?;
        Ok(found)
    }

    /// Edits payor/notes. Allocation and amounts never change once persisted.
    #[instrument(skip(self, change), target = "allocator", fields(payment_id = %id))]
    pub async fn amend_payment(&self, id: &Uuid, change: PaymentAmendment) -> DeskResult<Payment> {
        let mut payment = self.find_payment(id).await?;
        if payment.status == PaymentStatus::Cancelled {
            return Err(DeskError::InvalidState(format!(
                "payment {id} is cancelled and cannot be amended"
            )));
        }

        if let Some(payor) = change.payor {
            if payor.trim().is_empty() {
                return Err(DeskError::Validation("payor cannot be blank".into()));
            }
            payment.payor = payor;
        }
        if let Some(notes) = change.notes {
            payment.notes = Some(notes).filter(|n| !n.trim().is_empty());
        }

        self.payments
            .update_details(&payment)
            .await
            .map_err(|e| DeskError::Storage(e.context(format!("amend payment {id}"))))?;

        info!("payment amended");
        Ok(payment)
    }
}

enum LineOutcome {
    Credit,
    Clamped(DiscountAdjustment),
    Skipped(String),
}

struct PlannedLine {
    line: AllocationLine,
    outcome: LineOutcome,
}

fn lines_at<'a>(payment: &'a Payment, idx: &[usize]) -> Vec<&'a AllocationLine> {
    idx.iter().map(|&i| &payment.allocation[i]).collect()
}

/// Settles one requested line against the ledger line it names.
///
/// Billing: a discount that would push `amount + discount` past the remaining
/// balance is lowered so the two meet exactly; it never goes below zero.
/// Misc: discounts do not apply. The ledger repeats the clamp at write time.
fn plan_line(kind: LedgerFamily, req: &AllocationRequest, found: Option<&LedgerLine>) -> PlannedLine {
    let mut line = AllocationLine {
        code: req.code.clone(),
        description: req.description.clone(),
        amount: req.amount,
        discount: req.discount,
        is_paid_full: false,
        credited: false,
    };

    let Some(ledger) = found else {
        return PlannedLine {
            line,
            outcome: LineOutcome::Skipped(format!("no {kind} ledger line with code {}", req.code)),
        };
    };

    if line.description.is_empty() {
        line.description = ledger.description.clone();
    }

    let applied = ledger.allowed_discount(req.amount, req.discount);

    line.discount = applied;
    line.credited = true;
    line.is_paid_full = ledger.credit_value(line.amount, line.discount) >= ledger.remaining;

    let outcome = if applied != req.discount {
        LineOutcome::Clamped(DiscountAdjustment {
            code: req.code.clone(),
            requested: req.discount,
            applied,
        })
    } else {
        LineOutcome::Credit
    };

    PlannedLine { line, outcome }
}

fn validate(req: &NewPayment) -> DeskResult<()> {
    for (field, value) in [
        ("clientId", &req.client_id),
        ("payor", &req.payor),
        ("batchCode", &req.batch_code),
        ("entryBy", &req.entry_by),
    ] {
        if value.trim().is_empty() {
            return Err(DeskError::Validation(format!("{field} is required")));
        }
    }

    if req.lines.is_empty() {
        return Err(DeskError::Validation(
            "a payment needs at least one allocation line".into(),
        ));
    }

    let mut seen = HashSet::new();
    for line in &req.lines {
        if line.code.trim().is_empty() {
            return Err(DeskError::Validation("allocation line code is required".into()));
        }
        if !seen.insert(line.code.as_str()) {
            return Err(DeskError::Validation(format!(
                "allocation line {} appears more than once",
                line.code
            )));
        }
        if line.amount < Decimal::ZERO || line.discount < Decimal::ZERO {
            return Err(DeskError::Validation(format!(
                "allocation line {} has a negative amount or discount",
                line.code
            )));
        }
        if (line.amount + line.discount).is_zero() {
            return Err(DeskError::Validation(format!(
                "allocation line {} credits nothing",
                line.code
            )));
        }
    }

    let sum: Decimal = req.lines.iter().map(|l| l.amount).sum();
    if (sum - req.total_amount).abs() > AMOUNT_TOLERANCE {
        return Err(DeskError::Validation(format!(
            "allocation lines sum to {sum} but the total amount is {}",
            req.total_amount
        )));
    }

    Ok(())
}
