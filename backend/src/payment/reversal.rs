//! Payment cancellation.
//!
//! Order: reverse ledger credits → tombstone the payment → cancel the OR
//! number. Cancelling the number is terminal, so it goes last; a failure in
//! any earlier step re-applies whatever was already reversed.

use std::sync::Arc;
use std::time::Duration;

use common::logger::child_span;
use tokio::sync::Mutex;
use tracing::{Instrument, error, info, instrument, warn};

use crate::batch::item::OrStatus;
use crate::batch::registry::BatchRegistry;
use crate::error::{DeskError, DeskResult};
use crate::ledger::{LedgerLine, PayableLedger, ReceiptLink};
use crate::logger::warn_if_slow;
use crate::metrics::counters::Counters;
use crate::payment::model::{AllocationLine, CancellationOutcome, Payment, PaymentStatus};
use crate::payment::repository::PaymentRepository;
use crate::time;

pub struct ReversalEngine {
    registry: Arc<BatchRegistry>,
    ledger: Arc<dyn PayableLedger>,
    payments: Arc<dyn PaymentRepository>,
    counters: Counters,
    slow_storage: Duration,
    /// Serializes cancellations so a payment is never reversed twice.
    guard: Mutex<()>,
}

impl ReversalEngine {
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
            guard: Mutex::new(()),
        }
    }

    pub fn with_slow_storage(mut self, slow_storage: Duration) -> Self {
        self.slow_storage = slow_storage;
        self
    }

    #[instrument(
        skip(self, reason),
        target = "reversal",
        fields(payment_id)
    )]
    pub async fn cancel_payment(
        &self,
        batch_code: &str,
        or_number: u64,
        reason: &str,
        by: &str,
    ) -> DeskResult<CancellationOutcome> {
        if reason.trim().is_empty() {
            return Err(DeskError::Validation("a cancellation reason is required".into()));
        }
        if by.trim().is_empty() {
            return Err(DeskError::Validation("cancelledBy is required".into()));
        }

        let _guard = self.guard.lock().await;

        let mut payment = self
            .payments
            .find_by_or(batch_code, or_number)
            .await
            .map_err(|e| DeskError::Storage(e.context("look up payment to cancel")))?
            .ok_or_else(|| {
                DeskError::NotFound(format!("payment for OR {or_number} of batch {batch_code}"))
            })?;
        tracing::Span::current().record("payment_id", tracing::field::display(payment.id));

        if payment.status == PaymentStatus::Cancelled {
            return Err(DeskError::InvalidState(format!(
                "payment {} is already cancelled",
                payment.id
            )));
        }

        let item = self.registry.item(batch_code, or_number).await?;
        let retire_or = match item.status {
            OrStatus::Issued => true,
            OrStatus::Cancelled | OrStatus::Voided => {
                warn!(status = %item.status, "OR already retired; cancelling payment only");
                false
            }
            other => {
                return Err(DeskError::InvalidState(format!(
                    "OR {or_number} of batch {batch_code} is {other}; payment {} cannot be reversed",
                    payment.id
                )));
            }
        };

        // 1. ledger
        let mut reversed_lines: Vec<LedgerLine> = Vec::new();
        let mut undone: Vec<&AllocationLine> = Vec::new();
        for line in payment.credited_lines() {
            let reversed = warn_if_slow(
                "ledger_reverse_credit",
                self.slow_storage,
                self.ledger
                    .reverse_credit(payment.kind, &line.code, line.amount, line.discount),
            )
            .await;
            match reversed {
                Ok(l) => {
                    reversed_lines.push(l);
                    undone.push(line);
                }
                Err(e) => {
                    let err = DeskError::Storage(
                        e.context(format!("reverse credit on ledger line {}", line.code)),
                    );
                    self.reapply(&payment, &undone)
                        .instrument(child_span("reapply"))
                        .await;
                    return Err(err);
                }
            }
        }
        let undone: Vec<AllocationLine> = undone.into_iter().cloned().collect();

        // 2. tombstone
        let before = payment.clone();
        payment.status = PaymentStatus::Cancelled;
        payment.cancelled_at = Some(time::now());
        payment.cancelled_by = Some(by.to_string());
        payment.cancel_reason = Some(reason.to_string());

        let stored = warn_if_slow(
            "db_update_payment",
            self.slow_storage,
            self.payments.update_status(&payment),
        )
        .await;
        if let Err(e) = stored {
            let err = DeskError::Storage(e.context(format!("tombstone payment {}", payment.id)));
            self.reapply(&before, &undone.iter().collect::<Vec<_>>())
                .instrument(child_span("reapply"))
                .await;
            return Err(err);
        }

        // 3. OR number
        let ticket = if retire_or {
            match self.registry.cancel_or(batch_code, or_number, reason, by).await {
                Ok(t) => t,
                Err(err) => {
                    if let Err(e) = self.payments.update_status(&before).await {
                        self.counters.inc(&self.counters.reconciliation_needed);
                        error!(
                            batch_code,
                            or_number,
                            payment_id = %before.id,
                            at = %time::now(),
                            error = ?e,
                            "could not restore payment status after failed OR cancel"
                        );
                    }
                    self.reapply(&before, &undone.iter().collect::<Vec<_>>())
                        .instrument(child_span("reapply"))
                        .await;
                    return Err(err);
                }
            }
        } else {
            self.registry.ticket(batch_code, or_number).await?
        };

        self.counters.inc(&self.counters.payments_cancelled);
        info!(
            reversed = reversed_lines.len(),
            reason, by, "payment cancelled"
        );

        Ok(CancellationOutcome {
            payment,
            ticket,
            reversed: reversed_lines,
        })
    }

    /// Re-applies credits reversed by a cancellation that then failed.
    async fn reapply(&self, payment: &Payment, lines: &[&AllocationLine]) {
        self.counters.inc(&self.counters.compensations);
        let receipt = ReceiptLink {
            batch_code: payment.batch_code.clone(),
            or_number: payment.or_number,
            payment_id: payment.id,
        };

        for line in lines {
            let res = self
                .ledger
                .apply_credit(payment.kind, &line.code, line.amount, line.discount, &receipt)
                .await;
            match res {
                Ok(credit) if credit.discount != line.discount => {
                    self.counters.inc(&self.counters.reconciliation_needed);
                    error!(
                        batch_code = %payment.batch_code,
                        or_number = payment.or_number,
                        payment_id = %payment.id,
                        line_code = %line.code,
                        recorded = %line.discount,
                        applied = %credit.discount,
                        at = %time::now(),
                        "re-applied discount differs from the recorded one; manual reconciliation required"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    self.counters.inc(&self.counters.reconciliation_needed);
                    error!(
                        batch_code = %payment.batch_code,
                        or_number = payment.or_number,
                        payment_id = %payment.id,
                        line_code = %line.code,
                        at = %time::now(),
                        error = ?e,
                        "could not re-apply ledger credit after failed cancellation; manual reconciliation required"
                    );
                }
            }
        }

        error!(
            batch_code = %payment.batch_code,
            or_number = payment.or_number,
            payment_id = %payment.id,
            at = %time::now(),
            restored_lines = lines.len(),
            "payment cancellation failed; reversed credits re-applied"
        );
    }
}
