//! Request-level facade over the registry, allocator and reversal engine.
//!
//! Each method is one desk operation: it opens a request span with a fresh
//! trace id, runs the operation and wraps the outcome in an [`Envelope`].
//! Transport framing (HTTP routes, auth) sits outside this crate.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::logger::{TraceId, request_span};
use tracing::{Instrument, error, warn};
use uuid::Uuid;

use crate::api::envelope::Envelope;
use crate::batch::item::OrItem;
use crate::batch::model::{
    BatchFilter, BatchStats, BatchStatus, BatchSummary, NewBatch, NextOr, OrTicket,
    RegistryStatistics,
};
use crate::batch::registry::BatchRegistry;
use crate::error::DeskResult;
use crate::ledger::PayableLedger;
use crate::metrics::counters::CountersSnapshot;
use crate::payment::allocator::PaymentAllocator;
use crate::payment::model::{
    CancellationOutcome, NewPayment, Payment, PaymentAmendment, PaymentFilter, PaymentOutcome,
};
use crate::payment::repository::PaymentRepository;
use crate::payment::reversal::ReversalEngine;

pub struct CashierDesk {
    registry: Arc<BatchRegistry>,
    allocator: PaymentAllocator,
    reversal: ReversalEngine,
}

impl CashierDesk {
    /// Wires the allocator and reversal engine to `registry`, sharing its
    /// counters.
    pub fn new(
        registry: Arc<BatchRegistry>,
        ledger: Arc<dyn PayableLedger>,
        payments: Arc<dyn PaymentRepository>,
        slow_storage: Duration,
    ) -> Self {
        let counters = registry.counters().clone();
        let allocator = PaymentAllocator::new(
            registry.clone(),
            ledger.clone(),
            payments.clone(),
            counters.clone(),
        )
        .with_slow_storage(slow_storage);
        let reversal = ReversalEngine::new(registry.clone(), ledger, payments, counters)
            .with_slow_storage(slow_storage);

        Self {
            registry,
            allocator,
            reversal,
        }
    }

    pub fn registry(&self) -> &Arc<BatchRegistry> {
        &self.registry
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.registry.counters().snapshot()
    }

    async fn run<T, F>(&self, operation: &'static str, message: &str, fut: F) -> Envelope<T>
    where
        F: Future<Output = DeskResult<T>>,
    {
        let trace_id = TraceId::new();
        let span = request_span(operation, &trace_id);
        let res = fut.instrument(span.clone()).await;

        if let Err(e) = &res {
            span.in_scope(|| {
                if e.is_storage() {
                    error!(code = e.code(), error = ?e, "request failed");
                } else {
                    warn!(code = e.code(), error = %e, "request rejected");
                }
            });
        }
        Envelope::from_result(res, message)
    }

    /* =========================
    Batches
    ========================= */

    pub async fn create_batch(&self, req: NewBatch) -> Envelope<BatchSummary> {
        self.run("create_batch", "batch created", self.registry.create_batch(req))
            .await
    }

    pub async fn get_batch(&self, code: &str) -> Envelope<BatchSummary> {
        self.run("get_batch", "batch found", self.registry.batch(code))
            .await
    }

    pub async fn batch_stats(&self, code: &str) -> Envelope<BatchStats> {
        self.run("batch_stats", "batch statistics", self.registry.stats(code))
            .await
    }

    pub async fn batch_items(&self, code: &str) -> Envelope<Vec<OrItem>> {
        self.run("batch_items", "batch items", self.registry.items(code))
            .await
    }

    pub async fn or_status(&self, code: &str, or_number: u64) -> Envelope<OrItem> {
        self.run("or_status", "OR status", self.registry.item(code, or_number))
            .await
    }

    pub async fn search_batches(&self, filter: BatchFilter) -> Envelope<Vec<BatchSummary>> {
        self.run("search_batches", "batches", async {
            Ok(self.registry.search(&filter).await)
        })
        .await
    }

    pub async fn statistics(&self) -> Envelope<RegistryStatistics> {
        self.run("statistics", "registry statistics", async {
            Ok(self.registry.statistics().await)
        })
        .await
    }

    pub async fn update_batch_status(
        &self,
        code: &str,
        status: BatchStatus,
    ) -> Envelope<BatchSummary> {
        self.run(
            "update_batch_status",
            "batch status updated",
            self.registry.update_status(code, status),
        )
        .await
    }

    pub async fn delete_batch(&self, code: &str) -> Envelope<()> {
        self.run("delete_batch", "batch deleted", self.registry.delete_batch(code))
            .await
    }

    /* =========================
    OR numbers
    ========================= */

    pub async fn next_available(&self, user: &str) -> Envelope<NextOr> {
        self.run("next_available", "next OR", self.registry.next_available(user))
            .await
    }

    pub async fn issue_next(&self, code: &str, issued_to: &str) -> Envelope<OrTicket> {
        self.run(
            "issue_next",
            "OR issued",
            self.registry.issue_next(code, None, issued_to),
        )
        .await
    }

    pub async fn issue_next_for(&self, user: &str) -> Envelope<OrTicket> {
        self.run(
            "issue_next_for",
            "OR issued",
            self.registry.issue_next_for(user, None),
        )
        .await
    }

    pub async fn issue_specific(
        &self,
        code: &str,
        or_number: u64,
        issued_to: &str,
    ) -> Envelope<OrTicket> {
        self.run(
            "issue_specific",
            "OR issued",
            self.registry.issue_specific(code, or_number, None, issued_to),
        )
        .await
    }

    pub async fn cancel_or(
        &self,
        code: &str,
        or_number: u64,
        reason: &str,
        by: &str,
    ) -> Envelope<OrTicket> {
        self.run(
            "cancel_or",
            "OR cancelled",
            self.registry.cancel_or(code, or_number, reason, by),
        )
        .await
    }

    pub async fn void_or(
        &self,
        code: &str,
        or_number: u64,
        reason: &str,
        by: &str,
    ) -> Envelope<OrTicket> {
        self.run(
            "void_or",
            "OR voided",
            self.registry.void_or(code, or_number, reason, by),
        )
        .await
    }

    /* =========================
    Payments
    ========================= */

    pub async fn create_payment(&self, req: NewPayment) -> Envelope<PaymentOutcome> {
        self.run(
            "create_payment",
            "payment recorded",
            self.allocator.create_payment(req),
        )
        .await
    }

    pub async fn amend_payment(&self, id: Uuid, change: PaymentAmendment) -> Envelope<Payment> {
        self.run(
            "amend_payment",
            "payment updated",
            self.allocator.amend_payment(&id, change),
        )
        .await
    }

    pub async fn cancel_payment(
        &self,
        code: &str,
        or_number: u64,
        reason: &str,
        by: &str,
    ) -> Envelope<CancellationOutcome> {
        self.run(
            "cancel_payment",
            "payment cancelled",
            self.reversal.cancel_payment(code, or_number, reason, by),
        )
        .await
    }

    pub async fn get_payment(&self, id: Uuid) -> Envelope<Payment> {
        self.run("get_payment", "payment found", self.allocator.find_payment(&id))
            .await
    }

    pub async fn payment_by_or(&self, code: &str, or_number: u64) -> Envelope<Payment> {
        self.run(
            "payment_by_or",
            "payment found",
            self.allocator.find_by_or(code, or_number),
        )
        .await
    }

    pub async fn search_payments(&self, filter: PaymentFilter) -> Envelope<Vec<Payment>> {
        self.run(
            "search_payments",
            "payments",
            self.allocator.search_payments(&filter),
        )
        .await
    }
}
