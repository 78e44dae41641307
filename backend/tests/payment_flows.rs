
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing_test::traced_test;

use cashiering::api::CashierDesk;
use cashiering::batch::item::OrStatus;
use cashiering::batch::model::{BatchStatus, NewBatch};
use cashiering::ledger::{LedgerFamily, LedgerStatus};
use cashiering::payment::model::{
    AllocationRequest, NewPayment, PaymentAmendment, PaymentFilter, PaymentStatus,
};

use mock_store::{Harness, YieldingLedger, harness};

async fn setup() -> Harness {
    let h = harness();
    h.registry
        .create_batch(NewBatch {
            code: "BATCH-A".into(),
            prefix: "OR-".into(),
            start: 1,
            end: 5,
            current: None,
            assigned_to: "Cashier1".into(),
            entry_by: "admin".into(),
            status: BatchStatus::Active,
            notes: None,
        })
        .await
        .unwrap();
    h.ledger.seed(LedgerFamily::Billing, "2024-01", dec!(1000.00));
    h.ledger.seed(LedgerFamily::Billing, "2024-02", dec!(800.00));
    h.ledger.seed(LedgerFamily::Misc, "RECON-1", dec!(300.00));
    h
}

fn line(code: &str, amount: Decimal, discount: Decimal) -> AllocationRequest {
    AllocationRequest {
        code: code.into(),
        description: String::new(),
        amount,
        discount,
    }
}

fn pay(or_number: u64, kind: LedgerFamily, lines: Vec<AllocationRequest>) -> NewPayment {
    let total: Decimal = lines.iter().map(|l| l.amount).sum();
    NewPayment {
        client_id: "CL-0001".into(),
        payor: "Juan dela Cruz".into(),
        batch_code: "BATCH-A".into(),
        or_number,
        kind,
        lines,
        total_amount: total,
        payment_date: None,
        notes: None,
        entry_by: "Cashier1".into(),
    }
}

#[tokio::test]
async fn discount_exceeding_balance_is_clamped() {
    let h = setup().await;

    let env = h
        .desk
        .create_payment(pay(1, LedgerFamily::Billing, vec![line("2024-01", dec!(950), dec!(100))]))
        .await;
    assert!(env.success, "{}", env.message);
    let out = env.data.unwrap();

    let stored = &out.payment.allocation[0];
    assert_eq!(stored.amount, dec!(950));
    assert_eq!(stored.discount, dec!(50));
    assert!(stored.is_paid_full);
    assert_eq!(out.payment.total_amount, dec!(950));
    assert!(out.payment.is_balanced());

    assert_eq!(out.report.adjusted.len(), 1);
    assert_eq!(out.report.adjusted[0].requested, dec!(100));
    assert_eq!(out.report.adjusted[0].applied, dec!(50));

    let ledger = h.ledger.get(LedgerFamily::Billing, "2024-01");
    assert_eq!(ledger.paid, dec!(1000));
    assert_eq!(ledger.remaining, Decimal::ZERO);
    assert_eq!(ledger.status, LedgerStatus::Paid);
    let receipt = ledger.receipt.unwrap();
    assert_eq!((receipt.batch_code.as_str(), receipt.or_number), ("BATCH-A", 1));
    assert_eq!(receipt.payment_id, out.payment.id);

    let item = h.registry.item("BATCH-A", 1).await.unwrap();
    assert_eq!(item.status, OrStatus::Issued);
    assert_eq!(item.payment_id, Some(out.payment.id));
    assert_eq!(h.desk.counters().discounts_clamped, 1);
}

#[tokio::test]
async fn already_issued_receipt_is_a_conflict_without_ledger_writes() {
    let h = setup().await;
    h.registry.issue_specific("BATCH-A", 3, None, "Cashier1").await.unwrap();
    let before = h.ledger.get(LedgerFamily::Billing, "2024-01");

    let err = h
        .desk
        .create_payment(pay(3, LedgerFamily::Billing, vec![line("2024-01", dec!(500), dec!(0))]))
        .await;
    assert!(!err.success);
    assert_eq!(err.error_code, Some("CONFLICT"));
    assert_eq!(h.ledger.get(LedgerFamily::Billing, "2024-01"), before);
    assert!(h.payments.map.lock().is_empty());
}

#[tokio::test]
async fn receipt_referenced_by_a_payment_is_a_conflict() {
    let h = setup().await;
    let first = h
        .desk
        .create_payment(pay(2, LedgerFamily::Billing, vec![line("2024-01", dec!(100), dec!(0))]))
        .await
        .into_result()
        .unwrap();

    let env = h
        .desk
        .create_payment(pay(2, LedgerFamily::Billing, vec![line("2024-02", dec!(100), dec!(0))]))
        .await;
    assert_eq!(env.error_code, Some("CONFLICT"));
    assert!(env.message.contains(&first.payment.id.to_string()), "{}", env.message);
    assert_eq!(h.ledger.get(LedgerFamily::Billing, "2024-02").paid, Decimal::ZERO);
}

#[tokio::test]
async fn cancelling_restores_ledger_balances() {
    let h = setup().await;

    // A prior partial payment so the line does not start from zero.
    h.desk
        .create_payment(pay(1, LedgerFamily::Billing, vec![line("2024-01", dec!(200), dec!(0))]))
        .await
        .into_result()
        .unwrap();
    let jan = h.ledger.get(LedgerFamily::Billing, "2024-01");
    let feb = h.ledger.get(LedgerFamily::Billing, "2024-02");

    let out = h
        .desk
        .create_payment(pay(
            2,
            LedgerFamily::Billing,
            vec![
                line("2024-01", dec!(700), dec!(150)),
                line("2024-02", dec!(900.50), dec!(0)),
            ],
        ))
        .await
        .into_result()
        .unwrap();
    assert_eq!(out.payment.allocation[0].discount, dec!(100));
    assert_eq!(h.ledger.get(LedgerFamily::Billing, "2024-02").remaining, Decimal::ZERO);

    let cancelled = h
        .desk
        .cancel_payment("BATCH-A", 2, "wrong account", "Supervisor")
        .await
        .into_result()
        .unwrap();
    assert_eq!(cancelled.reversed.len(), 2);
    assert_eq!(cancelled.ticket.item.status, OrStatus::Cancelled);

    for before in [jan, feb] {
        let after = h.ledger.get(LedgerFamily::Billing, &before.code);
        assert!((after.paid - before.paid).abs() <= dec!(0.01), "{}", before.code);
        assert!((after.remaining - before.remaining).abs() <= dec!(0.01), "{}", before.code);
    }

    // Tombstoned, not deleted.
    let p = h.desk.payment_by_or("BATCH-A", 2).await.into_result().unwrap();
    assert_eq!(p.status, PaymentStatus::Cancelled);
    assert_eq!(p.cancel_reason.as_deref(), Some("wrong account"));
    assert_eq!(p.cancelled_by.as_deref(), Some("Supervisor"));
    assert_eq!(p.allocation.len(), 2);

    // Number stays burned.
    let s = h.registry.batch("BATCH-A").await.unwrap();
    assert_eq!(s.current_number, 3);

    let env = h.desk.cancel_payment("BATCH-A", 2, "again", "Supervisor").await;
    assert_eq!(env.error_code, Some("INVALID_STATE"));
    assert_eq!(h.desk.counters().payments_cancelled, 1);
}

#[tokio::test]
async fn misc_fee_ignores_discount_and_resets_on_cancel() {
    let h = setup().await;
    let out = h
        .desk
        .create_payment(pay(1, LedgerFamily::Misc, vec![line("RECON-1", dec!(300), dec!(25))]))
        .await
        .into_result()
        .unwrap();
    assert_eq!(out.payment.allocation[0].discount, Decimal::ZERO);
    assert_eq!(h.ledger.get(LedgerFamily::Misc, "RECON-1").status, LedgerStatus::Paid);

    h.desk
        .cancel_payment("BATCH-A", 1, "duplicate", "Supervisor")
        .await
        .into_result()
        .unwrap();
    let fee = h.ledger.get(LedgerFamily::Misc, "RECON-1");
    assert_eq!(fee.status, LedgerStatus::Unpaid);
    assert_eq!(fee.paid, Decimal::ZERO);
    assert!(fee.receipt.is_none());
}

#[tokio::test]
async fn missing_ledger_line_is_skipped_and_reported() {
    let h = setup().await;
    let out = h
        .desk
        .create_payment(pay(
            1,
            LedgerFamily::Billing,
            vec![
                line("2024-01", dec!(400), dec!(0)),
                line("2019-12", dec!(50), dec!(0)),
            ],
        ))
        .await
        .into_result()
        .unwrap();

    assert_eq!(out.report.updated, vec!["2024-01".to_string()]);
    assert_eq!(out.report.skipped.len(), 1);
    assert_eq!(out.report.skipped[0].code, "2019-12");
    assert!(!out.payment.allocation[1].credited);
    assert_eq!(out.payment.total_amount, dec!(450));
    assert_eq!(h.desk.counters().lines_skipped, 1);

    let env = h
        .desk
        .create_payment(pay(2, LedgerFamily::Billing, vec![line("2019-12", dec!(50), dec!(0))]))
        .await;
    assert_eq!(env.error_code, Some("VALIDATION_ERROR"));
    assert_eq!(h.registry.item("BATCH-A", 2).await.unwrap().status, OrStatus::Available);
}

#[tokio::test]
async fn total_mismatch_is_rejected_before_issuing() {
    let h = setup().await;
    let mut req = pay(1, LedgerFamily::Billing, vec![line("2024-01", dec!(500), dec!(0))]);
    req.total_amount = dec!(499.98);

    let env = h.desk.create_payment(req).await;
    assert_eq!(env.error_code, Some("VALIDATION_ERROR"));
    assert_eq!(h.registry.item("BATCH-A", 1).await.unwrap().status, OrStatus::Available);

    let mut req = pay(1, LedgerFamily::Billing, vec![line("2024-01", dec!(500), dec!(0))]);
    req.total_amount = dec!(500.01);
    assert!(h.desk.create_payment(req).await.success);
}

#[tokio::test]
#[traced_test]
async fn failed_credit_reverses_earlier_credits_and_returns_the_number() {
    let h = setup().await;
    *h.ledger.fail_credit_on.lock() = Some("2024-02".into());

    let err = h
        .desk
        .create_payment(pay(
            1,
            LedgerFamily::Billing,
            vec![
                line("2024-01", dec!(500), dec!(0)),
                line("2024-02", dec!(300), dec!(0)),
            ],
        ))
        .await;
    assert_eq!(err.error_code, Some("STORAGE_ERROR"));
    assert!(err.message.contains("2024-02"), "{}", err.message);

    assert_eq!(h.ledger.get(LedgerFamily::Billing, "2024-01").paid, Decimal::ZERO);
    assert_eq!(h.registry.item("BATCH-A", 1).await.unwrap().status, OrStatus::Available);
    assert!(h.payments.map.lock().is_empty());

    let c = h.desk.counters();
    assert_eq!(c.compensations, 1);
    assert_eq!(c.reconciliation_needed, 0);
    assert_eq!(c.or_reverted, 1);
    assert!(logs_contain("credits reversed and OR returned"));

    // The number is usable again.
    *h.ledger.fail_credit_on.lock() = None;
    let env = h
        .desk
        .create_payment(pay(1, LedgerFamily::Billing, vec![line("2024-01", dec!(500), dec!(0))]))
        .await;
    assert!(env.success, "{}", env.message);
}

#[tokio::test]
async fn failed_payment_write_is_compensated() {
    let h = setup().await;
    h.payments.fail_insert.store(true, Ordering::SeqCst);

    let env = h
        .desk
        .create_payment(pay(4, LedgerFamily::Billing, vec![line("2024-01", dec!(1000), dec!(0))]))
        .await;
    assert_eq!(env.error_code, Some("STORAGE_ERROR"));

    let jan = h.ledger.get(LedgerFamily::Billing, "2024-01");
    assert_eq!(jan.paid, Decimal::ZERO);
    assert_eq!(jan.remaining, dec!(1000.00));
    assert_eq!(h.registry.item("BATCH-A", 4).await.unwrap().status, OrStatus::Available);
}

#[tokio::test]
#[traced_test]
async fn failed_compensation_is_flagged_for_reconciliation() {
    let h = setup().await;
    *h.ledger.fail_credit_on.lock() = Some("2024-02".into());
    h.ledger.fail_reverse.store(true, Ordering::SeqCst);

    let env = h
        .desk
        .create_payment(pay(
            1,
            LedgerFamily::Billing,
            vec![
                line("2024-01", dec!(500), dec!(0)),
                line("2024-02", dec!(300), dec!(0)),
            ],
        ))
        .await;
    assert!(!env.success);
    assert_eq!(h.desk.counters().reconciliation_needed, 1);
    assert!(logs_contain("manual reconciliation required"));
    assert!(logs_contain("BATCH-A"));
}

#[tokio::test]
async fn failed_tombstone_reapplies_reversed_credits() {
    let h = setup().await;
    h.desk
        .create_payment(pay(1, LedgerFamily::Billing, vec![line("2024-01", dec!(600), dec!(0))]))
        .await
        .into_result()
        .unwrap();
    let credited = h.ledger.get(LedgerFamily::Billing, "2024-01");

    h.payments.fail_update.store(true, Ordering::SeqCst);
    let env = h.desk.cancel_payment("BATCH-A", 1, "typo", "Supervisor").await;
    assert_eq!(env.error_code, Some("STORAGE_ERROR"));

    let after = h.ledger.get(LedgerFamily::Billing, "2024-01");
    assert_eq!(after.paid, credited.paid);
    assert_eq!(after.remaining, credited.remaining);
    assert_eq!(h.registry.item("BATCH-A", 1).await.unwrap().status, OrStatus::Issued);

    h.payments.fail_update.store(false, Ordering::SeqCst);
    let p = h.desk.payment_by_or("BATCH-A", 1).await.into_result().unwrap();
    assert_eq!(p.status, PaymentStatus::Paid);
}

#[tokio::test]
async fn voided_receipt_still_allows_payment_cancellation() {
    let h = setup().await;
    h.desk
        .create_payment(pay(1, LedgerFamily::Billing, vec![line("2024-01", dec!(250), dec!(0))]))
        .await
        .into_result()
        .unwrap();
    h.registry.void_or("BATCH-A", 1, "spoiled print", "Supervisor").await.unwrap();

    let out = h
        .desk
        .cancel_payment("BATCH-A", 1, "spoiled print", "Supervisor")
        .await
        .into_result()
        .unwrap();
    assert_eq!(out.ticket.item.status, OrStatus::Voided);
    assert_eq!(h.ledger.get(LedgerFamily::Billing, "2024-01").paid, Decimal::ZERO);
}

#[tokio::test]
async fn amend_touches_metadata_only() {
    let h = setup().await;
    let out = h
        .desk
        .create_payment(pay(1, LedgerFamily::Billing, vec![line("2024-01", dec!(250), dec!(0))]))
        .await
        .into_result()
        .unwrap();
    let id = out.payment.id;

    let p = h
        .desk
        .amend_payment(
            id,
            PaymentAmendment {
                payor: Some("Maria dela Cruz".into()),
                notes: Some("paid by spouse".into()),
            },
        )
        .await
        .into_result()
        .unwrap();
    assert_eq!(p.payor, "Maria dela Cruz");
    assert_eq!(p.allocation, out.payment.allocation);

    let env = h
        .desk
        .amend_payment(
            id,
            PaymentAmendment {
                payor: Some(" ".into()),
                notes: None,
            },
        )
        .await;
    assert_eq!(env.error_code, Some("VALIDATION_ERROR"));

    h.desk
        .cancel_payment("BATCH-A", 1, "void", "Supervisor")
        .await
        .into_result()
        .unwrap();
    let env = h.desk.amend_payment(id, PaymentAmendment::default()).await;
    assert_eq!(env.error_code, Some("INVALID_STATE"));

    let env = h.desk.get_payment(uuid::Uuid::new_v4()).await;
    assert_eq!(env.error_code, Some("NOT_FOUND"));
}

#[tokio::test]
async fn search_filters_by_client_and_status() {
    let h = setup().await;
    h.desk
        .create_payment(pay(1, LedgerFamily::Billing, vec![line("2024-01", dec!(100), dec!(0))]))
        .await
        .into_result()
        .unwrap();
    let mut other = pay(2, LedgerFamily::Billing, vec![line("2024-02", dec!(100), dec!(0))]);
    other.client_id = "CL-0002".into();
    h.desk.create_payment(other).await.into_result().unwrap();
    h.desk
        .cancel_payment("BATCH-A", 2, "void", "Supervisor")
        .await
        .into_result()
        .unwrap();

    let found = h
        .desk
        .search_payments(PaymentFilter {
            client_id: Some("CL-0001".into()),
            ..Default::default()
        })
        .await
        .into_result()
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].or_number, 1);

    let cancelled = h
        .desk
        .search_payments(PaymentFilter {
            status: Some(PaymentStatus::Cancelled),
            ..Default::default()
        })
        .await
        .into_result()
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].client_id, "CL-0002");
}

#[tokio::test]
async fn payment_requires_active_batch() {
    let h = setup().await;
    h.registry.update_status("BATCH-A", BatchStatus::Hold).await.unwrap();

    let env = h
        .desk
        .create_payment(pay(1, LedgerFamily::Billing, vec![line("2024-01", dec!(100), dec!(0))]))
        .await;
    assert_eq!(env.error_code, Some("INVALID_STATE"));
    assert_eq!(h.ledger.get(LedgerFamily::Billing, "2024-01").paid, Decimal::ZERO);
}

#[tokio::test]
async fn concurrent_payments_on_one_line_share_the_discount_headroom() {
    let h = setup().await;
    let desk = CashierDesk::new(
        h.registry.clone(),
        Arc::new(YieldingLedger(h.ledger.clone())),
        h.payments.clone(),
        Duration::from_millis(100),
    );

    // Both plan against 1000 remaining; only one 100 discount fits.
    let (a, b) = tokio::join!(
        desk.create_payment(pay(1, LedgerFamily::Billing, vec![line("2024-01", dec!(500), dec!(100))])),
        desk.create_payment(pay(2, LedgerFamily::Billing, vec![line("2024-01", dec!(500), dec!(100))])),
    );
    let a = a.into_result().unwrap();
    let b = b.into_result().unwrap();

    let granted = a.payment.allocation[0].discount + b.payment.allocation[0].discount;
    assert_eq!(granted, dec!(100));

    let jan = h.ledger.get(LedgerFamily::Billing, "2024-01");
    assert_eq!(jan.paid, dec!(1100));
    assert_eq!(jan.remaining, Decimal::ZERO);

    // The clamped payment says so, and what was stored matches what was credited.
    let clamped = if a.payment.allocation[0].discount.is_zero() { &a } else { &b };
    assert_eq!(clamped.report.adjusted.len(), 1);
    assert_eq!(clamped.report.adjusted[0].requested, dec!(100));
    assert_eq!(clamped.report.adjusted[0].applied, Decimal::ZERO);
    assert!(clamped.payment.allocation[0].is_paid_full);

    let stored = h.payments.map.lock()[&clamped.payment.id].clone();
    assert_eq!(stored.allocation[0].discount, Decimal::ZERO);

    // Cancelling both reverses exactly what each one credited.
    for n in [1, 2] {
        desk.cancel_payment("BATCH-A", n, "duplicate", "Supervisor")
            .await
            .into_result()
            .unwrap();
    }
    let jan = h.ledger.get(LedgerFamily::Billing, "2024-01");
    assert_eq!(jan.paid, Decimal::ZERO);
    assert_eq!(jan.remaining, dec!(1000.00));
}
