
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::task::JoinSet;

use cashiering::batch::item::OrStatus;
use cashiering::batch::model::{BatchFilter, BatchStatus, NewBatch};
use cashiering::batch::registry::BatchRegistry;
use cashiering::error::DeskError;
use cashiering::metrics::counters::Counters;

use mock_store::{InMemoryBatchRepo, harness};

fn batch(code: &str, start: u64, end: u64, user: &str) -> NewBatch {
    NewBatch {
        code: code.into(),
        prefix: "OR-".into(),
        start,
        end,
        current: None,
        assigned_to: user.into(),
        entry_by: "admin".into(),
        status: BatchStatus::Active,
        notes: None,
    }
}

#[tokio::test]
async fn overlapping_batch_is_rejected_naming_the_owner() {
    let h = harness();

    let env = h.desk.create_batch(batch("BATCH-A", 1, 5, "Cashier1")).await;
    assert!(env.success, "{}", env.message);
    let created = env.data.unwrap();
    assert_eq!(created.stats.total_numbers, 5);
    assert_eq!(created.stats.available_numbers, 5);
    assert!(!created.stats.is_exhausted);

    let env = h.desk.create_batch(batch("BATCH-B", 3, 8, "Cashier2")).await;
    assert!(!env.success);
    assert_eq!(env.error_code, Some("CONFLICT"));
    assert!(env.message.contains("BATCH-A"), "{}", env.message);

    // Nothing half-created.
    assert!(h.desk.get_batch("BATCH-B").await.error_code == Some("NOT_FOUND"));
    assert_eq!(h.batches.map.lock().len(), 1);
}

#[tokio::test]
async fn sequential_issue_until_exhausted() {
    let h = harness();
    h.registry
        .create_batch(batch("BATCH-A", 1, 5, "Cashier1"))
        .await
        .unwrap();

    for expected in 1..=4 {
        let t = h.registry.issue_next("BATCH-A", None, "Cashier1").await.unwrap();
        assert_eq!(t.or_number, expected);
        assert_eq!(t.display, format!("OR-{expected}"));
    }

    let s = h.registry.batch("BATCH-A").await.unwrap();
    assert_eq!(s.current_number, 5);
    assert!(!s.stats.is_exhausted);
    for n in 1..=4 {
        assert_eq!(h.registry.item("BATCH-A", n).await.unwrap().status, OrStatus::Issued);
    }
    assert_eq!(h.registry.item("BATCH-A", 5).await.unwrap().status, OrStatus::Available);

    h.registry.issue_next("BATCH-A", None, "Cashier1").await.unwrap();
    let s = h.registry.batch("BATCH-A").await.unwrap();
    assert_eq!(s.current_number, 6);
    assert_eq!(s.status, BatchStatus::Completed);
    assert!(s.stats.is_exhausted);

    let err = h
        .registry
        .issue_next("BATCH-A", None, "Cashier1")
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::InvalidState(ref m) if m.contains("exhausted")), "{err}");
}

#[tokio::test]
async fn concurrent_cashiers_never_share_a_number() {
    let h = harness();
    h.registry
        .create_batch(batch("BATCH-A", 100, 199, "Cashier1"))
        .await
        .unwrap();

    let mut set = JoinSet::new();
    for _ in 0..100 {
        let reg = h.registry.clone();
        set.spawn(async move { reg.issue_next("BATCH-A", None, "Cashier1").await });
    }

    let mut seen = HashSet::new();
    while let Some(res) = set.join_next().await {
        let t = res.unwrap().unwrap();
        assert!(seen.insert(t.or_number), "OR {} issued twice", t.or_number);
    }
    assert_eq!(seen.len(), 100);

    let s = h.registry.batch("BATCH-A").await.unwrap();
    assert_eq!(s.current_number, 200);
    assert_eq!(s.status, BatchStatus::Completed);
    assert_eq!(h.registry.counters().snapshot().or_issued, 100);
}

#[tokio::test]
async fn next_available_prefers_lowest_active_batch() {
    let h = harness();
    h.registry
        .create_batch(batch("LATE", 500, 510, "Cashier1"))
        .await
        .unwrap();
    h.registry
        .create_batch(batch("EARLY", 10, 12, "Cashier1"))
        .await
        .unwrap();
    let mut held = batch("HELD", 1, 3, "Cashier1");
    held.status = BatchStatus::Hold;
    h.registry.create_batch(held).await.unwrap();

    let next = h.registry.next_available("Cashier1").await.unwrap();
    assert_eq!((next.batch_code.as_str(), next.or_number), ("EARLY", 10));

    // Issuing a later number directly leaves the gap visible.
    h.registry
        .issue_specific("EARLY", 11, None, "Cashier1")
        .await
        .unwrap();
    let s = h.registry.batch("EARLY").await.unwrap();
    assert_eq!(s.current_number, 10);
    assert_eq!(h.registry.next_available("Cashier1").await.unwrap().or_number, 10);

    h.registry.issue_next_for("Cashier1", None).await.unwrap();
    h.registry.issue_next_for("Cashier1", None).await.unwrap();
    let t = h.registry.issue_next_for("Cashier1", None).await.unwrap();
    assert_eq!((t.batch_code.as_str(), t.or_number), ("LATE", 500));

    let err = h.registry.next_available("Nobody").await.unwrap_err();
    assert!(matches!(err, DeskError::InvalidState(_)));
}

#[tokio::test]
async fn issue_specific_error_kinds() {
    let h = harness();
    h.registry
        .create_batch(batch("BATCH-A", 1, 5, "Cashier1"))
        .await
        .unwrap();

    let err = h
        .registry
        .issue_specific("BATCH-A", 9, None, "c")
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::NotFound(_)));

    h.registry.issue_specific("BATCH-A", 3, None, "c").await.unwrap();
    let err = h
        .registry
        .issue_specific("BATCH-A", 3, None, "c")
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::Conflict(ref m) if m.contains("OR-3")), "{err}");

    h.registry
        .update_status("BATCH-A", BatchStatus::Inactive)
        .await
        .unwrap();
    let err = h
        .registry
        .issue_specific("BATCH-A", 4, None, "c")
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::InvalidState(_)));
}

#[tokio::test]
async fn cancel_and_void_rules() {
    let h = harness();
    h.registry
        .create_batch(batch("BATCH-A", 1, 5, "Cashier1"))
        .await
        .unwrap();

    // cancel needs an issued number
    let err = h
        .registry
        .cancel_or("BATCH-A", 1, "misprint", "sup")
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::InvalidState(_)));

    h.registry.issue_next("BATCH-A", None, "c").await.unwrap();
    let t = h
        .registry
        .cancel_or("BATCH-A", 1, "misprint", "sup")
        .await
        .unwrap();
    assert_eq!(t.item.status, OrStatus::Cancelled);
    assert_eq!(t.item.cancel_reason.as_deref(), Some("misprint"));
    assert_eq!(t.current_number, 2, "cancel never moves the cursor back");

    // void before issue
    let t = h.registry.void_or("BATCH-A", 2, "torn", "sup").await.unwrap();
    assert_eq!(t.item.status, OrStatus::Voided);
    assert_eq!(t.current_number, 3);

    // terminal states stay terminal
    let err = h.registry.void_or("BATCH-A", 1, "again", "sup").await.unwrap_err();
    assert!(matches!(err, DeskError::InvalidState(_)));
    let err = h.registry.issue_specific("BATCH-A", 2, None, "c").await.unwrap_err();
    assert!(matches!(err, DeskError::Conflict(_)));

    let err = h.registry.void_or("BATCH-A", 3, " ", "sup").await.unwrap_err();
    assert!(matches!(err, DeskError::Validation(_)));

    let logged = h.batches.map.lock()["BATCH-A"].usage_log.len();
    assert_eq!(logged, 3);
}

#[tokio::test]
async fn failed_write_leaves_memory_untouched() {
    let h = harness();
    h.registry
        .create_batch(batch("BATCH-A", 1, 5, "Cashier1"))
        .await
        .unwrap();

    h.batches.fail_writes.store(true, Ordering::SeqCst);
    let env = h.desk.issue_next("BATCH-A", "Cashier1").await;
    assert!(!env.success);
    assert_eq!(env.error_code, Some("STORAGE_ERROR"));
    assert!(env.message.contains("Database Offline"), "{}", env.message);

    h.batches.fail_writes.store(false, Ordering::SeqCst);
    let item = h.registry.item("BATCH-A", 1).await.unwrap();
    assert_eq!(item.status, OrStatus::Available);
    let t = h.registry.issue_next("BATCH-A", None, "Cashier1").await.unwrap();
    assert_eq!(t.or_number, 1);
}

#[tokio::test]
async fn restore_rebuilds_and_heals_cursor() {
    let repo = Arc::new(InMemoryBatchRepo::default());
    let reg = BatchRegistry::new(repo.clone(), Counters::default());
    reg.create_batch(batch("BATCH-A", 1, 10, "Cashier1")).await.unwrap();
    for _ in 0..3 {
        reg.issue_next("BATCH-A", None, "Cashier1").await.unwrap();
    }

    // Drift the stored cursor.
    repo.map.lock().get_mut("BATCH-A").unwrap().current_number = 9;

    let fresh = BatchRegistry::new(repo.clone(), Counters::default());
    assert_eq!(fresh.restore().await.unwrap(), 1);

    let s = fresh.batch("BATCH-A").await.unwrap();
    assert_eq!(s.current_number, 4);
    let t = fresh.issue_next("BATCH-A", None, "Cashier1").await.unwrap();
    assert_eq!(t.or_number, 4);
}

#[tokio::test]
async fn restore_completes_a_batch_whose_numbers_are_all_spent() {
    let repo = Arc::new(InMemoryBatchRepo::default());
    let reg = BatchRegistry::new(repo.clone(), Counters::default());
    reg.create_batch(batch("BATCH-A", 1, 3, "Cashier1")).await.unwrap();
    for _ in 0..3 {
        reg.issue_next("BATCH-A", None, "Cashier1").await.unwrap();
    }

    // Stored header lags behind the items.
    {
        let mut map = repo.map.lock();
        let stored = map.get_mut("BATCH-A").unwrap();
        stored.status = BatchStatus::Active;
        stored.current_number = 2;
    }

    let fresh = BatchRegistry::new(repo.clone(), Counters::default());
    fresh.restore().await.unwrap();

    let s = fresh.batch("BATCH-A").await.unwrap();
    assert_eq!(s.current_number, 4);
    assert_eq!(s.status, BatchStatus::Completed);
    assert!(s.stats.is_exhausted);
    assert_eq!(
        fresh.next_available("Cashier1").await.unwrap_err().code(),
        "INVALID_STATE"
    );
}

#[tokio::test]
async fn registration_with_preconsumed_numbers() {
    let h = harness();
    let mut req = batch("BATCH-A", 1, 10, "Cashier1");
    req.current = Some(4);
    let s = h.registry.create_batch(req).await.unwrap();
    assert_eq!(s.current_number, 4);
    assert_eq!(s.stats.used_numbers, 3);
    assert_eq!(s.stats.available_numbers, 7);

    let item = h.registry.item("BATCH-A", 2).await.unwrap();
    assert_eq!(item.status, OrStatus::Voided);

    let t = h.registry.issue_next("BATCH-A", None, "Cashier1").await.unwrap();
    assert_eq!(t.or_number, 4);
}

#[tokio::test]
async fn search_and_statistics() {
    let h = harness();
    h.registry.create_batch(batch("A", 1, 5, "Cashier1")).await.unwrap();
    h.registry.create_batch(batch("B", 6, 10, "Cashier2")).await.unwrap();
    let mut pending = batch("C", 11, 20, "Cashier1");
    pending.status = BatchStatus::Pending;
    h.registry.create_batch(pending).await.unwrap();
    h.registry.issue_next("A", None, "Cashier1").await.unwrap();

    let mine = h
        .registry
        .search(&BatchFilter {
            assigned_to: Some("Cashier1".into()),
            ..Default::default()
        })
        .await;
    let codes: Vec<_> = mine.iter().map(|s| s.code.as_str()).collect();
    assert_eq!(codes, vec!["A", "C"]);

    let st = h.registry.statistics().await;
    assert_eq!(st.total_batches, 3);
    assert_eq!(st.active, 2);
    assert_eq!(st.pending, 1);
    assert_eq!(st.total_numbers, 20);
    assert_eq!(st.used_numbers, 1);
    assert_eq!(st.available_numbers, 19);
}
