//! Payment conformance tests: guarded status transitions on orders and
//! transactions, and the append-only event log.

use std::future::Future;

use super::{make_event, seed_payment, TestResult};
use crate::record::{OrderStatus, PaymentEventKind, PaymentProvider, TransactionStatus};
use crate::{MarketStorage, StorageError};

pub(super) async fn run_payment_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "payment",
        "lookup_by_external_id",
        lookup_by_external_id(factory).await,
    ));
    results.push(TestResult::from_result(
        "payment",
        "complete_transaction_sets_completed_at",
        complete_transaction_sets_completed_at(factory).await,
    ));
    results.push(TestResult::from_result(
        "payment",
        "fail_transaction_leaves_completed_at_unset",
        fail_transaction_leaves_completed_at_unset(factory).await,
    ));
    results.push(TestResult::from_result(
        "payment",
        "transaction_status_guard_rejects_mismatch",
        transaction_status_guard_rejects_mismatch(factory).await,
    ));
    results.push(TestResult::from_result(
        "payment",
        "confirm_order_sets_confirmed_at",
        confirm_order_sets_confirmed_at(factory).await,
    ));
    results.push(TestResult::from_result(
        "payment",
        "order_status_guard_rejects_mismatch",
        order_status_guard_rejects_mismatch(factory).await,
    ));
    results.push(TestResult::from_result(
        "payment",
        "completion_commits_atomically",
        completion_commits_atomically(factory).await,
    ));
    results.push(TestResult::from_result(
        "payment",
        "events_listed_newest_first",
        events_listed_newest_first(factory).await,
    ));
    results.push(TestResult::from_result(
        "payment",
        "events_filtered_by_transaction",
        events_filtered_by_transaction(factory).await,
    ));
    results.push(TestResult::from_result(
        "payment",
        "duplicate_event_id_rejected",
        duplicate_event_id_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "payment",
        "event_for_unknown_transaction_rejected",
        event_for_unknown_transaction_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "payment",
        "event_payload_preserved",
        event_payload_preserved(factory).await,
    ));

    results
}

async fn lookup_by_external_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_payment(&s, "order-1", "tx-1", "trade-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let found = s
        .get_transaction_by_external_id_for_update(&mut snap, PaymentProvider::Alipay, "trade-1")
        .await;
    let other_provider = s
        .get_transaction_by_external_id_for_update(&mut snap, PaymentProvider::Wechat, "trade-1")
        .await;
    let _ = s.abort_snapshot(snap).await;

    let found = found.map_err(|e| e.to_string())?;
    if found.id != "tx-1" || found.order_id != "order-1" {
        return Err(format!("wrong transaction returned: {found:?}"));
    }
    if !matches!(other_provider, Err(StorageError::NotFound { .. })) {
        return Err(format!(
            "lookup must be scoped by provider, got {other_provider:?}"
        ));
    }
    Ok(())
}

async fn complete_transaction_sets_completed_at<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_payment(&s, "order-1", "tx-1", "trade-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_transaction_status(
        &mut snap,
        "tx-1",
        TransactionStatus::Pending,
        TransactionStatus::Completed,
        Some("2025010122001"),
        "2025-01-01T00:05:00Z",
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let tx = s.get_transaction("tx-1").await.map_err(|e| e.to_string())?;
    if tx.status != TransactionStatus::Completed
        || tx.completed_at.as_deref() != Some("2025-01-01T00:05:00Z")
        || tx.updated_at != "2025-01-01T00:05:00Z"
        || tx.provider_trade_no.as_deref() != Some("2025010122001")
    {
        return Err(format!("completion not recorded: {tx:?}"));
    }
    Ok(())
}

async fn fail_transaction_leaves_completed_at_unset<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_payment(&s, "order-1", "tx-1", "trade-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_transaction_status(
        &mut snap,
        "tx-1",
        TransactionStatus::Pending,
        TransactionStatus::Failed,
        None,
        "2025-01-01T00:05:00Z",
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let tx = s.get_transaction("tx-1").await.map_err(|e| e.to_string())?;
    if tx.status != TransactionStatus::Failed || tx.completed_at.is_some() {
        return Err(format!("unexpected failed transaction: {tx:?}"));
    }
    let order = s.get_order("order-1").await.map_err(|e| e.to_string())?;
    if order.status != OrderStatus::Pending {
        return Err(format!("order moved to {}", order.status));
    }
    Ok(())
}

async fn transaction_status_guard_rejects_mismatch<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_payment(&s, "order-1", "tx-1", "trade-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_transaction_status(
            &mut snap,
            "tx-1",
            TransactionStatus::Completed,
            TransactionStatus::Failed,
            None,
            "2025-01-01T00:05:00Z",
        )
        .await;
    let _ = s.abort_snapshot(snap).await;

    match result {
        Err(StorageError::StatusConflict {
            record,
            id,
            expected,
            actual,
        }) => {
            if record != "transaction" || id != "tx-1" || expected != "COMPLETED" || actual != "PENDING"
            {
                return Err(format!(
                    "conflict carries wrong fields: {record} {id} {expected} {actual}"
                ));
            }
            Ok(())
        }
        other => Err(format!("expected StatusConflict, got {other:?}")),
    }
}

async fn confirm_order_sets_confirmed_at<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_payment(&s, "order-1", "tx-1", "trade-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_order_status(
        &mut snap,
        "order-1",
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        "2025-01-01T00:06:00Z",
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let order = s.get_order("order-1").await.map_err(|e| e.to_string())?;
    if order.status != OrderStatus::Confirmed
        || order.confirmed_at.as_deref() != Some("2025-01-01T00:06:00Z")
    {
        return Err(format!("confirmation not recorded: {order:?}"));
    }
    Ok(())
}

async fn order_status_guard_rejects_mismatch<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_payment(&s, "order-1", "tx-1", "trade-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_order_status(
            &mut snap,
            "order-1",
            OrderStatus::Confirmed,
            OrderStatus::Refunded,
            "2025-01-01T00:06:00Z",
        )
        .await;
    let _ = s.abort_snapshot(snap).await;

    if !matches!(result, Err(StorageError::StatusConflict { .. })) {
        return Err(format!("expected StatusConflict, got {result:?}"));
    }
    let order = s.get_order("order-1").await.map_err(|e| e.to_string())?;
    if order.status != OrderStatus::Pending {
        return Err(format!("order moved to {}", order.status));
    }
    Ok(())
}

/// Transaction, order and event are written together or not at all.
async fn completion_commits_atomically<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_payment(&s, "order-1", "tx-1", "trade-1").await?;

    complete_payment(&s, false).await?;
    let tx = s.get_transaction("tx-1").await.map_err(|e| e.to_string())?;
    let order = s.get_order("order-1").await.map_err(|e| e.to_string())?;
    let events = s
        .list_payment_events(Some("tx-1"), 0)
        .await
        .map_err(|e| e.to_string())?;
    if tx.status != TransactionStatus::Pending
        || order.status != OrderStatus::Pending
        || !events.is_empty()
    {
        return Err("aborted completion left partial writes".to_string());
    }

    complete_payment(&s, true).await?;
    let tx = s.get_transaction("tx-1").await.map_err(|e| e.to_string())?;
    let order = s.get_order("order-1").await.map_err(|e| e.to_string())?;
    let events = s
        .list_payment_events(Some("tx-1"), 0)
        .await
        .map_err(|e| e.to_string())?;
    if tx.status != TransactionStatus::Completed
        || order.status != OrderStatus::Confirmed
        || events.len() != 1
    {
        return Err(format!(
            "committed completion incomplete: tx {} order {} events {}",
            tx.status,
            order.status,
            events.len()
        ));
    }
    Ok(())
}

async fn complete_payment<S: MarketStorage>(s: &S, commit: bool) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_transaction_status(
        &mut snap,
        "tx-1",
        TransactionStatus::Pending,
        TransactionStatus::Completed,
        None,
        "2025-01-01T00:05:00Z",
    )
    .await
    .map_err(|e| e.to_string())?;
    s.update_order_status(
        &mut snap,
        "order-1",
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        "2025-01-01T00:05:00Z",
    )
    .await
    .map_err(|e| e.to_string())?;
    let event_id = if commit { "ev-commit" } else { "ev-abort" };
    s.append_payment_event(
        &mut snap,
        make_event(event_id, Some("tx-1"), PaymentEventKind::Completed),
    )
    .await
    .map_err(|e| e.to_string())?;
    if commit {
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())
    } else {
        s.abort_snapshot(snap).await.map_err(|e| e.to_string())
    }
}

async fn events_listed_newest_first<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_payment(&s, "order-1", "tx-1", "trade-1").await?;

    // Ids deliberately out of lexical order.
    for (id, kind) in [
        ("ev-z", PaymentEventKind::Completed),
        ("ev-a", PaymentEventKind::Duplicate),
        ("ev-m", PaymentEventKind::Duplicate),
    ] {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.append_payment_event(&mut snap, make_event(id, Some("tx-1"), kind))
            .await
            .map_err(|e| e.to_string())?;
        s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    }

    let events = s
        .list_payment_events(None, 0)
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
    if ids != ["ev-m", "ev-a", "ev-z"] {
        return Err(format!("expected newest first, got {ids:?}"));
    }
    // A limit keeps the latest events, not the oldest.
    let limited = s
        .list_payment_events(None, 2)
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = limited.iter().map(|e| e.id.as_str()).collect();
    if ids != ["ev-m", "ev-a"] {
        return Err(format!("expected the two newest events, got {ids:?}"));
    }
    let for_tx = s
        .list_payment_events(Some("tx-1"), 1)
        .await
        .map_err(|e| e.to_string())?;
    if for_tx.len() != 1 || for_tx[0].id != "ev-m" {
        return Err(format!("expected newest event for tx-1, got {for_tx:?}"));
    }
    Ok(())
}

async fn events_filtered_by_transaction<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_payment(&s, "order-1", "tx-1", "trade-1").await?;
    seed_payment(&s, "order-2", "tx-2", "trade-2").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for event in [
        make_event("ev-1", Some("tx-1"), PaymentEventKind::Completed),
        make_event("ev-2", Some("tx-2"), PaymentEventKind::Failed),
        make_event("ev-3", None, PaymentEventKind::Rejected),
    ] {
        s.append_payment_event(&mut snap, event)
            .await
            .map_err(|e| e.to_string())?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let for_tx2 = s
        .list_payment_events(Some("tx-2"), 0)
        .await
        .map_err(|e| e.to_string())?;
    if for_tx2.len() != 1 || for_tx2[0].kind != PaymentEventKind::Failed {
        return Err(format!("unexpected events for tx-2: {for_tx2:?}"));
    }
    let all = s
        .list_payment_events(None, 0)
        .await
        .map_err(|e| e.to_string())?;
    if all.len() != 3 {
        return Err(format!("expected 3 events, got {}", all.len()));
    }
    Ok(())
}

/// Event ids are unique across committed events and the open snapshot.
async fn duplicate_event_id_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.append_payment_event(&mut snap, make_event("ev-1", None, PaymentEventKind::Rejected))
        .await
        .map_err(|e| e.to_string())?;
    let same_snapshot = s
        .append_payment_event(&mut snap, make_event("ev-1", None, PaymentEventKind::Rejected))
        .await;
    if !matches!(same_snapshot, Err(StorageError::AlreadyExists { .. })) {
        let _ = s.abort_snapshot(snap).await;
        return Err(format!(
            "expected AlreadyExists within a snapshot, got {same_snapshot:?}"
        ));
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let after_commit = s
        .append_payment_event(&mut snap, make_event("ev-1", None, PaymentEventKind::Duplicate))
        .await;
    let _ = s.abort_snapshot(snap).await;
    if !matches!(after_commit, Err(StorageError::AlreadyExists { .. })) {
        return Err(format!(
            "expected AlreadyExists for a committed id, got {after_commit:?}"
        ));
    }
    let events = s
        .list_payment_events(None, 0)
        .await
        .map_err(|e| e.to_string())?;
    if events.len() != 1 {
        return Err(format!("expected 1 event, got {}", events.len()));
    }
    Ok(())
}

async fn event_for_unknown_transaction_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .append_payment_event(
            &mut snap,
            make_event("ev-1", Some("tx-missing"), PaymentEventKind::Completed),
        )
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {other:?}")),
    }
}

async fn event_payload_preserved<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut event = make_event("ev-1", None, PaymentEventKind::Rejected);
    event.provider = PaymentProvider::Wechat;
    event.message = Some("signature mismatch".to_string());
    event.payload = serde_json::json!({"out_trade_no": "x", "total_fee": "100", "nested": {"a": [1, 2]}});

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.append_payment_event(&mut snap, event.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let events = s
        .list_payment_events(None, 0)
        .await
        .map_err(|e| e.to_string())?;
    if events != vec![event] {
        return Err(format!("event not preserved: {events:?}"));
    }
    Ok(())
}
