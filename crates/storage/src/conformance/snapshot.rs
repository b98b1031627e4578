//! Snapshot isolation conformance tests.
//!
//! Verifies that uncommitted writes are invisible outside a snapshot,
//! committed writes are visible, and aborted writes are discarded.

use std::future::Future;

use super::{make_bom_item, make_solution, seed_payment, seed_solution, TestResult};
use crate::record::{PaymentProvider, SolutionStatus, TransactionStatus};
use crate::{MarketStorage, StorageError};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "snapshot",
        "begin_and_commit_empty_snapshot",
        begin_and_commit_empty_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_solution_invisible_to_get",
        uncommitted_solution_invisible_to_get(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_solution_invisible_to_list",
        uncommitted_solution_invisible_to_list(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_solution_visible_inside_snapshot",
        uncommitted_solution_visible_inside_snapshot(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_update_invisible",
        uncommitted_update_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "abort_discards_solution",
        abort_discards_solution(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "dropped_snapshot_rolls_back",
        dropped_snapshot_rolls_back(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_bom_invisible",
        uncommitted_bom_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "uncommitted_transaction_update_invisible",
        uncommitted_transaction_update_invisible(factory).await,
    ));
    results.push(TestResult::from_result(
        "snapshot",
        "sequential_snapshots_see_prior_commits",
        sequential_snapshots_see_prior_commits(factory).await,
    ));

    results
}

async fn begin_and_commit_empty_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;
    let snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())
}

async fn uncommitted_solution_invisible_to_get<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_solution(&mut snap, make_solution("sol-1"))
        .await
        .map_err(|e| e.to_string())?;

    let outside = s.get_solution("sol-1").await;
    let _ = s.abort_snapshot(snap).await;
    match outside {
        Err(StorageError::NotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected NotFound, got {e}")),
        Ok(_) => Err("uncommitted solution visible outside snapshot".to_string()),
    }
}

async fn uncommitted_solution_invisible_to_list<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_solution(&mut snap, make_solution("sol-1"))
        .await
        .map_err(|e| e.to_string())?;

    let listed = s.list_solutions(None, 0).await;
    let _ = s.abort_snapshot(snap).await;
    let listed = listed.map_err(|e| e.to_string())?;
    if !listed.is_empty() {
        return Err(format!("expected empty list, got {} solutions", listed.len()));
    }
    Ok(())
}

async fn uncommitted_solution_visible_inside_snapshot<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_solution(&mut snap, make_solution("sol-1"))
        .await
        .map_err(|e| e.to_string())?;
    let inside = s.get_solution_for_update(&mut snap, "sol-1").await;
    let _ = s.abort_snapshot(snap).await;
    inside.map(|_| ()).map_err(|e| e.to_string())
}

async fn uncommitted_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut rec = s
        .get_solution_for_update(&mut snap, "sol-1")
        .await
        .map_err(|e| e.to_string())?;
    rec.status = SolutionStatus::Approved;
    s.update_solution(&mut snap, rec, 0)
        .await
        .map_err(|e| e.to_string())?;

    let outside = s.get_solution("sol-1").await;
    let _ = s.abort_snapshot(snap).await;
    let outside = outside.map_err(|e| e.to_string())?;
    if outside.status != SolutionStatus::PendingReview || outside.version != 0 {
        return Err(format!(
            "uncommitted update leaked: status {} version {}",
            outside.status, outside.version
        ));
    }
    Ok(())
}

async fn abort_discards_solution<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_solution(&mut snap, make_solution("sol-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    match s.get_solution("sol-1").await {
        Err(StorageError::NotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected NotFound, got {e}")),
        Ok(_) => Err("aborted solution is visible".to_string()),
    }
}

async fn dropped_snapshot_rolls_back<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    {
        let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
        s.insert_solution(&mut snap, make_solution("sol-1"))
            .await
            .map_err(|e| e.to_string())?;
        drop(snap);
    }

    // A new snapshot must be obtainable after a drop, and must not see the row.
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let inside = s.get_solution_for_update(&mut snap, "sol-1").await;
    let _ = s.abort_snapshot(snap).await;
    match inside {
        Err(StorageError::NotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected NotFound, got {e}")),
        Ok(_) => Err("dropped snapshot was committed".to_string()),
    }
}

async fn uncommitted_bom_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.replace_bom_items(
        &mut snap,
        "sol-1",
        vec![make_bom_item("b-1", "sol-1", 0), make_bom_item("b-2", "sol-1", 1)],
    )
    .await
    .map_err(|e| e.to_string())?;

    let outside = s.list_bom_items("sol-1").await;
    let _ = s.abort_snapshot(snap).await;
    let outside = outside.map_err(|e| e.to_string())?;
    if !outside.is_empty() {
        return Err(format!("uncommitted BOM rows visible: {}", outside.len()));
    }
    Ok(())
}

async fn uncommitted_transaction_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_payment(&s, "order-1", "tx-1", "trade-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let tx = s
        .get_transaction_by_external_id_for_update(&mut snap, PaymentProvider::Alipay, "trade-1")
        .await
        .map_err(|e| e.to_string())?;
    s.update_transaction_status(
        &mut snap,
        &tx.id,
        TransactionStatus::Pending,
        TransactionStatus::Completed,
        Some("2025010122001"),
        "2025-01-01T00:05:00Z",
    )
    .await
    .map_err(|e| e.to_string())?;

    let outside = s.get_transaction("tx-1").await;
    let _ = s.abort_snapshot(snap).await;
    let outside = outside.map_err(|e| e.to_string())?;
    if outside.status != TransactionStatus::Pending {
        return Err(format!("uncommitted status leaked: {}", outside.status));
    }
    Ok(())
}

async fn sequential_snapshots_see_prior_commits<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut rec = s
        .get_solution_for_update(&mut snap, "sol-1")
        .await
        .map_err(|e| e.to_string())?;
    rec.status = SolutionStatus::Approved;
    s.update_solution(&mut snap, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let seen = s.get_solution_for_update(&mut snap, "sol-1").await;
    let _ = s.abort_snapshot(snap).await;
    let seen = seen.map_err(|e| e.to_string())?;
    if seen.status != SolutionStatus::Approved || seen.version != 1 {
        return Err(format!(
            "expected APPROVED at version 1, got {} at version {}",
            seen.status, seen.version
        ));
    }
    Ok(())
}
