use std::future::Future;
use std::sync::Arc;

use super::{make_solution, seed_payment, seed_solution, TestResult};
use crate::record::{OrderStatus, SolutionStatus, TransactionStatus};
use crate::{MarketStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_solution_updates_exactly_one_wins",
        concurrent_solution_updates_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_solution_inserts_exactly_one_wins",
        concurrent_solution_inserts_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_different_solutions_all_succeed",
        concurrent_updates_different_solutions_all_succeed(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_payment_completion_exactly_one_wins",
        concurrent_payment_completion_exactly_one_wins(factory).await,
    ));

    results
}

// ── Concurrent solution update: exactly one wins ────────────────────────────

/// N tasks each open a snapshot and attempt to approve the same solution from
/// version 0. Exactly one commit succeeds; the rest must get
/// ConcurrentConflict, and the final record is at version 1.
async fn concurrent_solution_updates_exactly_one_wins<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_solution(storage.as_ref(), "sol-1").await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let mut rec = make_solution("sol-1");
            rec.status = SolutionStatus::Approved;
            rec.reviewed_at = Some(format!("2025-01-01T00:00:{i:02}Z"));
            match s.update_solution(&mut snap, rec, 0).await {
                Ok(_new_version) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::ConcurrentConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let (winners, losers) = tally(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }

    let record = storage
        .get_solution("sol-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if record.version != 1 || record.status != SolutionStatus::Approved {
        return Err(format!(
            "expected APPROVED at version 1, got {} at version {}",
            record.status, record.version
        ));
    }
    Ok(())
}

// ── Concurrent insert: exactly one wins ─────────────────────────────────────

async fn concurrent_solution_inserts_exactly_one_wins<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            match s.insert_solution(&mut snap, make_solution("sol-1")).await {
                Ok(()) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::AlreadyExists { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let (winners, losers) = tally(handles).await?;
    if winners != 1 || losers != N - 1 {
        return Err(format!(
            "expected 1 winner and {} losers, got {winners} and {losers}",
            N - 1
        ));
    }
    Ok(())
}

// ── Concurrent updates to different solutions: all succeed ──────────────────

/// No false conflicts when there is no contention.
async fn concurrent_updates_different_solutions_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    for i in 0..N {
        seed_solution(storage.as_ref(), &format!("sol-{i}")).await?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let mut rec = s.get_solution_for_update(&mut snap, &format!("sol-{i}")).await?;
            rec.status = SolutionStatus::Rejected;
            s.update_solution(&mut snap, rec, 0).await?;
            s.commit_snapshot(snap).await?;
            Ok::<(), StorageError>(())
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        handle
            .await
            .map_err(|e| format!("task {i} panic: {e}"))?
            .map_err(|e| format!("task {i} failed: {e}"))?;
    }

    for i in 0..N {
        let record = storage
            .get_solution(&format!("sol-{i}"))
            .await
            .map_err(|e| format!("get sol-{i}: {e}"))?;
        if record.status != SolutionStatus::Rejected || record.version != 1 {
            return Err(format!(
                "sol-{i}: expected REJECTED at version 1, got {} at version {}",
                record.status, record.version
            ));
        }
    }
    Ok(())
}

// ── Concurrent payment completion: exactly one wins ─────────────────────────

/// N redeliveries race to complete the same PENDING transaction. Exactly one
/// moves it to COMPLETED and confirms the order; the rest see StatusConflict.
async fn concurrent_payment_completion_exactly_one_wins<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_payment(storage.as_ref(), "order-1", "tx-1", "trade-1").await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let at = format!("2025-01-01T00:01:{i:02}Z");
            let result = s
                .update_transaction_status(
                    &mut snap,
                    "tx-1",
                    TransactionStatus::Pending,
                    TransactionStatus::Completed,
                    Some(&format!("provider-{i}")),
                    &at,
                )
                .await;
            match result {
                Ok(()) => {
                    s.update_order_status(
                        &mut snap,
                        "order-1",
                        OrderStatus::Pending,
                        OrderStatus::Confirmed,
                        &at,
                    )
                    .await?;
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::StatusConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let (winners, losers) = tally(handles).await?;
    if winners != 1 || losers != N - 1 {
        return Err(format!(
            "expected 1 winner and {} losers, got {winners} and {losers}",
            N - 1
        ));
    }

    let order = storage
        .get_order("order-1")
        .await
        .map_err(|e| format!("get order: {e}"))?;
    if order.status != OrderStatus::Confirmed {
        return Err(format!("expected order CONFIRMED, got {}", order.status));
    }
    Ok(())
}

async fn tally(
    handles: Vec<tokio::task::JoinHandle<Result<bool, StorageError>>>,
) -> Result<(usize, usize), String> {
    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }
    Ok((winners, losers))
}
