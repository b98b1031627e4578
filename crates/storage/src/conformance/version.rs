//! Optimistic concurrency conformance tests for solution versions.

use std::future::Future;

use super::{make_solution, seed_solution, TestResult};
use crate::record::SolutionStatus;
use crate::{MarketStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "version",
        "version_starts_at_zero",
        version_starts_at_zero(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_returns_new_version",
        update_returns_new_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "record_version_field_is_ignored",
        record_version_field_is_ignored(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "sequential_updates_increment",
        sequential_updates_increment(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "second_update_same_snapshot_uses_new_version",
        second_update_same_snapshot_uses_new_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "wrong_version_returns_conflict",
        wrong_version_returns_conflict(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_does_not_change_record",
        conflict_does_not_change_record(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "stale_version_after_intervening_commit",
        stale_version_after_intervening_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "version_survives_abort",
        version_survives_abort(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_missing_solution_not_found",
        update_missing_solution_not_found(factory).await,
    ));

    results
}

/// Approve a solution at `expected` inside its own snapshot and commit.
async fn approve_at<S: MarketStorage>(s: &S, id: &str, expected: i64) -> Result<i64, StorageError> {
    let mut snap = s.begin_snapshot().await?;
    let mut rec = s.get_solution_for_update(&mut snap, id).await?;
    rec.status = SolutionStatus::Approved;
    match s.update_solution(&mut snap, rec, expected).await {
        Ok(v) => {
            s.commit_snapshot(snap).await?;
            Ok(v)
        }
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    }
}

async fn version_starts_at_zero<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;
    let got = s.get_solution("sol-1").await.map_err(|e| e.to_string())?;
    if got.version != 0 {
        return Err(format!("expected version 0, got {}", got.version));
    }
    Ok(())
}

async fn update_returns_new_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;
    let v = approve_at(&s, "sol-1", 0).await.map_err(|e| e.to_string())?;
    let got = s.get_solution("sol-1").await.map_err(|e| e.to_string())?;
    if v != 1 || got.version != 1 {
        return Err(format!("expected version 1, returned {v}, stored {}", got.version));
    }
    Ok(())
}

async fn record_version_field_is_ignored<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut rec = make_solution("sol-1");
    rec.version = 42;
    s.update_solution(&mut snap, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let got = s.get_solution("sol-1").await.map_err(|e| e.to_string())?;
    if got.version != 1 {
        return Err(format!("expected stored version 1, got {}", got.version));
    }
    Ok(())
}

async fn sequential_updates_increment<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;
    for expected in 0..5 {
        let v = approve_at(&s, "sol-1", expected)
            .await
            .map_err(|e| format!("update at {expected}: {e}"))?;
        if v != expected + 1 {
            return Err(format!("expected version {}, got {v}", expected + 1));
        }
    }
    Ok(())
}

async fn second_update_same_snapshot_uses_new_version<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let v1 = s
        .update_solution(&mut snap, make_solution("sol-1"), 0)
        .await
        .map_err(|e| e.to_string())?;
    let stale = s.update_solution(&mut snap, make_solution("sol-1"), 0).await;
    let v2 = s.update_solution(&mut snap, make_solution("sol-1"), v1).await;
    let _ = s.abort_snapshot(snap).await;

    if !matches!(stale, Err(StorageError::ConcurrentConflict { .. })) {
        return Err(format!("expected conflict on stale version, got {stale:?}"));
    }
    match v2 {
        Ok(2) => Ok(()),
        other => Err(format!("expected version 2, got {other:?}")),
    }
}

async fn wrong_version_returns_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;
    for wrong in [-1, 1, 7] {
        match approve_at(&s, "sol-1", wrong).await {
            Err(StorageError::ConcurrentConflict {
                solution_id,
                expected_version,
            }) => {
                if solution_id != "sol-1" || expected_version != wrong {
                    return Err(format!(
                        "conflict carries wrong fields: {solution_id} / {expected_version}"
                    ));
                }
            }
            other => return Err(format!("expected conflict at {wrong}, got {other:?}")),
        }
    }
    Ok(())
}

async fn conflict_does_not_change_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;
    let _ = approve_at(&s, "sol-1", 3).await;
    let got = s.get_solution("sol-1").await.map_err(|e| e.to_string())?;
    if got != make_solution("sol-1") {
        return Err(format!("conflicting update changed the record: {got:?}"));
    }
    Ok(())
}

/// Two writers read version 0; the first commits, the second must conflict.
async fn stale_version_after_intervening_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let read_version = s
        .get_solution("sol-1")
        .await
        .map_err(|e| e.to_string())?
        .version;
    approve_at(&s, "sol-1", read_version)
        .await
        .map_err(|e| e.to_string())?;

    match approve_at(&s, "sol-1", read_version).await {
        Err(StorageError::ConcurrentConflict { .. }) => Ok(()),
        other => Err(format!("expected ConcurrentConflict, got {other:?}")),
    }
}

async fn version_survives_abort<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.update_solution(&mut snap, make_solution("sol-1"), 0)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let v = approve_at(&s, "sol-1", 0).await.map_err(|e| e.to_string())?;
    if v != 1 {
        return Err(format!("expected version 1 after abort, got {v}"));
    }
    Ok(())
}

async fn update_missing_solution_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.update_solution(&mut snap, make_solution("ghost"), 0).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {other:?}")),
    }
}
