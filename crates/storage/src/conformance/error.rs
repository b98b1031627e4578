//! Error variant conformance tests.
//!
//! Every lookup of a missing record must return `NotFound`, never a backend
//! error or a default value.

use std::future::Future;

use super::{make_review, seed_solution, TestResult};
use crate::record::{OrderStatus, PaymentProvider, ReviewStatus, TransactionStatus};
use crate::{MarketStorage, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "error",
        "get_missing_solution_not_found",
        get_missing_solution_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_missing_solution_for_update_not_found",
        get_missing_solution_for_update_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "update_missing_review_not_found",
        update_missing_review_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_missing_order_not_found",
        get_missing_order_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "update_missing_order_not_found",
        update_missing_order_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "get_missing_transaction_not_found",
        get_missing_transaction_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "lookup_unknown_external_id_not_found",
        lookup_unknown_external_id_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "update_missing_transaction_not_found",
        update_missing_transaction_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "error",
        "empty_queries_return_empty_lists",
        empty_queries_return_empty_lists(factory).await,
    ));

    results
}

fn expect_not_found<T: std::fmt::Debug>(result: Result<T, StorageError>) -> Result<(), String> {
    match result {
        Err(StorageError::NotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected NotFound, got {e}")),
        Ok(v) => Err(format!("expected NotFound, got {v:?}")),
    }
}

async fn get_missing_solution_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    expect_not_found(s.get_solution("nope").await)
}

async fn get_missing_solution_for_update_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.get_solution_for_update(&mut snap, "nope").await;
    let _ = s.abort_snapshot(snap).await;
    expect_not_found(result)
}

async fn update_missing_review_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_review(
            &mut snap,
            make_review("rev-missing", "sol-1", ReviewStatus::Completed),
        )
        .await;
    let _ = s.abort_snapshot(snap).await;
    expect_not_found(result)
}

async fn get_missing_order_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    expect_not_found(s.get_order("nope").await)
}

async fn update_missing_order_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_order_status(
            &mut snap,
            "nope",
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            "2025-01-01T00:00:00Z",
        )
        .await;
    let _ = s.abort_snapshot(snap).await;
    expect_not_found(result)
}

async fn get_missing_transaction_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    expect_not_found(s.get_transaction("nope").await)
}

async fn lookup_unknown_external_id_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .get_transaction_by_external_id_for_update(&mut snap, PaymentProvider::Wechat, "nope")
        .await;
    let _ = s.abort_snapshot(snap).await;
    expect_not_found(result)
}

async fn update_missing_transaction_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .update_transaction_status(
            &mut snap,
            "nope",
            TransactionStatus::Pending,
            TransactionStatus::Completed,
            None,
            "2025-01-01T00:00:00Z",
        )
        .await;
    let _ = s.abort_snapshot(snap).await;
    expect_not_found(result)
}

async fn empty_queries_return_empty_lists<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let solutions = s.list_solutions(None, 0).await.map_err(|e| e.to_string())?;
    let reviews = s.list_reviews("nope").await.map_err(|e| e.to_string())?;
    let items = s.list_bom_items("nope").await.map_err(|e| e.to_string())?;
    let assets = s.list_assets("nope").await.map_err(|e| e.to_string())?;
    let events = s
        .list_payment_events(None, 0)
        .await
        .map_err(|e| e.to_string())?;
    if !(solutions.is_empty()
        && reviews.is_empty()
        && items.is_empty()
        && assets.is_empty()
        && events.is_empty())
    {
        return Err("expected every list on an empty store to be empty".to_string());
    }
    Ok(())
}
