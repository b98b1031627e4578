//! Record creation conformance tests.

use std::future::Future;

use super::{
    make_bom_item, make_order, make_review, make_solution,
    make_transaction, seed_solution, TestResult,
};
use crate::record::{AssetKind, AssetRecord, PaymentProvider, ReviewStatus, SolutionStatus};
use crate::{MarketStorage, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "init",
        "insert_solution_then_get",
        insert_solution_then_get(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "inserted_solution_fields_preserved",
        inserted_solution_fields_preserved(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "duplicate_solution_rejected",
        duplicate_solution_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "review_requires_existing_solution",
        review_requires_existing_solution(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "second_in_progress_review_rejected",
        second_in_progress_review_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "completed_reviews_do_not_block_new_review",
        completed_reviews_do_not_block_new_review(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "asset_insert_then_list",
        asset_insert_then_list(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "bom_requires_existing_solution",
        bom_requires_existing_solution(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "transaction_requires_existing_order",
        transaction_requires_existing_order(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "duplicate_external_id_rejected",
        duplicate_external_id_rejected(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "same_external_id_different_provider_allowed",
        same_external_id_different_provider_allowed(factory).await,
    ));

    results
}

async fn insert_solution_then_get<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;
    let rec = s.get_solution("sol-1").await.map_err(|e| e.to_string())?;
    if rec.version != 0 {
        return Err(format!("expected version 0, got {}", rec.version));
    }
    if rec.status != SolutionStatus::PendingReview {
        return Err(format!("expected PENDING_REVIEW, got {}", rec.status));
    }
    Ok(())
}

async fn inserted_solution_fields_preserved<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut original = make_solution("sol-1");
    original.bom = Some(serde_json::json!({"items": [{"name": "Frame", "quantity": 1}]}));
    original.category = None;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_solution(&mut snap, original.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let rec = s.get_solution("sol-1").await.map_err(|e| e.to_string())?;
    if rec != original {
        return Err(format!("round-tripped solution differs: {rec:?}"));
    }
    Ok(())
}

async fn duplicate_solution_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s.insert_solution(&mut snap, make_solution("sol-1")).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::AlreadyExists { .. }) => Ok(()),
        Err(e) => Err(format!("expected AlreadyExists, got {e}")),
        Ok(()) => Err("expected AlreadyExists, insert succeeded".to_string()),
    }
}

async fn review_requires_existing_solution<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .insert_review(
            &mut snap,
            make_review("rev-1", "missing", ReviewStatus::InProgress),
        )
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::NotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected NotFound, got {e}")),
        Ok(()) => Err("review for a missing solution was accepted".to_string()),
    }
}

async fn second_in_progress_review_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_review(
        &mut snap,
        make_review("rev-1", "sol-1", ReviewStatus::InProgress),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .insert_review(
            &mut snap,
            make_review("rev-2", "sol-1", ReviewStatus::InProgress),
        )
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::AlreadyExists { .. }) => {}
        Err(e) => return Err(format!("expected AlreadyExists, got {e}")),
        Ok(()) => return Err("second IN_PROGRESS review was accepted".to_string()),
    }

    let reviews = s.list_reviews("sol-1").await.map_err(|e| e.to_string())?;
    if reviews.len() != 1 {
        return Err(format!("expected 1 review, got {}", reviews.len()));
    }
    Ok(())
}

async fn completed_reviews_do_not_block_new_review<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_review(
        &mut snap,
        make_review("rev-1", "sol-1", ReviewStatus::Completed),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.insert_review(
        &mut snap,
        make_review("rev-2", "sol-1", ReviewStatus::InProgress),
    )
    .await
    .map_err(|e| e.to_string())?;
    let found = s
        .find_in_progress_review(&mut snap, "sol-1")
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    match found {
        Some(r) if r.id == "rev-2" => Ok(()),
        other => Err(format!("expected rev-2 in progress, got {other:?}")),
    }
}

async fn asset_insert_then_list<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let asset = AssetRecord {
        id: "asset-1".to_string(),
        solution_id: "sol-1".to_string(),
        kind: AssetKind::Model,
        url: "https://cdn.example.com/frame.step".to_string(),
        title: Some("Frame CAD".to_string()),
        description: None,
        created_at: "2025-01-01T00:00:00Z".to_string(),
    };
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_asset(&mut snap, asset.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let assets = s.list_assets("sol-1").await.map_err(|e| e.to_string())?;
    if assets != vec![asset] {
        return Err(format!("unexpected assets: {assets:?}"));
    }
    Ok(())
}

async fn bom_requires_existing_solution<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .replace_bom_items(&mut snap, "missing", vec![make_bom_item("b-1", "missing", 0)])
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::NotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected NotFound, got {e}")),
        Ok(()) => Err("BOM for a missing solution was accepted".to_string()),
    }
}

async fn transaction_requires_existing_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let result = s
        .insert_transaction(
            &mut snap,
            make_transaction("tx-1", "missing", PaymentProvider::Alipay, "trade-1"),
        )
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::NotFound { .. }) => Ok(()),
        Err(e) => Err(format!("expected NotFound, got {e}")),
        Ok(()) => Err("transaction for a missing order was accepted".to_string()),
    }
}

async fn duplicate_external_id_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_order(&mut snap, make_order("order-1", "sol-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_transaction(
        &mut snap,
        make_transaction("tx-1", "order-1", PaymentProvider::Alipay, "trade-1"),
    )
    .await
    .map_err(|e| e.to_string())?;
    let result = s
        .insert_transaction(
            &mut snap,
            make_transaction("tx-2", "order-1", PaymentProvider::Alipay, "trade-1"),
        )
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::AlreadyExists { .. }) => Ok(()),
        Err(e) => Err(format!("expected AlreadyExists, got {e}")),
        Ok(()) => Err("duplicate external id was accepted".to_string()),
    }
}

async fn same_external_id_different_provider_allowed<S, F, Fut>(
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
    s.insert_order(&mut snap, make_order("order-1", "sol-1"))
        .await
        .map_err(|e| e.to_string())?;
    s.insert_transaction(
        &mut snap,
        make_transaction("tx-1", "order-1", PaymentProvider::Alipay, "trade-1"),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.insert_transaction(
        &mut snap,
        make_transaction("tx-2", "order-1", PaymentProvider::Wechat, "trade-1"),
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    s.get_transaction("tx-2").await.map_err(|e| e.to_string())?;
    Ok(())
}
