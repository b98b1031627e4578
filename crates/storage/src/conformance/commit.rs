use std::future::Future;

use super::{
    make_bom_item, make_event, make_order, make_review, make_solution, seed_solution, TestResult,
};
use crate::record::{PaymentEventKind, ReviewDecision, ReviewStatus, SolutionStatus};
use crate::{MarketStorage, StorageError};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    // Single record commit
    results.push(TestResult::from_result(
        "commit",
        "solution_update_committed",
        solution_update_committed(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "review_completion_committed",
        review_completion_committed(factory).await,
    ));

    // Multi-record atomicity
    results.push(TestResult::from_result(
        "commit",
        "review_and_solution_both_visible_after_commit",
        review_and_solution_both_visible_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "review_and_solution_neither_visible_after_abort",
        review_and_solution_neither_visible_after_abort(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "bom_rows_and_projection_committed_together",
        bom_rows_and_projection_committed_together(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "failed_step_then_abort_leaves_nothing",
        failed_step_then_abort_leaves_nothing(factory).await,
    ));

    // BOM replacement
    results.push(TestResult::from_result(
        "commit",
        "replace_bom_items_replaces_previous_rows",
        replace_bom_items_replaces_previous_rows(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "bom_items_listed_by_position",
        bom_items_listed_by_position(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "replace_with_empty_clears_rows",
        replace_with_empty_clears_rows(factory).await,
    ));

    // Queries after commit
    results.push(TestResult::from_result(
        "commit",
        "list_solutions_with_status_filter",
        list_solutions_with_status_filter(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "list_solutions_with_limit",
        list_solutions_with_limit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "list_reviews_in_start_order",
        list_reviews_in_start_order(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "multiple_commits_accumulate",
        multiple_commits_accumulate(factory).await,
    ));

    results
}

async fn solution_update_committed<S, F, Fut>(factory: &F) -> Result<(), String>
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
    rec.title = "Renamed".to_string();
    rec.updated_at = "2025-01-02T00:00:00Z".to_string();
    s.update_solution(&mut snap, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let got = s.get_solution("sol-1").await.map_err(|e| e.to_string())?;
    if got.title != "Renamed" || got.updated_at != "2025-01-02T00:00:00Z" {
        return Err(format!("update not committed: {got:?}"));
    }
    Ok(())
}

async fn review_completion_committed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.insert_review(&mut snap, make_review("rev-1", "sol-1", ReviewStatus::InProgress))
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let mut review = s
        .find_in_progress_review(&mut snap, "sol-1")
        .await
        .map_err(|e| e.to_string())?
        .ok_or("in-progress review not found")?;
    review.status = ReviewStatus::Completed;
    review.decision = ReviewDecision::Approved;
    review.to_status = Some(SolutionStatus::Approved);
    review.quality_score = Some(8);
    review.comments = Some("solid build".to_string());
    review.completed_at = Some("2025-01-01T01:00:00Z".to_string());
    s.update_review(&mut snap, review.clone())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let reviews = s.list_reviews("sol-1").await.map_err(|e| e.to_string())?;
    if reviews != vec![review] {
        return Err(format!("review not committed as written: {reviews:?}"));
    }

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    let open = s.find_in_progress_review(&mut snap, "sol-1").await;
    let _ = s.abort_snapshot(snap).await;
    if open.map_err(|e| e.to_string())?.is_some() {
        return Err("completed review still reported as in progress".to_string());
    }
    Ok(())
}

async fn review_and_solution_both_visible_after_commit<S, F, Fut>(
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
    let mut review = make_review("rev-1", "sol-1", ReviewStatus::Completed);
    review.decision = ReviewDecision::Rejected;
    review.to_status = Some(SolutionStatus::Rejected);
    s.insert_review(&mut snap, review)
        .await
        .map_err(|e| e.to_string())?;
    let mut rec = s
        .get_solution_for_update(&mut snap, "sol-1")
        .await
        .map_err(|e| e.to_string())?;
    rec.status = SolutionStatus::Rejected;
    s.update_solution(&mut snap, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let sol = s.get_solution("sol-1").await.map_err(|e| e.to_string())?;
    let reviews = s.list_reviews("sol-1").await.map_err(|e| e.to_string())?;
    if sol.status != SolutionStatus::Rejected || reviews.len() != 1 {
        return Err(format!(
            "expected REJECTED with 1 review, got {} with {}",
            sol.status,
            reviews.len()
        ));
    }
    Ok(())
}

async fn review_and_solution_neither_visible_after_abort<S, F, Fut>(
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
    s.insert_review(&mut snap, make_review("rev-1", "sol-1", ReviewStatus::Completed))
        .await
        .map_err(|e| e.to_string())?;
    let mut rec = s
        .get_solution_for_update(&mut snap, "sol-1")
        .await
        .map_err(|e| e.to_string())?;
    rec.status = SolutionStatus::Approved;
    s.update_solution(&mut snap, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    let sol = s.get_solution("sol-1").await.map_err(|e| e.to_string())?;
    let reviews = s.list_reviews("sol-1").await.map_err(|e| e.to_string())?;
    if sol.status != SolutionStatus::PendingReview || sol.version != 0 || !reviews.is_empty() {
        return Err(format!(
            "aborted snapshot leaked: {} v{} with {} reviews",
            sol.status,
            sol.version,
            reviews.len()
        ));
    }
    Ok(())
}

async fn bom_rows_and_projection_committed_together<S, F, Fut>(
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
    s.replace_bom_items(&mut snap, "sol-1", vec![make_bom_item("b-1", "sol-1", 0)])
        .await
        .map_err(|e| e.to_string())?;
    let mut rec = s
        .get_solution_for_update(&mut snap, "sol-1")
        .await
        .map_err(|e| e.to_string())?;
    rec.bom = Some(serde_json::json!({"items": [{"name": "Part 0"}], "itemCount": 1}));
    s.update_solution(&mut snap, rec, 0)
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let items = s.list_bom_items("sol-1").await.map_err(|e| e.to_string())?;
    let sol = s.get_solution("sol-1").await.map_err(|e| e.to_string())?;
    let count = sol
        .bom
        .as_ref()
        .and_then(|b| b.get("itemCount"))
        .and_then(|v| v.as_i64());
    if items.len() != 1 || count != Some(1) || sol.version != 1 {
        return Err(format!(
            "expected 1 row, projection itemCount 1 and version 1; got {} rows, {count:?}, v{}",
            items.len(),
            sol.version
        ));
    }
    Ok(())
}

/// A step fails midway; the caller aborts and earlier writes in the same
/// snapshot must be gone.
async fn failed_step_then_abort_leaves_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.append_payment_event(&mut snap, make_event("ev-1", None, PaymentEventKind::Ignored))
        .await
        .map_err(|e| e.to_string())?;
    let failed = s.insert_order(&mut snap, make_order("order-2", "sol-missing")).await;
    if !matches!(failed, Err(StorageError::NotFound { .. })) {
        let _ = s.abort_snapshot(snap).await;
        return Err(format!("expected NotFound for missing solution, got {failed:?}"));
    }
    s.abort_snapshot(snap).await.map_err(|e| e.to_string())?;

    if s.get_order("order-1").await.is_ok() {
        return Err("order from aborted snapshot is visible".to_string());
    }
    let events = s
        .list_payment_events(None, 0)
        .await
        .map_err(|e| e.to_string())?;
    if !events.is_empty() {
        return Err(format!("{} events from aborted snapshot visible", events.len()));
    }
    Ok(())
}

async fn replace_bom_items_replaces_previous_rows<S, F, Fut>(factory: &F) -> Result<(), String>
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
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.replace_bom_items(&mut snap, "sol-1", vec![make_bom_item("b-3", "sol-1", 0)])
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let items = s.list_bom_items("sol-1").await.map_err(|e| e.to_string())?;
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    if ids != ["b-3"] {
        return Err(format!("expected only b-3, got {ids:?}"));
    }
    Ok(())
}

async fn bom_items_listed_by_position<S, F, Fut>(factory: &F) -> Result<(), String>
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
        vec![
            make_bom_item("b-c", "sol-1", 2),
            make_bom_item("b-a", "sol-1", 0),
            make_bom_item("b-b", "sol-1", 1),
        ],
    )
    .await
    .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let items = s.list_bom_items("sol-1").await.map_err(|e| e.to_string())?;
    let positions: Vec<i32> = items.iter().map(|i| i.position).collect();
    if positions != [0, 1, 2] {
        return Err(format!("expected positions [0, 1, 2], got {positions:?}"));
    }
    if items[0] != make_bom_item("b-a", "sol-1", 0) {
        return Err(format!("BOM row fields not preserved: {:?}", items[0]));
    }
    Ok(())
}

async fn replace_with_empty_clears_rows<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.replace_bom_items(&mut snap, "sol-1", vec![make_bom_item("b-1", "sol-1", 0)])
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    s.replace_bom_items(&mut snap, "sol-1", Vec::new())
        .await
        .map_err(|e| e.to_string())?;
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let items = s.list_bom_items("sol-1").await.map_err(|e| e.to_string())?;
    if !items.is_empty() {
        return Err(format!("expected no rows, got {}", items.len()));
    }
    Ok(())
}

async fn list_solutions_with_status_filter<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for (id, status) in [
        ("sol-a", SolutionStatus::Draft),
        ("sol-b", SolutionStatus::PendingReview),
        ("sol-c", SolutionStatus::PendingReview),
        ("sol-d", SolutionStatus::Published),
    ] {
        let mut rec = make_solution(id);
        rec.status = status;
        s.insert_solution(&mut snap, rec)
            .await
            .map_err(|e| e.to_string())?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let pending = s
        .list_solutions(Some(SolutionStatus::PendingReview), 0)
        .await
        .map_err(|e| e.to_string())?;
    let ids: Vec<&str> = pending.iter().map(|r| r.id.as_str()).collect();
    if ids != ["sol-b", "sol-c"] {
        return Err(format!("expected [sol-b, sol-c], got {ids:?}"));
    }
    let all = s.list_solutions(None, 0).await.map_err(|e| e.to_string())?;
    if all.len() != 4 {
        return Err(format!("expected 4 solutions, got {}", all.len()));
    }
    Ok(())
}

async fn list_solutions_with_limit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for i in 0..5 {
        let mut rec = make_solution(&format!("sol-{i}"));
        rec.created_at = format!("2025-01-0{}T00:00:00Z", i + 1);
        s.insert_solution(&mut snap, rec)
            .await
            .map_err(|e| e.to_string())?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let limited = s.list_solutions(None, 2).await.map_err(|e| e.to_string())?;
    let ids: Vec<&str> = limited.iter().map(|r| r.id.as_str()).collect();
    if ids != ["sol-0", "sol-1"] {
        return Err(format!("expected the two oldest, got {ids:?}"));
    }
    Ok(())
}

async fn list_reviews_in_start_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_solution(&s, "sol-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| e.to_string())?;
    for (id, started) in [
        ("rev-late", "2025-01-03T00:00:00Z"),
        ("rev-early", "2025-01-01T00:00:00Z"),
        ("rev-mid", "2025-01-02T00:00:00Z"),
    ] {
        let mut review = make_review(id, "sol-1", ReviewStatus::Completed);
        review.started_at = started.to_string();
        s.insert_review(&mut snap, review)
            .await
            .map_err(|e| e.to_string())?;
    }
    s.commit_snapshot(snap).await.map_err(|e| e.to_string())?;

    let reviews = s.list_reviews("sol-1").await.map_err(|e| e.to_string())?;
    let ids: Vec<&str> = reviews.iter().map(|r| r.id.as_str()).collect();
    if ids != ["rev-early", "rev-mid", "rev-late"] {
        return Err(format!("unexpected review order {ids:?}"));
    }
    Ok(())
}

async fn multiple_commits_accumulate<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for i in 0..3 {
        seed_solution(&s, &format!("sol-{i}")).await?;
    }
    let all = s.list_solutions(None, 0).await.map_err(|e| e.to_string())?;
    if all.len() != 3 {
        return Err(format!("expected 3 solutions, got {}", all.len()));
    }
    Ok(())
}
