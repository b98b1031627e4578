//! Marketplace route handlers. Each one resolves the caller from the auth
//! middleware, delegates to the domain service, and maps errors via
//! [`ApiError`].

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use openaero_market::lifecycle::{self, NewAsset, NewSolution};
use openaero_market::orders::{self, CreatedOrder, NewOrder};
use openaero_market::review::{self, CompleteReview, NewReviewRecord, ReviewOutcome};
use openaero_market::{bom, Actor, BomView};
use openaero_storage::{
    AssetRecord, MarketStorage, OrderRecord, PaymentEventRecord, ReviewRecord, SolutionRecord,
};
use serde::Deserialize;
use serde_json::Value;

use super::error::ApiError;
use super::json_error;
use super::state::AppState;

type Shared<S> = State<Arc<AppState<S>>>;
type ApiResult<T> = Result<Json<T>, ApiError>;

const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    limit: Option<usize>,
    transaction_id: Option<String>,
}

impl ListQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT)
    }
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

// -- Solutions ---------------------------------------------------------------

/// POST /api/solutions
pub(crate) async fn handle_create_solution<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    body: Result<Json<NewSolution>, JsonRejection>,
) -> Result<(StatusCode, Json<SolutionRecord>), ApiError> {
    let Json(input) = body?;
    let solution = lifecycle::create_solution(state.storage.as_ref(), &actor, input).await?;
    Ok((StatusCode::CREATED, Json(solution)))
}

/// GET /api/solutions/{id}
pub(crate) async fn handle_get_solution<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<SolutionRecord> {
    Ok(Json(
        lifecycle::get_solution(state.storage.as_ref(), &actor, &id).await?,
    ))
}

/// POST /api/solutions/{id}/submit
pub(crate) async fn handle_submit_solution<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<SolutionRecord> {
    Ok(Json(
        lifecycle::submit_solution(state.storage.as_ref(), &actor, &id).await?,
    ))
}

/// GET /api/solutions/{id}/bom
pub(crate) async fn handle_get_bom<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<BomView> {
    Ok(Json(bom::read_bom(state.storage.as_ref(), &actor, &id).await?))
}

/// PUT /api/solutions/{id}/bom
///
/// The body is checked against the BOM schema before anything is written.
pub(crate) async fn handle_put_bom<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<BomView> {
    let Json(payload) = body?;
    let view = bom::replace_bom(state.storage.as_ref(), state.flags, &actor, &id, &payload).await?;
    Ok(Json(view))
}

/// GET /api/solutions/{id}/assets
pub(crate) async fn handle_list_assets<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Vec<AssetRecord>> {
    Ok(Json(
        lifecycle::list_assets(state.storage.as_ref(), &actor, &id).await?,
    ))
}

/// POST /api/solutions/{id}/assets
pub(crate) async fn handle_add_asset<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    body: Result<Json<NewAsset>, JsonRejection>,
) -> Result<(StatusCode, Json<AssetRecord>), ApiError> {
    let Json(input) = body?;
    let asset = lifecycle::add_asset(state.storage.as_ref(), &actor, &id, input).await?;
    Ok((StatusCode::CREATED, Json(asset)))
}

// -- Review ------------------------------------------------------------------

/// GET /api/admin/solutions/queue
pub(crate) async fn handle_review_queue<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<SolutionRecord>> {
    let Query(query) = query?;
    Ok(Json(
        lifecycle::review_queue(state.storage.as_ref(), &actor, query.limit()).await?,
    ))
}

/// POST /api/admin/solutions/{id}/review/start
pub(crate) async fn handle_start_review<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<ReviewRecord> {
    Ok(Json(
        review::start_review(state.storage.as_ref(), &actor, &id).await?,
    ))
}

/// POST /api/admin/solutions/{id}/review/complete
///
/// The creator is notified once the review has committed. A notification
/// failure is logged and does not fail the request.
pub(crate) async fn handle_complete_review<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    body: Result<Json<CompleteReview>, JsonRejection>,
) -> ApiResult<ReviewOutcome> {
    let Json(input) = body?;
    let outcome = review::complete_review(state.storage.as_ref(), &actor, &id, input).await?;
    if let Err(e) = state
        .notifier
        .review_completed(&outcome.solution, &outcome.review)
        .await
    {
        tracing::warn!(solution_id = %id, error = %e, "review notification failed");
    }
    Ok(Json(outcome))
}

/// GET /api/admin/solutions/{id}/reviews
pub(crate) async fn handle_list_reviews<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<Vec<ReviewRecord>> {
    Ok(Json(
        review::list_reviews(state.storage.as_ref(), &actor, &id).await?,
    ))
}

/// POST /api/admin/solutions/{id}/reviews
pub(crate) async fn handle_create_review_record<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    body: Result<Json<NewReviewRecord>, JsonRejection>,
) -> Result<(StatusCode, Json<ReviewRecord>), ApiError> {
    let Json(input) = body?;
    let record = review::create_review_record(state.storage.as_ref(), &actor, &id, input).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// POST /api/admin/solutions/{id}/publish
pub(crate) async fn handle_publish_solution<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<SolutionRecord> {
    Ok(Json(
        lifecycle::publish_solution(state.storage.as_ref(), &actor, &id).await?,
    ))
}

// -- Orders ------------------------------------------------------------------

/// POST /api/orders
pub(crate) async fn handle_create_order<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    body: Result<Json<NewOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedOrder>), ApiError> {
    let Json(input) = body?;
    let created = orders::create_order(state.storage.as_ref(), &actor, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/orders/{id}
pub(crate) async fn handle_get_order<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> ApiResult<OrderRecord> {
    Ok(Json(orders::get_order(state.storage.as_ref(), &actor, &id).await?))
}

/// GET /api/admin/payments/events?transaction_id=&limit= (newest first)
pub(crate) async fn handle_payment_events<S: MarketStorage>(
    State(state): Shared<S>,
    Extension(actor): Extension<Actor>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<PaymentEventRecord>> {
    let Query(query) = query?;
    let events = orders::list_payment_events(
        state.storage.as_ref(),
        &actor,
        query.transaction_id.as_deref(),
        query.limit(),
    )
    .await?;
    Ok(Json(events))
}
