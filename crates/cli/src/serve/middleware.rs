//! HTTP middleware: rate limiting and API token authentication.

use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use openaero_storage::MarketStorage;

use super::state::AppState;
use super::{json_error, WEBHOOK_PREFIX};

/// Checks the per-IP request rate before routing.
///
/// Payment webhooks are exempt: providers deliver from a handful of addresses
/// and a throttled callback is only redelivered later.
pub(crate) async fn rate_limit_middleware<S: MarketStorage>(
    State(state): State<Arc<AppState<S>>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if request.uri().path().starts_with(WEBHOOK_PREFIX) {
        return next.run(request).await;
    }
    let ip = addr.ip();
    match state.rate_limiter.check(ip).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            tracing::warn!(%ip, retry_after, "rate limit exceeded");
            let body = serde_json::json!({
                "error": "rate limit exceeded",
                "code": "RATE_LIMITED",
                "retry_after": retry_after,
            });
            (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
        }
    }
}

/// Resolves `Authorization: Bearer <token>` or `X-API-Key: <token>` to an
/// [`Actor`](openaero_market::Actor) and stores it in the request extensions.
///
/// `/health` and the payment webhooks are exempt; providers authenticate by
/// signature instead.
pub(crate) async fn auth_middleware<S: MarketStorage>(
    State(state): State<Arc<AppState<S>>>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if path == "/health" || path.starts_with(WEBHOOK_PREFIX) {
        return next.run(request).await;
    }

    let headers = request.headers();
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()))
        .map(str::trim);

    let Some(token) = token else {
        return json_error(
            StatusCode::UNAUTHORIZED,
            "UNAUTHENTICATED",
            "authentication required",
        )
        .into_response();
    };
    let Some(actor) = state.tokens.get(token).cloned() else {
        return json_error(StatusCode::FORBIDDEN, "FORBIDDEN", "invalid API token").into_response();
    };

    tracing::debug!(user_id = %actor.user_id, role = %actor.role, "authenticated");
    request.extensions_mut().insert(actor);
    next.run(request).await
}
