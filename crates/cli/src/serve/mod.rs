//! `openaero serve` -- the marketplace HTTP API.
//!
//! Security:
//! - Bearer / X-API-Key tokens resolve to an actor (user id + role); every
//!   route except /health and the payment webhooks requires one
//! - Payment webhooks authenticate by provider signature
//! - Per-IP rate limiting (default 60 req/min)
//! - CORS headers on all responses
//!
//! Endpoints:
//! - GET      /health
//! - POST     /api/solutions
//! - GET      /api/solutions/{id}
//! - POST     /api/solutions/{id}/submit
//! - GET, PUT /api/solutions/{id}/bom
//! - GET, POST /api/solutions/{id}/assets
//! - GET      /api/admin/solutions/queue
//! - POST     /api/admin/solutions/{id}/review/start
//! - POST     /api/admin/solutions/{id}/review/complete
//! - GET, POST /api/admin/solutions/{id}/reviews
//! - POST     /api/admin/solutions/{id}/publish
//! - POST     /api/orders
//! - GET      /api/orders/{id}
//! - GET      /api/admin/payments/events
//! - POST     /api/payments/webhook/alipay
//! - POST     /api/payments/webhook/wechat

mod error;
mod handlers;
mod middleware;
mod state;
mod webhooks;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use openaero_market::{FixedRateRevenueShare, LogNotifier, PaymentReconciler};
use openaero_storage::MarketStorage;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use self::handlers::*;
use self::middleware::{auth_middleware, rate_limit_middleware};
use self::state::{AppState, RateLimiter};
use self::webhooks::{handle_alipay_webhook, handle_wechat_webhook};
use crate::config::Config;

/// Maximum request body size: 2 MB.
const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Rate limit window duration in seconds (1 minute).
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Routes under this prefix authenticate by signature, not by token.
const WEBHOOK_PREFIX: &str = "/api/payments/webhook/";

/// Construct a JSON error response.
fn json_error(status: StatusCode, code: &str, message: &str) -> impl IntoResponse {
    (
        status,
        Json(serde_json::json!({"error": message, "code": code})),
    )
}

/// Certificate and key for HTTPS.
#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

fn build_state<S: MarketStorage>(
    config: &Config,
    storage: Arc<S>,
) -> Result<AppState<S>, Box<dyn std::error::Error>> {
    let revenue_share = Arc::new(FixedRateRevenueShare::new(
        config.payments.platform_fee_rate,
    )?);
    let mut reconciler = PaymentReconciler::new(storage.clone(), revenue_share);
    match config.alipay_verifier()? {
        Some(verifier) => reconciler = reconciler.with_alipay_verifier(Arc::new(verifier)),
        None => tracing::warn!("ALIPAY_PUBLIC_KEY not set; Alipay webhooks will be refused"),
    }
    match &config.payments.wechat_api_key {
        Some(key) => reconciler = reconciler.with_wechat_api_key(key.clone()),
        None => tracing::warn!("WECHAT_API_KEY not set; WeChat webhooks will be refused"),
    }

    let tokens = config.actors();
    if tokens.is_empty() {
        tracing::warn!("no API tokens configured; only /health and webhooks are reachable");
    }

    Ok(AppState {
        storage,
        reconciler,
        flags: config.features,
        notifier: Arc::new(LogNotifier),
        rate_limiter: RateLimiter::new(config.server.rate_limit),
        tokens,
    })
}

pub(crate) fn router<S: MarketStorage>(state: Arc<AppState<S>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/solutions", post(handle_create_solution::<S>))
        .route("/api/solutions/{id}", get(handle_get_solution::<S>))
        .route("/api/solutions/{id}/submit", post(handle_submit_solution::<S>))
        .route(
            "/api/solutions/{id}/bom",
            get(handle_get_bom::<S>).put(handle_put_bom::<S>),
        )
        .route(
            "/api/solutions/{id}/assets",
            get(handle_list_assets::<S>).post(handle_add_asset::<S>),
        )
        .route("/api/admin/solutions/queue", get(handle_review_queue::<S>))
        .route(
            "/api/admin/solutions/{id}/review/start",
            post(handle_start_review::<S>),
        )
        .route(
            "/api/admin/solutions/{id}/review/complete",
            post(handle_complete_review::<S>),
        )
        .route(
            "/api/admin/solutions/{id}/reviews",
            get(handle_list_reviews::<S>).post(handle_create_review_record::<S>),
        )
        .route(
            "/api/admin/solutions/{id}/publish",
            post(handle_publish_solution::<S>),
        )
        .route("/api/orders", post(handle_create_order::<S>))
        .route("/api/orders/{id}", get(handle_get_order::<S>))
        .route("/api/admin/payments/events", get(handle_payment_events::<S>))
        .route(
            "/api/payments/webhook/alipay",
            post(handle_alipay_webhook::<S>),
        )
        .route(
            "/api/payments/webhook/wechat",
            post(handle_wechat_webhook::<S>),
        )
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::<S>,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware::<S>,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API over `storage` until Ctrl+C.
///
/// With `tls` (and the `tls` feature) the server listens over HTTPS using
/// `axum-server` with rustls; otherwise plain HTTP.
pub async fn start_server<S: MarketStorage>(
    config: &Config,
    storage: Arc<S>,
    _tls: Option<TlsPaths>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(build_state(config, storage)?);
    tracing::info!(
        rate_limit = config.server.rate_limit,
        bom_dual_write = config.features.bom_dual_write,
        platform_fee_rate = %config.payments.platform_fee_rate,
        "server configured"
    );
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    #[cfg(feature = "tls")]
    if let Some(tls) = &_tls {
        let rustls =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;
        tracing::info!("OpenAero listening on https://{addr}");
        axum_server::bind_rustls(addr, rustls)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await?;
        return Ok(());
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("OpenAero listening on http://{addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
