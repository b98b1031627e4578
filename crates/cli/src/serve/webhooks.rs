//! Payment provider callbacks. These routes skip token auth; the reconciler
//! checks the provider signature instead.
//!
//! Alipay gets a plain `success` on acceptance and a JSON error otherwise.
//! WeChat always gets its XML envelope.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use openaero_market::payment::{alipay, wechat, AlipayNotification};
use openaero_market::WebhookError;
use openaero_storage::MarketStorage;

use super::json_error;
use super::state::AppState;

pub(crate) fn webhook_status(e: &WebhookError) -> StatusCode {
    match e {
        WebhookError::Malformed(_)
        | WebhookError::SignatureInvalid
        | WebhookError::AmountMismatch { .. } => StatusCode::BAD_REQUEST,
        WebhookError::UnknownTransaction(_) => StatusCode::NOT_FOUND,
        WebhookError::Conflict(_) => StatusCode::CONFLICT,
        WebhookError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        WebhookError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().starts_with("application/json"))
}

fn log_failure(provider: &str, e: &WebhookError) {
    if matches!(e, WebhookError::Storage(_)) {
        tracing::error!(provider, error = %e, "webhook processing failed");
    } else {
        tracing::warn!(provider, code = e.code(), error = %e, "webhook rejected");
    }
}

/// POST /api/payments/webhook/alipay
///
/// Accepts a form-encoded body, or a flat JSON object when the content type
/// says so.
pub(crate) async fn handle_alipay_webhook<S: MarketStorage>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let notification = if is_json(&headers) {
        AlipayNotification::from_json(&body)
    } else {
        Ok(AlipayNotification::from_form(&body))
    };
    let result = match notification {
        Ok(n) => state.reconciler.handle_alipay(&n).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(outcome) => {
            tracing::info!(provider = "alipay", %outcome, "webhook accepted");
            (
                StatusCode::OK,
                [(CONTENT_TYPE, "text/plain; charset=utf-8")],
                alipay::ACK_BODY,
            )
                .into_response()
        }
        Err(e) => {
            log_failure("alipay", &e);
            json_error(webhook_status(&e), e.code(), &e.to_string()).into_response()
        }
    }
}

fn wechat_reply(status: StatusCode, return_code: &str, return_msg: &str) -> Response {
    (
        status,
        [(CONTENT_TYPE, "application/xml; charset=utf-8")],
        wechat::reply(return_code, return_msg),
    )
        .into_response()
}

/// POST /api/payments/webhook/wechat
pub(crate) async fn handle_wechat_webhook<S: MarketStorage>(
    State(state): State<Arc<AppState<S>>>,
    body: Bytes,
) -> Response {
    let result = match std::str::from_utf8(&body) {
        Ok(text) => match wechat::parse_xml(text) {
            Ok(params) => state.reconciler.handle_wechat(&params).await,
            Err(e) => Err(e),
        },
        Err(_) => Err(WebhookError::Malformed("body is not UTF-8".to_string())),
    };
    match result {
        Ok(outcome) => {
            tracing::info!(provider = "wechat", %outcome, "webhook accepted");
            wechat_reply(StatusCode::OK, "SUCCESS", "OK")
        }
        Err(e) => {
            log_failure("wechat", &e);
            wechat_reply(webhook_status(&e), "FAIL", &e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use rust_decimal::Decimal;

    #[test]
    fn statuses() {
        assert_eq!(
            webhook_status(&WebhookError::SignatureInvalid),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            webhook_status(&WebhookError::AmountMismatch {
                expected: Decimal::ONE,
                received: Decimal::TWO,
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            webhook_status(&WebhookError::UnknownTransaction("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            webhook_status(&WebhookError::NotConfigured("WeChat".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn json_content_type_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(is_json(&headers));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        assert!(!is_json(&headers));
    }
}
