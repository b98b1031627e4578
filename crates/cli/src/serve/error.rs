//! Mapping domain errors onto HTTP responses.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use openaero_market::MarketError;

use super::json_error;

/// A failed API request. Rendered as `{"error": ..., "code": ...}`.
#[derive(Debug)]
pub(crate) struct ApiError(pub(crate) MarketError);

impl From<MarketError> for ApiError {
    fn from(e: MarketError) -> Self {
        ApiError(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(MarketError::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(MarketError::Validation(rejection.body_text()))
    }
}

pub(crate) fn status_of(e: &MarketError) -> StatusCode {
    match e {
        MarketError::Validation(_) => StatusCode::BAD_REQUEST,
        MarketError::NotFound(_) => StatusCode::NOT_FOUND,
        MarketError::Forbidden(_) => StatusCode::FORBIDDEN,
        MarketError::Conflict(_) => StatusCode::CONFLICT,
        MarketError::Internal(_) | MarketError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, %status, "request rejected");
        }
        json_error(status, self.0.code(), &self.0.to_string()).into_response()
    }
}
