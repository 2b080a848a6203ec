//! Error responses.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use payments::PaymentError;
use thiserror::Error;

/// Errors returned by handlers.
///
/// Rendered as `{"error": <kind>, "message": <text>}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// The request could not be parsed.
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Payment(e) => e.kind(),
            ApiError::BadRequest(_) => "BadRequest",
        }
    }

    pub fn status(&self) -> StatusCode {
        let ApiError::Payment(e) = self else {
            return StatusCode::BAD_REQUEST;
        };
        match e {
            PaymentError::Unauthorized => StatusCode::UNAUTHORIZED,
            PaymentError::Forbidden { .. } => StatusCode::FORBIDDEN,
            PaymentError::InvalidAmount(_)
            | PaymentError::AmountOutOfBounds { .. }
            | PaymentError::InvalidPaymentRequest(_)
            | PaymentError::InvalidMetadata(_)
            | PaymentError::Validation(_) => StatusCode::BAD_REQUEST,
            PaymentError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::DuplicatePayment(_) => StatusCode::CONFLICT,
            PaymentError::PaymentFailed(_)
            | PaymentError::RemoteUnreachable(_)
            | PaymentError::Remote(_) => StatusCode::BAD_GATEWAY,
            PaymentError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PaymentError::Configuration(_) | PaymentError::Storage(_) | PaymentError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "request failed: {}", self);
        } else {
            tracing::debug!(kind = self.kind(), "request rejected: {}", self);
        }

        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

/// Result type for handlers.
pub type Result<T> = std::result::Result<T, ApiError>;
