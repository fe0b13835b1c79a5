//! API error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use prokit_billing::BillingError;

/// Errors surfaced by API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("billing is not configured")]
    ServiceUnavailable,

    #[error("{0}")]
    Internal(String),
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            // Permanent request-level failures: Stripe's retries cannot fix
            // them, so they must not look like server errors.
            BillingError::WebhookSignatureInvalid
            | BillingError::MissingUserMetadata
            | BillingError::UnsupportedEvent(_)
            | BillingError::InvalidPlan(_) => ApiError::BadRequest(err.to_string()),

            BillingError::Unauthorized => ApiError::Forbidden,

            BillingError::SubscriptionNotFound(_) | BillingError::NoCustomer => ApiError::NotFound,

            // Transient upstream/storage failures: 500-class so the webhook
            // is redelivered and the admin sees an actionable message.
            BillingError::Stripe(_) | BillingError::Database(_) | BillingError::Internal(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
