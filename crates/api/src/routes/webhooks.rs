//! Stripe webhook endpoint
//!
//! Responds 200 on successful handling or graceful no-op, 400 on
//! signature/metadata failures (permanent, no point retrying), and 500 on
//! internal failures so Stripe redelivers the event.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing Stripe-Signature header".to_string()))?;

    let event = billing.webhooks.verify_event(&body, signature)?;
    billing.webhooks.handle_event(event).await?;

    Ok(StatusCode::OK)
}
