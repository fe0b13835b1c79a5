//! Billing self-service routes

use axum::extract::{Extension, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use prokit_billing::{CheckoutRedirect, PaidPlan, PortalResponse, SubscriptionSummary};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Request to create a checkout session
#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    /// One of monthly | yearly | lifetime
    pub plan: String,
}

/// Entitlement check response
#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    pub entitled: bool,
}

/// Create a checkout session (or a portal redirect for plan switches)
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<Json<CheckoutRedirect>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let plan = req.plan.parse::<PaidPlan>().map_err(ApiError::from)?;
    let email = auth_user
        .email
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("account has no email address".to_string()))?;

    let redirect = billing
        .checkout
        .create_checkout(auth_user.user_id, email, plan)
        .await?;

    Ok(Json(redirect))
}

/// Create a billing-portal session for self-service management
pub async fn create_portal(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<PortalResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let response = billing.portal.create_portal(auth_user.user_id).await?;
    Ok(Json(response))
}

/// The caller's current subscription, if any
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<Option<SubscriptionSummary>>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let summary = billing
        .entitlement
        .current_subscription(auth_user.user_id, auth_user.role)
        .await?;

    Ok(Json(summary))
}

/// Whether the caller may access paid-tier features
pub async fn get_entitlement(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<EntitlementResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let entitled = billing
        .entitlement
        .is_entitled(auth_user.user_id, auth_user.role)
        .await?;

    Ok(Json(EntitlementResponse { entitled }))
}
