//! Admin panel routes for subscription management

use axum::extract::{Extension, Path, State};
use axum::Json;
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use prokit_billing::{
    AdminActor, InvariantCheckSummary, OverrideOutcome, PlanOverride, SubscriptionRecord,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Request to manually set a user's subscription plan
#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    /// One of free | monthly | yearly | lifetime
    pub plan: String,
    /// Optional RFC 3339 expiry; overrides the additive extension
    pub custom_period_end: Option<String>,
}

/// Apply a manual subscription override to a user
pub async fn update_user_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateSubscriptionRequest>,
) -> Result<Json<OverrideOutcome>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let plan = req.plan.parse::<PlanOverride>().map_err(ApiError::from)?;
    let custom_end = req
        .custom_period_end
        .as_deref()
        .map(|value| OffsetDateTime::parse(value, &Rfc3339))
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("invalid custom_period_end: {}", e)))?;

    let actor = AdminActor {
        user_id: auth_user.user_id,
        role: auth_user.role,
    };

    let outcome = billing
        .admin
        .override_subscription(&actor, user_id, plan, custom_end)
        .await?;

    tracing::info!(
        admin_id = %auth_user.user_id,
        user_id = %user_id,
        plan = %outcome.plan,
        "Manual subscription override applied"
    );

    Ok(Json(outcome))
}

/// Fetch a user's subscription row for the admin panel
pub async fn get_user_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Option<SubscriptionRecord>>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let actor = AdminActor {
        user_id: auth_user.user_id,
        role: auth_user.role,
    };

    let record = billing.admin.subscription_details(&actor, user_id).await?;
    Ok(Json(record))
}

/// Run the billing invariant checks
pub async fn run_invariant_checks(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<InvariantCheckSummary>, ApiError> {
    if !auth_user.role.is_admin() {
        return Err(ApiError::Forbidden);
    }

    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let summary = billing.invariants.run_all_checks().await?;
    Ok(Json(summary))
}
