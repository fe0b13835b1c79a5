//! Manual subscription overrides
//!
//! Lets an administrator set a user's plan directly, bypassing the payment
//! provider. Writes go through the same upsert-by-user path as the webhook
//! handler; last write by wall-clock time wins (accepted conflict policy,
//! no version column).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use prokit_shared::UserRole;

use crate::client::{PaidPlan, StripeClient};
use crate::error::{BillingError, BillingResult};
use crate::reconcile;
use crate::store::{SubscriptionOrigin, SubscriptionRecord, SubscriptionStore, SubscriptionUpsert};

/// The administrator performing an override
#[derive(Debug, Clone, Copy)]
pub struct AdminActor {
    pub user_id: Uuid,
    pub role: UserRole,
}

/// Target plan for a manual override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOverride {
    Free,
    Monthly,
    Yearly,
    Lifetime,
}

impl PlanOverride {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanOverride::Free => "free",
            PlanOverride::Monthly => "monthly",
            PlanOverride::Yearly => "yearly",
            PlanOverride::Lifetime => "lifetime",
        }
    }

    /// The paid plan this override grants, if any
    pub fn paid_plan(&self) -> Option<PaidPlan> {
        match self {
            PlanOverride::Free => None,
            PlanOverride::Monthly => Some(PaidPlan::Monthly),
            PlanOverride::Yearly => Some(PaidPlan::Yearly),
            PlanOverride::Lifetime => Some(PaidPlan::Lifetime),
        }
    }
}

impl FromStr for PlanOverride {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanOverride::Free),
            "monthly" => Ok(PlanOverride::Monthly),
            "yearly" => Ok(PlanOverride::Yearly),
            "lifetime" => Ok(PlanOverride::Lifetime),
            other => Err(BillingError::InvalidPlan(other.to_string())),
        }
    }
}

impl fmt::Display for PlanOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of applying a manual override
#[derive(Debug, Serialize)]
pub struct OverrideOutcome {
    pub plan: PlanOverride,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    /// Whether a subscription row existed before this override
    pub had_existing_record: bool,
}

/// Administrative subscription editor
pub struct AdminSubscriptionService {
    stripe: StripeClient,
    store: SubscriptionStore,
}

impl AdminSubscriptionService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let store = SubscriptionStore::new(pool);
        Self { stripe, store }
    }

    /// Set a user's plan to free/monthly/yearly/lifetime, optionally with an
    /// explicit expiry date
    ///
    /// Authorization is enforced before any mutation. "free" deletes the
    /// row (no row = free tier). Paid plans extend additively from an
    /// existing unexpired period end unless a custom date is given, and
    /// preserve an existing provider subscription reference instead of
    /// orphaning it.
    pub async fn override_subscription(
        &self,
        actor: &AdminActor,
        target_user: Uuid,
        plan: PlanOverride,
        custom_end: Option<OffsetDateTime>,
    ) -> BillingResult<OverrideOutcome> {
        ensure_admin(actor)?;

        let paid = match plan.paid_plan() {
            None => {
                let deleted = self.store.delete_for_user(target_user).await?;
                if deleted == 0 {
                    tracing::info!(
                        user_id = %target_user,
                        admin_id = %actor.user_id,
                        "No subscription to revoke; user already on free tier"
                    );
                } else {
                    tracing::info!(
                        user_id = %target_user,
                        admin_id = %actor.user_id,
                        "Subscription revoked, user reverted to free tier"
                    );
                }
                return Ok(OverrideOutcome {
                    plan,
                    current_period_end: None,
                    had_existing_record: deleted > 0,
                });
            }
            Some(paid) => paid,
        };

        let now = OffsetDateTime::now_utc();
        let existing = self.store.find_by_user(target_user).await?;

        let period_end = reconcile::override_period_end(
            paid,
            existing.as_ref().map(|r| r.current_period_end),
            custom_end,
            now,
        );

        // Keep a real provider subscription reference if one exists so a
        // later webhook can still locate the row; mint a synthetic id only
        // when creating fresh.
        let stripe_subscription_id = existing
            .as_ref()
            .map(|r| r.stripe_subscription_id.clone())
            .unwrap_or_else(|| reconcile::manual_subscription_id(actor.user_id, now));

        self.store
            .upsert(&SubscriptionUpsert {
                user_id: target_user,
                stripe_subscription_id,
                stripe_customer_id: existing.as_ref().and_then(|r| r.stripe_customer_id.clone()),
                price_id: self.stripe.config().price_id(paid).to_string(),
                status: "active".to_string(),
                origin: SubscriptionOrigin::Manual,
                current_period_end: period_end,
                metadata: Some(serde_json::json!({
                    "updated_by": actor.user_id,
                    "kind": "admin_override",
                })),
            })
            .await?;

        tracing::info!(
            user_id = %target_user,
            admin_id = %actor.user_id,
            plan = %plan,
            period_end = %period_end,
            "Applied manual subscription override"
        );

        Ok(OverrideOutcome {
            plan,
            current_period_end: Some(period_end),
            had_existing_record: existing.is_some(),
        })
    }

    /// Fetch the target user's subscription row for the admin panel
    pub async fn subscription_details(
        &self,
        actor: &AdminActor,
        target_user: Uuid,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        ensure_admin(actor)?;
        self.store.find_by_user(target_user).await
    }
}

/// Reject non-administrators before any side effect
pub(crate) fn ensure_admin(actor: &AdminActor) -> BillingResult<()> {
    if actor.role.is_admin() {
        Ok(())
    } else {
        Err(BillingError::Unauthorized)
    }
}
