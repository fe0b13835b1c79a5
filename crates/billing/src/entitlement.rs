//! Entitlement reads
//!
//! Answers "does this user currently have paid-tier access". Staff accounts
//! bypass the store entirely; everyone else is entitled iff their row's
//! status is active or trialing. Period end is not consulted on this path:
//! expiry arrives as a status transition via the webhook handler, and the
//! invariant checker surfaces rows where that transition is overdue.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use prokit_shared::UserRole;

use crate::client::StripeClient;
use crate::error::BillingResult;
use crate::reconcile;
use crate::store::SubscriptionStore;

/// Synthetic plan name shown to staff accounts
const ADMIN_PLAN_NAME: &str = "Admin Lifetime Pro";

/// Subscription view returned to the dashboard
#[derive(Debug, Serialize)]
pub struct SubscriptionSummary {
    pub status: String,
    pub price_id: Option<String>,
    pub plan_name: Option<String>,
    pub origin: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_end: OffsetDateTime,
}

/// Read-side entitlement service
pub struct EntitlementService {
    stripe: StripeClient,
    store: SubscriptionStore,
}

impl EntitlementService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let store = SubscriptionStore::new(pool);
        Self { stripe, store }
    }

    /// Whether the user may access paid-tier features
    pub async fn is_entitled(&self, user_id: Uuid, role: UserRole) -> BillingResult<bool> {
        if role.is_admin() {
            return Ok(true);
        }

        let record = self.store.find_by_user(user_id).await?;
        Ok(reconcile::entitlement_decision(
            role,
            record.as_ref().map(|r| r.status.as_str()),
        ))
    }

    /// The user's current subscription, as shown on the dashboard
    ///
    /// Staff accounts get a synthetic always-active summary so the product
    /// is usable unencumbered; regular users get their stored row, or `None`
    /// when they are on the free tier.
    pub async fn current_subscription(
        &self,
        user_id: Uuid,
        role: UserRole,
    ) -> BillingResult<Option<SubscriptionSummary>> {
        if role.is_admin() {
            return Ok(Some(SubscriptionSummary {
                status: "active".to_string(),
                price_id: None,
                plan_name: Some(ADMIN_PLAN_NAME.to_string()),
                origin: None,
                current_period_end: reconcile::add_calendar_months(
                    OffsetDateTime::now_utc(),
                    10 * 12,
                ),
            }));
        }

        let record = match self.store.find_by_user(user_id).await? {
            Some(record) => record,
            None => return Ok(None),
        };

        let plan_name = self
            .stripe
            .config()
            .plan_for_price(&record.price_id)
            .map(|plan| plan.display_name().to_string());

        Ok(Some(SubscriptionSummary {
            status: record.status,
            price_id: Some(record.price_id),
            plan_name,
            origin: Some(record.origin),
            current_period_end: record.current_period_end,
        }))
    }
}
