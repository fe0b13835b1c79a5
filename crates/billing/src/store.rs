//! Subscription record store
//!
//! A last-write-wins projection of each user's current entitlement: at most
//! one row per user, enforced by a unique index on `user_id`. Both the
//! webhook handler and the admin override path write through [`SubscriptionStore::upsert`],
//! which replaces every mutable field, so concurrent writers converge on the
//! later write without an optimistic-concurrency token.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::reconcile;

/// Provenance of a subscription row
///
/// Written explicitly on every mutation; never inferred from identifier
/// prefixes at read time. Reconciliation rules differ by origin: only
/// `provider` rows reference a real recurring subscription that must be
/// canceled when a lifetime purchase supersedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionOrigin {
    /// Real recurring subscription at the payment provider
    Provider,
    /// One-time lifetime purchase
    Lifetime,
    /// Manual administrative grant
    Manual,
}

impl SubscriptionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionOrigin::Provider => "provider",
            SubscriptionOrigin::Lifetime => "lifetime",
            SubscriptionOrigin::Manual => "manual",
        }
    }
}

impl FromStr for SubscriptionOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provider" => Ok(SubscriptionOrigin::Provider),
            "lifetime" => Ok(SubscriptionOrigin::Lifetime),
            "manual" => Ok(SubscriptionOrigin::Manual),
            other => Err(format!("unknown subscription origin: {}", other)),
        }
    }
}

impl fmt::Display for SubscriptionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's current subscription row
///
/// `status` is the provider's lifecycle string, stored opaquely and never
/// reinterpreted; `origin` is the explicit provenance tag.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_subscription_id: String,
    pub stripe_customer_id: Option<String>,
    pub price_id: String,
    pub status: String,
    pub origin: String,
    #[serde(with = "time::serde::rfc3339")]
    pub current_period_end: OffsetDateTime,
    pub metadata: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl SubscriptionRecord {
    /// Entitlement is a function of status alone; period end is enforced by
    /// provider lifecycle transitions, not by date comparison on read.
    pub fn is_entitled(&self) -> bool {
        reconcile::is_entitled_status(&self.status)
    }

    pub fn has_origin(&self, origin: SubscriptionOrigin) -> bool {
        self.origin == origin.as_str()
    }
}

/// Complete replacement payload for a user's subscription row
#[derive(Debug, Clone)]
pub struct SubscriptionUpsert {
    pub user_id: Uuid,
    pub stripe_subscription_id: String,
    pub stripe_customer_id: Option<String>,
    pub price_id: String,
    pub status: String,
    pub origin: SubscriptionOrigin,
    pub current_period_end: OffsetDateTime,
    pub metadata: Option<serde_json::Value>,
}

/// Data access for the `subscriptions` table
#[derive(Clone)]
pub struct SubscriptionStore {
    pool: PgPool,
}

impl SubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or fully replace the row for a user
    ///
    /// Keyed by `user_id`: replaying the same event converges to the same
    /// row, and the unique index keeps the at-most-one-row invariant at the
    /// data layer.
    pub async fn upsert(&self, record: &SubscriptionUpsert) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, stripe_subscription_id, stripe_customer_id,
                price_id, status, origin, current_period_end, metadata,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW()
            )
            ON CONFLICT (user_id) DO UPDATE SET
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                price_id = EXCLUDED.price_id,
                status = EXCLUDED.status,
                origin = EXCLUDED.origin,
                current_period_end = EXCLUDED.current_period_end,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.user_id)
        .bind(&record.stripe_subscription_id)
        .bind(record.stripe_customer_id.as_ref())
        .bind(&record.price_id)
        .bind(&record.status)
        .bind(record.origin.as_str())
        .bind(record.current_period_end)
        .bind(record.metadata.as_ref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_user(&self, user_id: Uuid) -> BillingResult<Option<SubscriptionRecord>> {
        let record: Option<SubscriptionRecord> =
            sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }

    /// The user's active recurring subscription at the provider, if any
    ///
    /// Matched on the explicit origin tag; lifetime and manual rows are
    /// excluded because there is nothing to cancel at the provider for them.
    pub async fn find_active_recurring(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let record: Option<SubscriptionRecord> = sqlx::query_as(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = $1 AND status = 'active' AND origin = 'provider'
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Update status/price/period-end on the row matched by provider
    /// subscription id. Returns the number of rows touched; zero means the
    /// event referenced a subscription this store has never seen.
    pub async fn update_from_provider(
        &self,
        stripe_subscription_id: &str,
        status: &str,
        price_id: Option<&str>,
        current_period_end: OffsetDateTime,
    ) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $2,
                price_id = COALESCE($3, price_id),
                current_period_end = $4,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(stripe_subscription_id)
        .bind(status)
        .bind(price_id)
        .bind(current_period_end)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Mark the row canceled without deleting it; a canceled record still
    /// answers "when did access end".
    pub async fn mark_canceled(&self, stripe_subscription_id: &str) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'canceled', updated_at = NOW()
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(stripe_subscription_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Delete the user's row outright (no row = free tier)
    pub async fn delete_for_user(&self, user_id: Uuid) -> BillingResult<u64> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
