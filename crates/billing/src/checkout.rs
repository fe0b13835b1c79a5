//! Checkout session creation
//!
//! Creates Stripe checkout sessions for new purchases. A user who already
//! holds an active recurring subscription and wants another recurring plan
//! is sent to the billing portal instead, where Stripe applies standard
//! proration to the switch; buying lifetime always goes through checkout
//! (the webhook cancels the superseded subscription).

use std::collections::HashMap;

use serde::Serialize;
use sqlx::PgPool;
use stripe::{
    BillingPortalSession, CheckoutSession, CheckoutSessionMode, CreateBillingPortalSession,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCustomer, Customer, CustomerId,
};
use uuid::Uuid;

use crate::client::{PaidPlan, StripeClient};
use crate::error::{BillingError, BillingResult};
use crate::store::SubscriptionStore;

/// Where the caller should redirect the user
#[derive(Debug, Serialize)]
pub struct CheckoutRedirect {
    pub url: String,
    /// True when the redirect targets the billing portal (plan switch on an
    /// existing subscription) rather than a new checkout
    pub portal: bool,
}

/// Checkout session service
pub struct CheckoutService {
    stripe: StripeClient,
    store: SubscriptionStore,
    pool: PgPool,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let store = SubscriptionStore::new(pool.clone());
        Self {
            stripe,
            store,
            pool,
        }
    }

    /// Create a checkout (or portal) session for the given plan
    pub async fn create_checkout(
        &self,
        user_id: Uuid,
        email: &str,
        plan: PaidPlan,
    ) -> BillingResult<CheckoutRedirect> {
        let customer_id = self.get_or_create_customer(user_id, email).await?;
        let config = self.stripe.config();

        if plan != PaidPlan::Lifetime {
            if let Some(existing) = self.store.find_active_recurring(user_id).await? {
                tracing::info!(
                    user_id = %user_id,
                    subscription_id = %existing.stripe_subscription_id,
                    "Active recurring subscription found, redirecting to billing portal for plan change"
                );

                let return_url = format!("{}/pricing", config.app_base_url);
                let mut params = CreateBillingPortalSession::new(customer_id);
                params.return_url = Some(&return_url);

                let session =
                    BillingPortalSession::create(self.stripe.inner(), params).await?;
                return Ok(CheckoutRedirect {
                    url: session.url,
                    portal: true,
                });
            }
        }

        let price_id = config.price_id(plan).to_string();
        let success_url = format!("{}/dashboard?success=true", config.app_base_url);
        let cancel_url = format!("{}/pricing?canceled=true", config.app_base_url);

        // The webhook attributes the purchase via this metadata; a missing
        // user_id there is a permanent failure, so it is set here in one
        // place only.
        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("price_id".to_string(), price_id.clone());

        let mode = if plan == PaidPlan::Lifetime {
            CheckoutSessionMode::Payment
        } else {
            CheckoutSessionMode::Subscription
        };

        let mut params = CreateCheckoutSession::new();
        params.mode = Some(mode);
        params.customer = Some(customer_id);
        params.success_url = Some(&success_url);
        params.cancel_url = Some(&cancel_url);
        params.metadata = Some(metadata);
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }]);

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        let url = session
            .url
            .ok_or_else(|| BillingError::Internal("checkout session has no URL".to_string()))?;

        tracing::info!(
            user_id = %user_id,
            session_id = %session.id,
            plan = %plan,
            "Checkout session created"
        );

        Ok(CheckoutRedirect { url, portal: false })
    }

    /// Look up the user's Stripe customer, creating one on first purchase
    async fn get_or_create_customer(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> BillingResult<CustomerId> {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM billing_customers WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        if let Some((customer_id,)) = existing {
            return customer_id.parse::<CustomerId>().map_err(|e| {
                BillingError::Internal(format!("invalid stored customer id: {}", e))
            });
        }

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());

        let params = CreateCustomer {
            email: Some(email),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(self.stripe.inner(), params).await?;

        sqlx::query(
            r#"
            INSERT INTO billing_customers (user_id, stripe_customer_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(customer.id.as_str())
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            customer_id = %customer.id,
            "Created new Stripe customer"
        );

        Ok(customer.id)
    }
}
