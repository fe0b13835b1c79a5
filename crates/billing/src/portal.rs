//! Billing portal sessions

use serde::Serialize;
use sqlx::PgPool;
use stripe::{BillingPortalSession, CreateBillingPortalSession, CustomerId};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Response from creating a portal session
#[derive(Debug, Serialize)]
pub struct PortalResponse {
    pub portal_url: String,
}

/// Customer self-service portal service
pub struct PortalService {
    stripe: StripeClient,
    pool: PgPool,
}

impl PortalService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Create a billing-portal session for the user's Stripe customer
    pub async fn create_portal(&self, user_id: Uuid) -> BillingResult<PortalResponse> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM billing_customers WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let (customer_id,) = row.ok_or(BillingError::NoCustomer)?;
        let customer_id = customer_id.parse::<CustomerId>().map_err(|e| {
            BillingError::Internal(format!("invalid stored customer id: {}", e))
        })?;

        let return_url = format!("{}/dashboard", self.stripe.config().app_base_url);
        let mut params = CreateBillingPortalSession::new(customer_id);
        params.return_url = Some(&return_url);

        let session = BillingPortalSession::create(self.stripe.inner(), params).await?;

        tracing::info!(user_id = %user_id, "Billing portal session created");

        Ok(PortalResponse {
            portal_url: session.url,
        })
    }
}
