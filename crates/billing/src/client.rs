//! Stripe client wrapper and billing configuration

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stripe::Client;

use crate::error::{BillingError, BillingResult};

/// A paid plan sold through checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaidPlan {
    Monthly,
    Yearly,
    Lifetime,
}

impl PaidPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaidPlan::Monthly => "monthly",
            PaidPlan::Yearly => "yearly",
            PaidPlan::Lifetime => "lifetime",
        }
    }

    /// Human-readable plan name used in notification emails
    pub fn display_name(&self) -> &'static str {
        match self {
            PaidPlan::Monthly => "Pro Monthly",
            PaidPlan::Yearly => "Pro Yearly",
            PaidPlan::Lifetime => "Pro Lifetime",
        }
    }
}

impl FromStr for PaidPlan {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(PaidPlan::Monthly),
            "yearly" => Ok(PaidPlan::Yearly),
            "lifetime" => Ok(PaidPlan::Lifetime),
            other => Err(BillingError::InvalidPlan(other.to_string())),
        }
    }
}

impl fmt::Display for PaidPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stripe configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_monthly: String,
    pub price_yearly: String,
    pub price_lifetime: String,
    /// Base URL the checkout/portal flows redirect back to
    pub app_base_url: String,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: require_env("STRIPE_SECRET_KEY")?,
            webhook_secret: require_env("STRIPE_WEBHOOK_SECRET")?,
            price_monthly: require_env("STRIPE_PRICE_MONTHLY")?,
            price_yearly: require_env("STRIPE_PRICE_YEARLY")?,
            price_lifetime: require_env("STRIPE_PRICE_LIFETIME")?,
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }

    /// Price identifier configured for a plan
    pub fn price_id(&self, plan: PaidPlan) -> &str {
        match plan {
            PaidPlan::Monthly => &self.price_monthly,
            PaidPlan::Yearly => &self.price_yearly,
            PaidPlan::Lifetime => &self.price_lifetime,
        }
    }

    /// Reverse lookup from a price identifier to the plan it sells
    pub fn plan_for_price(&self, price_id: &str) -> Option<PaidPlan> {
        if price_id == self.price_monthly {
            Some(PaidPlan::Monthly)
        } else if price_id == self.price_yearly {
            Some(PaidPlan::Yearly)
        } else if price_id == self.price_lifetime {
            Some(PaidPlan::Lifetime)
        } else {
            None
        }
    }
}

fn require_env(name: &str) -> BillingResult<String> {
    std::env::var(name)
        .map_err(|_| BillingError::Internal(format!("{} must be set", name)))
}

/// Shared Stripe API client plus configuration
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(config.secret_key.clone());
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
