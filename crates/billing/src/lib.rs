// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ProKit Billing Module
//!
//! Handles Stripe integration for subscriptions: checkout, the billing
//! portal, webhook-driven reconciliation of the local subscription
//! projection, manual administrative overrides, and entitlement reads.
//!
//! ## Features
//!
//! - **Webhooks**: verify Stripe events and reconcile the local store
//! - **Manual Overrides**: admin grants/extensions bypassing Stripe
//! - **Entitlements**: "does this user have Pro access" with staff bypass
//! - **Checkout/Portal**: session creation for purchases and self-service
//! - **Invariants**: runnable consistency checks over the store
//! - **Email Notifications**: purchase confirmation, renewal receipts

pub mod admin;
pub mod checkout;
pub mod client;
pub mod email;
pub mod entitlement;
pub mod error;
pub mod invariants;
pub mod portal;
pub mod reconcile;
pub mod store;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Admin overrides
pub use admin::{AdminActor, AdminSubscriptionService, OverrideOutcome, PlanOverride};

// Checkout
pub use checkout::{CheckoutRedirect, CheckoutService};

// Client
pub use client::{PaidPlan, StripeClient, StripeConfig};

// Email
pub use email::BillingEmailService;

// Entitlement
pub use entitlement::{EntitlementService, SubscriptionSummary};

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Portal
pub use portal::{PortalResponse, PortalService};

// Store
pub use store::{SubscriptionOrigin, SubscriptionRecord, SubscriptionStore, SubscriptionUpsert};

// Webhooks
pub use webhooks::WebhookHandler;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub admin: AdminSubscriptionService,
    pub checkout: CheckoutService,
    pub email: BillingEmailService,
    pub entitlement: EntitlementService,
    pub invariants: InvariantChecker,
    pub portal: PortalService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::with_client(stripe, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::with_client(StripeClient::new(config), pool)
    }

    fn with_client(stripe: StripeClient, pool: PgPool) -> Self {
        let email = BillingEmailService::from_env();

        Self {
            admin: AdminSubscriptionService::new(stripe.clone(), pool.clone()),
            checkout: CheckoutService::new(stripe.clone(), pool.clone()),
            email: email.clone(),
            entitlement: EntitlementService::new(stripe.clone(), pool.clone()),
            invariants: InvariantChecker::new(pool.clone()),
            portal: PortalService::new(stripe.clone(), pool.clone()),
            webhooks: WebhookHandler::new(stripe, pool, email),
        }
    }
}
