//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

/// Errors produced by the billing subsystem
///
/// The variants map onto distinct caller behaviors: signature and metadata
/// failures are permanent (HTTP 400, Stripe will not usefully retry),
/// provider and database failures are transient (HTTP 500, Stripe redelivers
/// the webhook), and authorization failures are rejected before any mutation.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("webhook event has no user_id in metadata")]
    MissingUserMetadata,

    #[error("unsupported webhook payload: {0}")]
    UnsupportedEvent(String),

    #[error("caller is not authorized to manage subscriptions")]
    Unauthorized,

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("no billing customer on file")]
    NoCustomer,

    #[error("unknown plan: {0}")]
    InvalidPlan(String),

    #[error("Stripe API error: {0}")]
    Stripe(#[from] stripe::StripeError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl BillingError {
    /// Whether Stripe's webhook retry machinery can usefully redeliver
    /// the event that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::Stripe(_) | BillingError::Database(_))
    }
}
