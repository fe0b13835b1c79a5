//! Stripe webhook handling
//!
//! Verifies inbound event signatures and reconciles the local subscription
//! projection against the provider. Every reconciliation action re-fetches
//! the authoritative subscription from Stripe (never trusting the event
//! payload's embedded snapshot) and writes through a complete-replacement
//! upsert, so redelivered or reordered events converge to the same row.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{
    CancelSubscription, CheckoutSession, CheckoutSessionMode, Customer, Event, EventObject,
    EventType, Expandable, Invoice, Subscription, SubscriptionId, Webhook,
};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::reconcile;
use crate::store::{SubscriptionOrigin, SubscriptionStore, SubscriptionUpsert};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a webhook signature timestamp
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    store: SubscriptionStore,
    email: BillingEmailService,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool, email: BillingEmailService) -> Self {
        let store = SubscriptionStore::new(pool);
        Self {
            stripe,
            store,
            email,
        }
    }

    /// Verify and parse a Stripe webhook event
    ///
    /// Tries the library verification first, then falls back to manual
    /// signature verification, which survives Stripe API version drift in
    /// the payload shape.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::debug!(
                    stripe_error = %e,
                    "Standard webhook parsing failed, trying manual verification"
                );
            }
        }

        verify_signature(
            webhook_secret,
            payload,
            signature,
            OffsetDateTime::now_utc().unix_timestamp(),
        )?;

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(
                parse_error = %e,
                "Failed to parse webhook event JSON"
            );
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::debug!(
            event_type = %event.type_,
            event_id = %event.id,
            "Manual webhook verification succeeded"
        );

        Ok(event)
    }

    /// Handle a verified Stripe event
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Processing Stripe webhook event"
        );

        match event.type_ {
            EventType::CheckoutSessionCompleted => self.handle_checkout_completed(event).await,
            EventType::InvoicePaymentSucceeded => {
                self.handle_invoice_payment_succeeded(event).await
            }
            EventType::CustomerSubscriptionDeleted => self.handle_subscription_deleted(event).await,
            EventType::CustomerSubscriptionUpdated => self.handle_subscription_updated(event).await,
            _ => {
                // Log at info level so we can track which events we're not handling
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, event: Event) -> BillingResult<()> {
        let session = match event.data.object {
            EventObject::CheckoutSession(session) => session,
            _ => {
                return Err(BillingError::UnsupportedEvent(
                    "expected checkout session".to_string(),
                ))
            }
        };

        // Without a user id the event cannot be attributed; this is permanent
        // (retries carry the same metadata) and indicates a checkout flow bug
        // upstream.
        let user_id = session
            .metadata
            .as_ref()
            .and_then(|m| m.get("user_id"))
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| {
                tracing::error!(
                    session_id = %session.id,
                    "Checkout session has no user_id in metadata - cannot attribute purchase"
                );
                BillingError::MissingUserMetadata
            })?;

        match session.mode {
            CheckoutSessionMode::Subscription => {
                self.reconcile_recurring_checkout(user_id, &session).await
            }
            CheckoutSessionMode::Payment => {
                self.reconcile_lifetime_checkout(user_id, &session).await
            }
            other => Err(BillingError::UnsupportedEvent(format!(
                "checkout session mode {:?}",
                other
            ))),
        }
    }

    /// Checkout completed in subscription mode: re-fetch the subscription
    /// from Stripe and project it onto the user's row.
    async fn reconcile_recurring_checkout(
        &self,
        user_id: Uuid,
        session: &CheckoutSession,
    ) -> BillingResult<()> {
        let subscription_ref = session.subscription.as_ref().ok_or_else(|| {
            BillingError::UnsupportedEvent(
                "subscription-mode checkout session has no subscription".to_string(),
            )
        })?;

        let sub_id = subscription_ref
            .id()
            .parse::<SubscriptionId>()
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to parse subscription ID");
                BillingError::SubscriptionNotFound(subscription_ref.id().to_string())
            })?;

        let subscription = Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;

        let now = OffsetDateTime::now_utc();
        let provider_period_end =
            (subscription.current_period_end > 0).then_some(subscription.current_period_end);
        if provider_period_end.is_none() {
            tracing::warn!(
                subscription_id = %subscription.id,
                "Subscription data missing current_period_end, defaulting to 30 days"
            );
        }

        let price_id = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|p| p.id.to_string())
            .or_else(|| {
                session
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("price_id"))
                    .cloned()
            })
            .unwrap_or_else(|| "unknown".to_string());

        self.store
            .upsert(&SubscriptionUpsert {
                user_id,
                stripe_subscription_id: subscription.id.to_string(),
                stripe_customer_id: Some(expandable_customer_id(&subscription.customer)),
                price_id: price_id.clone(),
                status: reconcile::subscription_status_str(subscription.status).to_string(),
                origin: SubscriptionOrigin::Provider,
                current_period_end: reconcile::checkout_period_end(provider_period_end, now),
                metadata: None,
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            "Checkout completed, subscription recorded"
        );

        self.send_welcome_email(session, &price_id).await;

        Ok(())
    }

    /// Checkout completed in payment mode (lifetime purchase): cancel any
    /// active recurring subscription at the provider to stop future billing,
    /// then replace the row with a lifetime grant.
    async fn reconcile_lifetime_checkout(
        &self,
        user_id: Uuid,
        session: &CheckoutSession,
    ) -> BillingResult<()> {
        let now = OffsetDateTime::now_utc();

        if let Some(existing) = self.store.find_active_recurring(user_id).await? {
            match existing.stripe_subscription_id.parse::<SubscriptionId>() {
                Ok(sub_id) => {
                    tracing::info!(
                        user_id = %user_id,
                        subscription_id = %existing.stripe_subscription_id,
                        "Cancelling recurring subscription superseded by lifetime purchase"
                    );
                    let params = CancelSubscription {
                        cancellation_details: None,
                        invoice_now: None,
                        prorate: None,
                    };
                    if let Err(e) =
                        Subscription::cancel(self.stripe.inner(), &sub_id, params).await
                    {
                        // Row is still replaced below: a stray recurring
                        // subscription is recoverable at the provider, lost
                        // entitlement is not.
                        tracing::error!(
                            user_id = %user_id,
                            subscription_id = %existing.stripe_subscription_id,
                            error = %e,
                            "Failed to cancel recurring subscription during lifetime upgrade"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(
                        user_id = %user_id,
                        subscription_id = %existing.stripe_subscription_id,
                        error = %e,
                        "Stored provider subscription id is not a valid Stripe id"
                    );
                }
            }
        }

        let price_id = session
            .metadata
            .as_ref()
            .and_then(|m| m.get("price_id"))
            .cloned()
            .unwrap_or_else(|| self.stripe.config().price_lifetime.clone());

        self.store
            .upsert(&SubscriptionUpsert {
                user_id,
                stripe_subscription_id: reconcile::lifetime_subscription_id(session.id.as_str()),
                stripe_customer_id: session.customer.as_ref().map(expandable_customer_id),
                price_id: price_id.clone(),
                status: "active".to_string(),
                origin: SubscriptionOrigin::Lifetime,
                current_period_end: reconcile::lifetime_period_end(now),
                metadata: None,
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            session_id = %session.id,
            "Lifetime purchase recorded"
        );

        self.send_welcome_email(session, &price_id).await;

        Ok(())
    }

    /// Invoice payment succeeded (renewal): re-fetch the subscription by its
    /// id and refresh the matching row. Invoices without a subscription are
    /// outside this model's concern and succeed as a no-op.
    async fn handle_invoice_payment_succeeded(&self, event: Event) -> BillingResult<()> {
        let invoice = extract_invoice(event)?;

        let subscription_ref = match invoice.subscription.as_ref() {
            Some(sub) => sub,
            None => {
                tracing::debug!(
                    invoice_id = %invoice.id,
                    "Invoice has no subscription (one-time invoice), nothing to reconcile"
                );
                return Ok(());
            }
        };

        let sub_id = subscription_ref
            .id()
            .parse::<SubscriptionId>()
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to parse subscription ID");
                BillingError::SubscriptionNotFound(subscription_ref.id().to_string())
            })?;

        // The invoice payload embeds a possibly-stale copy; fetch fresh state
        let subscription = Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;

        let now = OffsetDateTime::now_utc();
        let price_id = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|p| p.id.to_string());

        let updated = self
            .store
            .update_from_provider(
                subscription.id.as_str(),
                reconcile::subscription_status_str(subscription.status),
                price_id.as_deref(),
                reconcile::checkout_period_end(
                    (subscription.current_period_end > 0)
                        .then_some(subscription.current_period_end),
                    now,
                ),
            )
            .await?;

        if updated == 0 {
            tracing::warn!(
                subscription_id = %subscription.id,
                invoice_id = %invoice.id,
                "Renewal event for unknown subscription - no local row updated"
            );
            return Ok(());
        }

        tracing::info!(
            subscription_id = %subscription.id,
            invoice_id = %invoice.id,
            amount_paid = invoice.amount_paid,
            "Subscription renewed"
        );

        self.send_invoice_email(&invoice).await;

        Ok(())
    }

    /// Subscription deleted: mark the row canceled. The row is retained so
    /// "when did access end" stays answerable.
    async fn handle_subscription_deleted(&self, event: Event) -> BillingResult<()> {
        let subscription = extract_subscription(event)?;

        let updated = self.store.mark_canceled(subscription.id.as_str()).await?;
        if updated == 0 {
            tracing::warn!(
                subscription_id = %subscription.id,
                "Deletion event for unknown subscription"
            );
            return Ok(());
        }

        tracing::info!(
            subscription_id = %subscription.id,
            "Subscription cancelled"
        );

        Ok(())
    }

    /// Subscription updated (e.g. plan change via the portal): re-fetch
    /// fresh state and refresh the matching row.
    async fn handle_subscription_updated(&self, event: Event) -> BillingResult<()> {
        let event_subscription = extract_subscription(event)?;

        let subscription =
            Subscription::retrieve(self.stripe.inner(), &event_subscription.id, &[]).await?;

        let now = OffsetDateTime::now_utc();
        let price_id = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|p| p.id.to_string());

        let updated = self
            .store
            .update_from_provider(
                subscription.id.as_str(),
                reconcile::subscription_status_str(subscription.status),
                price_id.as_deref(),
                reconcile::checkout_period_end(
                    (subscription.current_period_end > 0)
                        .then_some(subscription.current_period_end),
                    now,
                ),
            )
            .await?;

        if updated == 0 {
            tracing::warn!(
                subscription_id = %subscription.id,
                "Update event for unknown subscription - no local row updated"
            );
        } else {
            tracing::info!(
                subscription_id = %subscription.id,
                status = %reconcile::subscription_status_str(subscription.status),
                "Subscription updated"
            );
        }

        Ok(())
    }

    /// Best-effort purchase confirmation; entitlement correctness outranks
    /// notification delivery.
    async fn send_welcome_email(&self, session: &CheckoutSession, price_id: &str) {
        let email = match session
            .customer_details
            .as_ref()
            .and_then(|details| details.email.clone())
        {
            Some(email) => email,
            None => return,
        };

        let plan_name = self
            .stripe
            .config()
            .plan_for_price(price_id)
            .map(|plan| plan.display_name())
            .unwrap_or("Pro");

        if let Err(e) = self.email.send_subscription_welcome(&email, plan_name).await {
            tracing::warn!(error = %e, "Failed to send subscription confirmation email");
        }
    }

    /// Best-effort renewal receipt
    async fn send_invoice_email(&self, invoice: &Invoice) {
        let email = match invoice.customer_email.clone() {
            Some(email) => email,
            None => return,
        };

        let number = invoice
            .number
            .clone()
            .unwrap_or_else(|| invoice.id.to_string());
        if let Err(e) = self
            .email
            .send_invoice_paid(
                &email,
                &number,
                invoice.amount_paid.unwrap_or(0),
                invoice.hosted_invoice_url.as_deref(),
            )
            .await
        {
            tracing::warn!(error = %e, "Failed to send invoice email");
        }
    }
}

fn extract_subscription(event: Event) -> BillingResult<Subscription> {
    match event.data.object {
        EventObject::Subscription(subscription) => Ok(subscription),
        _ => Err(BillingError::UnsupportedEvent(
            "expected subscription".to_string(),
        )),
    }
}

fn extract_invoice(event: Event) -> BillingResult<Invoice> {
    match event.data.object {
        EventObject::Invoice(invoice) => Ok(invoice),
        _ => Err(BillingError::UnsupportedEvent(
            "expected invoice".to_string(),
        )),
    }
}

fn expandable_customer_id(customer: &Expandable<Customer>) -> String {
    match customer {
        Expandable::Id(id) => id.to_string(),
        Expandable::Object(c) => c.id.to_string(),
    }
}

/// Manual Stripe signature verification
///
/// Parses the `t=timestamp,v1=signature` header, rejects stale timestamps,
/// and compares an HMAC-SHA256 over `"{t}.{payload}"` in constant time.
pub(crate) fn verify_signature(
    secret: &str,
    payload: &str,
    signature: &str,
    now: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in signature.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0] {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1].to_string()),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::error!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::error!("Missing v1 signature in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::error!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    // The secret starts with "whsec_"; the remainder is the signing key
    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|_| {
        tracing::error!("Invalid webhook secret key");
        BillingError::WebhookSignatureInvalid
    })?;
    mac.update(signed_payload.as_bytes());
    let computed = mac.finalize().into_bytes();

    let provided = hex::decode(&v1_signature).map_err(|_| {
        tracing::error!("Signature is not valid hex");
        BillingError::WebhookSignatureInvalid
    })?;

    if computed.as_slice().ct_eq(provided.as_slice()).unwrap_u8() != 1 {
        tracing::error!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}
