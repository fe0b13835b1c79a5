//! Billing email notifications
//!
//! Thin client for the Resend HTTP API. All sends are best-effort: callers
//! log failures and continue, because entitlement correctness outranks
//! notification delivery.

use reqwest::Client;

use crate::error::{BillingError, BillingResult};

const DEFAULT_API_BASE: &str = "https://api.resend.com";
const DEFAULT_FROM: &str = "ProKit <billing@resend.dev>";

/// Transactional email sender for billing events
#[derive(Clone)]
pub struct BillingEmailService {
    client: Client,
    api_key: Option<String>,
    from: String,
    api_base: String,
}

impl BillingEmailService {
    /// Build from `RESEND_API_KEY` / `EMAIL_FROM`; an absent key disables
    /// sending (every send becomes a logged no-op)
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("RESEND_API_KEY").ok(),
            std::env::var("EMAIL_FROM").unwrap_or_else(|_| DEFAULT_FROM.to_string()),
        )
    }

    pub fn new(api_key: Option<String>, from: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            from,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    /// Override the API endpoint (used by tests against a local mock server)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Purchase confirmation sent after a successful checkout
    pub async fn send_subscription_welcome(
        &self,
        to: &str,
        plan_name: &str,
    ) -> BillingResult<()> {
        let html = format!(
            "<h1>Welcome to {plan}!</h1>\
             <p>Your subscription is active. You now have full access to all Pro features.</p>",
            plan = plan_name
        );
        self.send(to, &format!("Welcome to {}! 🚀", plan_name), html)
            .await
    }

    /// Receipt sent when a renewal invoice is paid
    pub async fn send_invoice_paid(
        &self,
        to: &str,
        invoice_number: &str,
        amount_cents: i64,
        invoice_url: Option<&str>,
    ) -> BillingResult<()> {
        let amount = format!("${:.2}", amount_cents as f64 / 100.0);
        let link = invoice_url
            .map(|url| format!("<p><a href=\"{}\">View your invoice</a></p>", url))
            .unwrap_or_default();
        let html = format!(
            "<h1>Invoice {number} paid</h1><p>Amount: {amount}</p>{link}",
            number = invoice_number,
            amount = amount,
            link = link
        );
        self.send(to, &format!("Invoice {} Paid", invoice_number), html)
            .await
    }

    async fn send(&self, to: &str, subject: &str, html: String) -> BillingResult<()> {
        let api_key = match &self.api_key {
            Some(key) => key,
            None => {
                tracing::debug!(to = %to, subject = %subject, "Email not configured, skipping send");
                return Ok(());
            }
        };

        let response = self
            .client
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "from": self.from,
                "to": [to],
                "subject": subject,
                "html": html,
            }))
            .send()
            .await
            .map_err(|e| BillingError::Internal(format!("email send failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(BillingError::Internal(format!(
                "email provider returned {}",
                response.status()
            )));
        }

        tracing::debug!(to = %to, subject = %subject, "Email sent");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_skipped_when_not_configured() {
        let service = BillingEmailService::new(None, DEFAULT_FROM.to_string());
        assert!(!service.is_enabled());

        // No server behind this base URL; a send attempt would error, a skip won't
        let service = service.with_api_base("http://127.0.0.1:1");
        service
            .send_subscription_welcome("user@example.com", "Pro Monthly")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_hits_provider_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .match_header("authorization", "Bearer re_test_key")
            .with_status(200)
            .with_body(r#"{"id":"email_1"}"#)
            .create_async()
            .await;

        let service = BillingEmailService::new(
            Some("re_test_key".to_string()),
            DEFAULT_FROM.to_string(),
        )
        .with_api_base(server.url());

        service
            .send_subscription_welcome("user@example.com", "Pro Monthly")
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_provider_error_surfaces() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/emails")
            .with_status(500)
            .create_async()
            .await;

        let service = BillingEmailService::new(
            Some("re_test_key".to_string()),
            DEFAULT_FROM.to_string(),
        )
        .with_api_base(server.url());

        let result = service
            .send_invoice_paid("user@example.com", "INV-42", 1900, None)
            .await;
        assert!(result.is_err());
    }
}
