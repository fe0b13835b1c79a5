//! Billing invariants
//!
//! Runnable consistency checks over the subscription store. Each invariant
//! is a read-only SQL query; violations carry enough context to debug. They
//! can be run after any mutation or webhook replay from the admin panel.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - a user may be billed or entitled incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

/// Row type for duplicate entitlement violation
#[derive(Debug, sqlx::FromRow)]
struct DuplicateEntitlementRow {
    user_id: Uuid,
    sub_count: i64,
}

/// Row type for stale active period violation
#[derive(Debug, sqlx::FromRow)]
struct StaleActiveRow {
    user_id: Uuid,
    stripe_subscription_id: String,
    status: String,
    current_period_end: OffsetDateTime,
}

/// Row type for lifetime rows missing the forever sentinel
#[derive(Debug, sqlx::FromRow)]
struct ShortLifetimeRow {
    user_id: Uuid,
    stripe_subscription_id: String,
    current_period_end: OffsetDateTime,
}

/// Row type for provider rows without a billing customer
#[derive(Debug, sqlx::FromRow)]
struct MissingCustomerRow {
    user_id: Uuid,
    stripe_subscription_id: String,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_entitled_subscription().await?);
        violations.extend(self.check_active_period_end_not_past().await?);
        violations.extend(self.check_lifetime_has_forever_end().await?);
        violations.extend(self.check_provider_rows_have_customer().await?);

        let checks_run = 4;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: At most 1 entitled subscription row per user
    ///
    /// Two simultaneously entitled rows would mean double-billing or
    /// conflicting entitlement state. The unique index on user_id makes
    /// this structural; the check guards against schema drift.
    async fn check_single_entitled_subscription(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicateEntitlementRow> = sqlx::query_as(
            r#"
            SELECT user_id, COUNT(*) as sub_count
            FROM subscriptions
            WHERE status IN ('active', 'trialing', 'past_due')
            GROUP BY user_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_entitled_subscription".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "User has {} entitled subscription rows (expected at most 1)",
                    row.sub_count
                ),
                context: serde_json::json!({
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Active rows have a period end in the future
    ///
    /// An active row whose period end has passed means a provider status
    /// transition is overdue or was lost; the user may retain entitlement
    /// past their real expiry.
    async fn check_active_period_end_not_past(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StaleActiveRow> = sqlx::query_as(
            r#"
            SELECT user_id, stripe_subscription_id, status, current_period_end
            FROM subscriptions
            WHERE status IN ('active', 'trialing')
              AND current_period_end < NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "active_period_end_not_past".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Subscription '{}' is {} but its period ended at {}",
                    row.stripe_subscription_id, row.status, row.current_period_end
                ),
                context: serde_json::json!({
                    "stripe_subscription_id": row.stripe_subscription_id,
                    "status": row.status,
                    "current_period_end": row.current_period_end.to_string(),
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: Lifetime rows carry the forever sentinel
    async fn check_lifetime_has_forever_end(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ShortLifetimeRow> = sqlx::query_as(
            r#"
            SELECT user_id, stripe_subscription_id, current_period_end
            FROM subscriptions
            WHERE origin = 'lifetime'
              AND current_period_end < NOW() + INTERVAL '99 years'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "lifetime_has_forever_end".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Lifetime purchase '{}' expires at {} instead of the forever sentinel",
                    row.stripe_subscription_id, row.current_period_end
                ),
                context: serde_json::json!({
                    "stripe_subscription_id": row.stripe_subscription_id,
                    "current_period_end": row.current_period_end.to_string(),
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 4: Provider-origin rows reference a billing customer
    async fn check_provider_rows_have_customer(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MissingCustomerRow> = sqlx::query_as(
            r#"
            SELECT user_id, stripe_subscription_id
            FROM subscriptions
            WHERE origin = 'provider'
              AND stripe_customer_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "provider_rows_have_customer".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Provider subscription '{}' has no Stripe customer",
                    row.stripe_subscription_id
                ),
                context: serde_json::json!({
                    "stripe_subscription_id": row.stripe_subscription_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "single_entitled_subscription" => self.check_single_entitled_subscription().await,
            "active_period_end_not_past" => self.check_active_period_end_not_past().await,
            "lifetime_has_forever_end" => self.check_lifetime_has_forever_end().await,
            "provider_rows_have_customer" => self.check_provider_rows_have_customer().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "single_entitled_subscription",
            "active_period_end_not_past",
            "lifetime_has_forever_end",
            "provider_rows_have_customer",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 4);
        assert!(checks.contains(&"single_entitled_subscription"));
        assert!(checks.contains(&"active_period_end_not_past"));
    }
}
