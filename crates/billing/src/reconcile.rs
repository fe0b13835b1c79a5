//! Pure reconciliation rules
//!
//! Every webhook action and manual override reduces to "compute the new row
//! from the freshly fetched provider state (or the admin's request) and the
//! current row, then write it through a single upsert". The computations live
//! here, free of IO, so the billing invariants are unit-testable: period-end
//! fallbacks, the lifetime sentinel, additive manual extensions, synthetic
//! identifiers, and the entitlement decision.

use time::{Date, Duration, Month, OffsetDateTime};
use uuid::Uuid;

use crate::client::PaidPlan;
use prokit_shared::UserRole;

/// Statuses that grant paid-tier entitlement
pub const ENTITLED_STATUSES: &[&str] = &["active", "trialing"];

/// Fallback entitlement window when the provider omits a period end on a
/// completed checkout. Blocking the customer's paid access is worse than a
/// slightly-wrong expiry.
pub const CHECKOUT_FALLBACK_DAYS: i64 = 30;

/// "Forever" sentinel for lifetime purchases and grants, in calendar months
pub const LIFETIME_MONTHS: u32 = 100 * 12;

pub fn is_entitled_status(status: &str) -> bool {
    ENTITLED_STATUSES.contains(&status)
}

/// Entitlement decision for a user
///
/// Administrators and super-administrators are unconditionally entitled,
/// independent of any stored record. Otherwise entitlement follows the
/// stored status alone; period end is deliberately not consulted here
/// (expiry arrives as a status transition from the provider).
pub fn entitlement_decision(role: UserRole, status: Option<&str>) -> bool {
    if role.is_admin() {
        return true;
    }
    status.map(is_entitled_status).unwrap_or(false)
}

/// Stable string form of a provider subscription status
pub fn subscription_status_str(status: stripe::SubscriptionStatus) -> &'static str {
    match status {
        stripe::SubscriptionStatus::Active => "active",
        stripe::SubscriptionStatus::PastDue => "past_due",
        stripe::SubscriptionStatus::Canceled => "canceled",
        stripe::SubscriptionStatus::Unpaid => "unpaid",
        stripe::SubscriptionStatus::Trialing => "trialing",
        stripe::SubscriptionStatus::Incomplete => "incomplete",
        stripe::SubscriptionStatus::IncompleteExpired => "incomplete_expired",
        stripe::SubscriptionStatus::Paused => "paused",
    }
}

/// Period end for a completed recurring checkout or renewal
///
/// Uses the provider's period end when present and parseable; otherwise
/// degrades to now + 30 days rather than failing the reconciliation.
pub fn checkout_period_end(
    provider_period_end: Option<i64>,
    now: OffsetDateTime,
) -> OffsetDateTime {
    provider_period_end
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
        .unwrap_or_else(|| now + Duration::days(CHECKOUT_FALLBACK_DAYS))
}

/// "Forever" period end for lifetime purchases: now + 100 years
pub fn lifetime_period_end(now: OffsetDateTime) -> OffsetDateTime {
    add_calendar_months(now, LIFETIME_MONTHS)
}

/// Synthetic subscription id for a one-time lifetime purchase
pub fn lifetime_subscription_id(session_id: &str) -> String {
    format!("lifetime_{}", session_id)
}

/// Synthetic subscription id for a fresh manual administrative grant
pub fn manual_subscription_id(admin_id: Uuid, now: OffsetDateTime) -> String {
    format!("manual_{}_{}", admin_id, now.unix_timestamp())
}

/// Period end for a manual plan override
///
/// An explicit custom date is used verbatim. Otherwise the extension is
/// additive: it starts from the existing period end when that is still in
/// the future (preserving unused paid time), and from now when there is no
/// unexpired row.
pub fn override_period_end(
    plan: PaidPlan,
    existing_end: Option<OffsetDateTime>,
    custom_end: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> OffsetDateTime {
    if let Some(end) = custom_end {
        return end;
    }

    let base = match existing_end {
        Some(end) if end > now => end,
        _ => now,
    };

    match plan {
        PaidPlan::Monthly => add_calendar_months(base, 1),
        PaidPlan::Yearly => add_calendar_months(base, 12),
        PaidPlan::Lifetime => add_calendar_months(base, LIFETIME_MONTHS),
    }
}

/// Add calendar months, clamping the day to the target month's length
/// (Jan 31 + 1 month = Feb 28/29).
pub fn add_calendar_months(dt: OffsetDateTime, months: u32) -> OffsetDateTime {
    let date = dt.date();
    let zero_based = u32::from(u8::from(date.month())) - 1 + months;
    let year = date.year() + (zero_based / 12) as i32;
    let month = Month::try_from((zero_based % 12 + 1) as u8).unwrap_or(date.month());
    let day = date.day().min(time::util::days_in_year_month(year, month));
    let new_date = Date::from_calendar_date(year, month, day).unwrap_or(date);
    dt.replace_date(new_date)
}
