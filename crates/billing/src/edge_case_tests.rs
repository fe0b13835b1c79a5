// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Subscription Reconciliation Core
//!
//! Tests critical boundary conditions in:
//! - Period-end reconciliation (SUB-P01 to SUB-P05)
//! - Manual override extensions (SUB-M01 to SUB-M08)
//! - Entitlement decisions (SUB-E01 to SUB-E08)
//! - Webhook signature verification (SUB-W01 to SUB-W07)
//! - Origin and plan tags (SUB-T01 to SUB-T04)

#[cfg(test)]
mod period_end_tests {
    use crate::reconcile::*;
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    // =========================================================================
    // SUB-P01: Provider period end present - used verbatim
    // =========================================================================
    #[test]
    fn test_provider_period_end_honored() {
        let now = datetime!(2025-06-01 12:00 UTC);
        let provider_end = datetime!(2025-07-01 12:00 UTC);

        let result = checkout_period_end(Some(provider_end.unix_timestamp()), now);
        assert_eq!(result, provider_end);
    }

    // =========================================================================
    // SUB-P02: Provider period end missing - falls back to now + 30 days
    // =========================================================================
    #[test]
    fn test_missing_period_end_defaults_to_thirty_days() {
        let now = datetime!(2025-06-01 12:00 UTC);

        let result = checkout_period_end(None, now);
        assert_eq!(result - now, Duration::days(30));
    }

    // =========================================================================
    // SUB-P03: Unparseable provider timestamp - also falls back, not an error
    // =========================================================================
    #[test]
    fn test_out_of_range_period_end_falls_back() {
        let now = datetime!(2025-06-01 12:00 UTC);

        let result = checkout_period_end(Some(i64::MAX), now);
        assert_eq!(result - now, Duration::days(30));
    }

    // =========================================================================
    // SUB-P04: Lifetime sentinel is at least 99 years out
    // =========================================================================
    #[test]
    fn test_lifetime_sentinel_far_future() {
        let now = OffsetDateTime::now_utc();

        let result = lifetime_period_end(now);
        assert!(result >= now + Duration::days(365 * 99));
    }

    // =========================================================================
    // SUB-P05: Calendar month addition clamps the day (Jan 31 -> Feb 28)
    // =========================================================================
    #[test]
    fn test_month_addition_clamps_day() {
        let jan = datetime!(2025-01-31 09:30 UTC);
        assert_eq!(add_calendar_months(jan, 1), datetime!(2025-02-28 09:30 UTC));

        // Leap year keeps the 29th
        let jan_leap = datetime!(2024-01-31 09:30 UTC);
        assert_eq!(
            add_calendar_months(jan_leap, 1),
            datetime!(2024-02-29 09:30 UTC)
        );

        // Year rollover
        let dec = datetime!(2025-12-15 00:00 UTC);
        assert_eq!(add_calendar_months(dec, 1), datetime!(2026-01-15 00:00 UTC));
    }
}

#[cfg(test)]
mod override_tests {
    use crate::client::PaidPlan;
    use crate::reconcile::*;
    use time::macros::datetime;
    use time::Duration;
    use uuid::Uuid;

    // =========================================================================
    // SUB-M01: Monthly override with no existing row extends from now
    // =========================================================================
    #[test]
    fn test_monthly_override_from_now() {
        let now = datetime!(2025-06-01 12:00 UTC);

        let result = override_period_end(PaidPlan::Monthly, None, None, now);
        assert_eq!(result, datetime!(2025-07-01 12:00 UTC));
    }

    // =========================================================================
    // SUB-M02: Monthly override on an unexpired row is additive, not a reset
    // =========================================================================
    #[test]
    fn test_monthly_override_additive() {
        let now = datetime!(2025-06-01 12:00 UTC);
        let existing_end = now + Duration::days(10);

        let result = override_period_end(PaidPlan::Monthly, Some(existing_end), None, now);
        assert_eq!(result, datetime!(2025-07-11 12:00 UTC));
    }

    // =========================================================================
    // SUB-M03: An expired existing row does not drag the base into the past
    // =========================================================================
    #[test]
    fn test_expired_existing_row_extends_from_now() {
        let now = datetime!(2025-06-01 12:00 UTC);
        let existing_end = now - Duration::days(3);

        let result = override_period_end(PaidPlan::Monthly, Some(existing_end), None, now);
        assert_eq!(result, datetime!(2025-07-01 12:00 UTC));
    }

    // =========================================================================
    // SUB-M04: Custom expiry date is used verbatim, even in the past
    // =========================================================================
    #[test]
    fn test_custom_date_verbatim() {
        let now = datetime!(2025-06-01 12:00 UTC);
        let custom = datetime!(2025-06-05 00:00 UTC);
        let existing_end = now + Duration::days(300);

        let result =
            override_period_end(PaidPlan::Yearly, Some(existing_end), Some(custom), now);
        assert_eq!(result, custom);
    }

    // =========================================================================
    // SUB-M05: Yearly override extends by one calendar year
    // =========================================================================
    #[test]
    fn test_yearly_override() {
        let now = datetime!(2025-06-01 12:00 UTC);

        let result = override_period_end(PaidPlan::Yearly, None, None, now);
        assert_eq!(result, datetime!(2026-06-01 12:00 UTC));
    }

    // =========================================================================
    // SUB-M06: Lifetime override uses the forever sentinel
    // =========================================================================
    #[test]
    fn test_lifetime_override() {
        let now = datetime!(2025-06-01 12:00 UTC);

        let result = override_period_end(PaidPlan::Lifetime, None, None, now);
        assert_eq!(result, datetime!(2125-06-01 12:00 UTC));
    }

    // =========================================================================
    // SUB-M07: Synthetic manual subscription id carries admin and timestamp
    // =========================================================================
    #[test]
    fn test_manual_subscription_id_format() {
        let admin = Uuid::new_v4();
        let now = datetime!(2025-06-01 12:00 UTC);

        let id = manual_subscription_id(admin, now);
        assert_eq!(
            id,
            format!("manual_{}_{}", admin, now.unix_timestamp())
        );
    }

    // =========================================================================
    // SUB-M08: Lifetime purchases get a session-derived synthetic id
    // =========================================================================
    #[test]
    fn test_lifetime_subscription_id_format() {
        assert_eq!(
            lifetime_subscription_id("cs_test_abc123"),
            "lifetime_cs_test_abc123"
        );
    }
}

#[cfg(test)]
mod entitlement_tests {
    use crate::reconcile::*;
    use crate::store::SubscriptionRecord;
    use prokit_shared::UserRole;
    use time::macros::datetime;
    use uuid::Uuid;

    // =========================================================================
    // SUB-E01: Admin is entitled with no record at all
    // =========================================================================
    #[test]
    fn test_admin_entitled_without_record() {
        assert!(entitlement_decision(UserRole::Admin, None));
        assert!(entitlement_decision(UserRole::SuperAdmin, None));
    }

    // =========================================================================
    // SUB-E02: Admin bypass wins over a canceled record
    // =========================================================================
    #[test]
    fn test_admin_entitled_despite_canceled_record() {
        assert!(entitlement_decision(UserRole::Admin, Some("canceled")));
    }

    // =========================================================================
    // SUB-E03: Regular user with no record is not entitled
    // =========================================================================
    #[test]
    fn test_user_without_record_not_entitled() {
        assert!(!entitlement_decision(UserRole::User, None));
    }

    // =========================================================================
    // SUB-E04: active and trialing grant entitlement
    // =========================================================================
    #[test]
    fn test_entitled_statuses() {
        assert!(entitlement_decision(UserRole::User, Some("active")));
        assert!(entitlement_decision(UserRole::User, Some("trialing")));
    }

    // =========================================================================
    // SUB-E05: Every other status denies entitlement
    // =========================================================================
    #[test]
    fn test_non_entitled_statuses() {
        for status in [
            "canceled",
            "past_due",
            "incomplete",
            "incomplete_expired",
            "unpaid",
            "paused",
        ] {
            assert!(
                !entitlement_decision(UserRole::User, Some(status)),
                "status {} should not be entitled",
                status
            );
        }
    }

    // =========================================================================
    // SUB-E06: Entitlement trusts status over date: an active row with a
    // period end in the past is still entitled. Expiry is enforced by
    // provider status transitions, not by date comparison on read.
    // =========================================================================
    #[test]
    fn test_active_record_with_past_period_end_still_entitled() {
        let record = SubscriptionRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            stripe_subscription_id: "sub_stale".to_string(),
            stripe_customer_id: Some("cus_1".to_string()),
            price_id: "price_monthly".to_string(),
            status: "active".to_string(),
            origin: "provider".to_string(),
            current_period_end: datetime!(2020-01-01 0:00 UTC),
            metadata: None,
            created_at: datetime!(2019-12-01 0:00 UTC),
            updated_at: datetime!(2019-12-01 0:00 UTC),
        };

        assert!(record.is_entitled());
    }

    // =========================================================================
    // SUB-E07: Status matching is exact, not prefix-based
    // =========================================================================
    #[test]
    fn test_status_matching_exact() {
        assert!(!is_entitled_status("activex"));
        assert!(!is_entitled_status("Active"));
        assert!(!is_entitled_status(""));
    }

    // =========================================================================
    // SUB-E08: Unauthorized override attempt is rejected before any mutation
    // =========================================================================
    #[test]
    fn test_non_admin_override_rejected() {
        use crate::admin::{ensure_admin, AdminActor};
        use crate::error::BillingError;

        let actor = AdminActor {
            user_id: Uuid::new_v4(),
            role: UserRole::User,
        };
        assert!(matches!(
            ensure_admin(&actor),
            Err(BillingError::Unauthorized)
        ));

        let admin = AdminActor {
            user_id: Uuid::new_v4(),
            role: UserRole::SuperAdmin,
        };
        assert!(ensure_admin(&admin).is_ok());
    }
}

#[cfg(test)]
mod webhook_signature_tests {
    use crate::error::BillingError;
    use crate::webhooks::verify_signature;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    const SECRET: &str = "whsec_test_secret_key_for_signing";
    const PAYLOAD: &str = r#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    fn sign(secret: &str, payload: &str, timestamp: i64) -> String {
        let key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!(
            "t={},v1={}",
            timestamp,
            hex::encode(mac.finalize().into_bytes())
        )
    }

    // =========================================================================
    // SUB-W01: Correctly signed payload passes verification
    // =========================================================================
    #[test]
    fn test_valid_signature_accepted() {
        let now = 1_750_000_000;
        let header = sign(SECRET, PAYLOAD, now);

        assert!(verify_signature(SECRET, PAYLOAD, &header, now).is_ok());
    }

    // =========================================================================
    // SUB-W02: Tampered payload is rejected
    // =========================================================================
    #[test]
    fn test_tampered_payload_rejected() {
        let now = 1_750_000_000;
        let header = sign(SECRET, PAYLOAD, now);
        let tampered = PAYLOAD.replace("evt_1", "evt_2");

        assert!(matches!(
            verify_signature(SECRET, &tampered, &header, now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    // =========================================================================
    // SUB-W03: Signature from a different secret is rejected
    // =========================================================================
    #[test]
    fn test_wrong_secret_rejected() {
        let now = 1_750_000_000;
        let header = sign("whsec_other_secret", PAYLOAD, now);

        assert!(verify_signature(SECRET, PAYLOAD, &header, now).is_err());
    }

    // =========================================================================
    // SUB-W04: Timestamp outside the 5-minute tolerance is rejected
    // =========================================================================
    #[test]
    fn test_stale_timestamp_rejected() {
        let now = 1_750_000_000;
        let header = sign(SECRET, PAYLOAD, now - 301);

        assert!(verify_signature(SECRET, PAYLOAD, &header, now).is_err());
    }

    // =========================================================================
    // SUB-W05: Timestamp just inside the tolerance is accepted
    // =========================================================================
    #[test]
    fn test_timestamp_within_tolerance_accepted() {
        let now = 1_750_000_000;
        let header = sign(SECRET, PAYLOAD, now - 299);

        assert!(verify_signature(SECRET, PAYLOAD, &header, now).is_ok());
    }

    // =========================================================================
    // SUB-W06: Header without a v1 signature is rejected
    // =========================================================================
    #[test]
    fn test_missing_v1_rejected() {
        let now = 1_750_000_000;
        let header = format!("t={}", now);

        assert!(verify_signature(SECRET, PAYLOAD, &header, now).is_err());
    }

    // =========================================================================
    // SUB-W07: Garbage header and non-hex signature are rejected
    // =========================================================================
    #[test]
    fn test_malformed_header_rejected() {
        let now = 1_750_000_000;

        assert!(verify_signature(SECRET, PAYLOAD, "not a signature", now).is_err());
        assert!(
            verify_signature(SECRET, PAYLOAD, &format!("t={},v1=zzzz", now), now).is_err()
        );
    }
}

#[cfg(test)]
mod origin_and_plan_tests {
    use crate::admin::PlanOverride;
    use crate::client::{PaidPlan, StripeConfig};
    use crate::store::SubscriptionOrigin;

    // =========================================================================
    // SUB-T01: Origin tags round-trip and reject unknown values
    // =========================================================================
    #[test]
    fn test_origin_round_trip() {
        for origin in [
            SubscriptionOrigin::Provider,
            SubscriptionOrigin::Lifetime,
            SubscriptionOrigin::Manual,
        ] {
            assert_eq!(origin.as_str().parse::<SubscriptionOrigin>().unwrap(), origin);
        }
        assert!("sub_12345".parse::<SubscriptionOrigin>().is_err());
    }

    // =========================================================================
    // SUB-T02: Plan override parsing covers free and the paid plans
    // =========================================================================
    #[test]
    fn test_plan_override_parsing() {
        assert_eq!("free".parse::<PlanOverride>().unwrap(), PlanOverride::Free);
        assert_eq!(
            "lifetime".parse::<PlanOverride>().unwrap(),
            PlanOverride::Lifetime
        );
        assert!("enterprise".parse::<PlanOverride>().is_err());

        assert_eq!(PlanOverride::Free.paid_plan(), None);
        assert_eq!(PlanOverride::Monthly.paid_plan(), Some(PaidPlan::Monthly));
        assert_eq!(PlanOverride::Lifetime.paid_plan(), Some(PaidPlan::Lifetime));
    }

    // =========================================================================
    // SUB-T03: Price ids map to plans and back
    // =========================================================================
    #[test]
    fn test_price_plan_mapping() {
        let config = StripeConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: "whsec_test".to_string(),
            price_monthly: "price_m".to_string(),
            price_yearly: "price_y".to_string(),
            price_lifetime: "price_l".to_string(),
            app_base_url: "http://localhost:3000".to_string(),
        };

        assert_eq!(config.price_id(PaidPlan::Yearly), "price_y");
        assert_eq!(config.plan_for_price("price_m"), Some(PaidPlan::Monthly));
        assert_eq!(config.plan_for_price("price_l"), Some(PaidPlan::Lifetime));
        assert_eq!(config.plan_for_price("price_unknown"), None);
    }

    // =========================================================================
    // SUB-T04: Paid plan parsing rejects free (free is not purchasable)
    // =========================================================================
    #[test]
    fn test_paid_plan_parsing() {
        assert_eq!("monthly".parse::<PaidPlan>().unwrap(), PaidPlan::Monthly);
        assert!("free".parse::<PaidPlan>().is_err());
    }
}
