// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing Engine
//!
//! Boundary conditions across:
//! - Feature gate limits (BILL-L01 to BILL-L06)
//! - Status mapping (BILL-M01 to BILL-M04)
//! - Plan catalog and price formatting (BILL-P01 to BILL-P03)
//! - Webhook signature handling (BILL-W01 to BILL-W03)

#[cfg(test)]
mod limit_tests {
    use crate::entitlement::{check_limit, LimitType};
    use crate::plans::{PlanLimits, UNLIMITED};

    fn limits(max: i32) -> PlanLimits {
        PlanLimits {
            max_properties: max,
            max_team_members: max,
            max_conversations_per_month: max,
        }
    }

    // =========================================================================
    // BILL-L01: current == max - exceeded, boundary is exclusive at max
    // =========================================================================
    #[test]
    fn test_at_limit_rejected() {
        let check = check_limit(&limits(50), LimitType::Properties, 50);
        assert!(!check.allowed, "50 of 50 should be rejected");
        assert_eq!(check.remaining, Some(0));
    }

    // =========================================================================
    // BILL-L02: current == max - 1 - allowed
    // =========================================================================
    #[test]
    fn test_one_below_limit_allowed() {
        let check = check_limit(&limits(50), LimitType::Properties, 49);
        assert!(check.allowed, "49 of 50 should be allowed");
        assert_eq!(check.remaining, Some(1));
    }

    // =========================================================================
    // BILL-L03: unlimited sentinel passes at any count
    // =========================================================================
    #[test]
    fn test_unlimited_passes_at_ten_million() {
        let check = check_limit(&limits(UNLIMITED), LimitType::Properties, 10_000_000);
        assert!(check.allowed);
        assert_eq!(check.remaining, None);
    }

    // =========================================================================
    // BILL-L04: unlimited sentinel passes at zero
    // =========================================================================
    #[test]
    fn test_unlimited_passes_at_zero() {
        assert!(check_limit(&limits(UNLIMITED), LimitType::ConversationsPerMonth, 0).allowed);
    }

    // =========================================================================
    // BILL-L05: zero limit rejects the first item
    // =========================================================================
    #[test]
    fn test_zero_limit_rejects_everything() {
        let check = check_limit(&limits(0), LimitType::TeamMembers, 0);
        assert!(!check.allowed);
        assert_eq!(check.remaining, Some(0));
    }

    // =========================================================================
    // BILL-L06: usage already far over the limit keeps remaining at zero
    // =========================================================================
    #[test]
    fn test_over_limit_remaining_clamped() {
        let check = check_limit(&limits(10), LimitType::ConversationsPerMonth, 500);
        assert!(!check.allowed);
        assert_eq!(check.remaining, Some(0));
    }
}

#[cfg(test)]
mod status_mapping_tests {
    use crate::provider::PaymentStatus;
    use crate::subscriptions::map_provider_status;
    use casaflow_shared::{PlanStatus, SubscriptionStatus};

    // =========================================================================
    // BILL-M01: duplicate approved-payment deliveries converge on active
    // =========================================================================
    #[test]
    fn test_replayed_approval_is_stable() {
        let first = map_provider_status(
            SubscriptionStatus::Authorized,
            Some(PaymentStatus::Approved),
            PlanStatus::Trialing,
        );
        let replay = map_provider_status(
            SubscriptionStatus::Authorized,
            Some(PaymentStatus::Approved),
            first,
        );
        assert_eq!(first, PlanStatus::Active);
        assert_eq!(replay, PlanStatus::Active);
    }

    // =========================================================================
    // BILL-M02: out-of-order delivery - a late pending event after
    // activation must not regress the organization
    // =========================================================================
    #[test]
    fn test_late_pending_event_does_not_regress() {
        let status = map_provider_status(SubscriptionStatus::Pending, None, PlanStatus::Active);
        assert_eq!(status, PlanStatus::Active);
    }

    // =========================================================================
    // BILL-M03: past_due recovers to active on the next approved charge
    // =========================================================================
    #[test]
    fn test_past_due_recovers() {
        let status = map_provider_status(
            SubscriptionStatus::Authorized,
            Some(PaymentStatus::Approved),
            PlanStatus::PastDue,
        );
        assert_eq!(status, PlanStatus::Active);
    }

    // =========================================================================
    // BILL-M04: a rejected charge on a cancelled subscription stays canceled
    // =========================================================================
    #[test]
    fn test_rejection_after_cancellation_stays_canceled() {
        let status = map_provider_status(
            SubscriptionStatus::Cancelled,
            Some(PaymentStatus::Rejected),
            PlanStatus::Active,
        );
        assert_eq!(status, PlanStatus::Canceled);
    }
}

#[cfg(test)]
mod plan_tests {
    use crate::plans::{catalog, format_price, plan_for};
    use casaflow_shared::PlanTier;

    // =========================================================================
    // BILL-P01: every tier has a price in both supported currencies
    // =========================================================================
    #[test]
    fn test_every_tier_priced_in_both_currencies() {
        for plan in catalog() {
            assert!(plan.price_cents("ARS").is_some(), "{} missing ARS", plan.name);
            assert!(plan.price_cents("USD").is_some(), "{} missing USD", plan.name);
        }
    }

    // =========================================================================
    // BILL-P02: zero amount formats without separators
    // =========================================================================
    #[test]
    fn test_zero_amount_formatting() {
        assert_eq!(format_price(0, "ARS"), "$ 0");
        assert_eq!(format_price(0, "USD"), "$0.00");
    }

    // =========================================================================
    // BILL-P03: trial length is uniform across tiers
    // =========================================================================
    #[test]
    fn test_trial_days_uniform() {
        for tier in PlanTier::all() {
            assert_eq!(plan_for(tier).trial_days, 14);
        }
    }
}

#[cfg(test)]
mod webhook_signature_tests {
    use crate::provider::{MercadoPagoProvider, PaymentProvider, ProviderConfig};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use time::OffsetDateTime;

    fn provider(secret: &str) -> MercadoPagoProvider {
        MercadoPagoProvider::new(ProviderConfig {
            provider: "mercadopago".to_string(),
            access_token: "TEST-token".to_string(),
            webhook_secret: secret.to_string(),
            base_url: "http://unused".to_string(),
            checkout_back_url: "http://unused/back".to_string(),
        })
    }

    fn signature(secret: &str, data_id: &str, request_id: &str, ts: i64) -> String {
        let manifest = format!("id:{data_id};request-id:{request_id};ts:{ts};");
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(manifest.as_bytes());
        format!("ts={ts},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    // =========================================================================
    // BILL-W01: one flipped hex character in v1 must fail verification
    // =========================================================================
    #[test]
    fn test_single_bit_tamper_rejected() {
        let provider = provider("secret-1");
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let valid = signature("secret-1", "42", "req", ts);

        let mut tampered = valid.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == '0' { '1' } else { '0' });

        assert!(provider.verify_webhook("42", &valid, "req").is_ok());
        assert!(provider.verify_webhook("42", &tampered, "req").is_err());
    }

    // =========================================================================
    // BILL-W02: signature over one request id does not authorize another
    // =========================================================================
    #[test]
    fn test_request_id_is_bound_into_signature() {
        let provider = provider("secret-1");
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let header = signature("secret-1", "42", "req-a", ts);

        assert!(provider.verify_webhook("42", &header, "req-b").is_err());
    }

    // =========================================================================
    // BILL-W03: uppercase resource ids verify against the lowercase manifest
    // =========================================================================
    #[test]
    fn test_data_id_is_lowercased_in_manifest() {
        let provider = provider("secret-1");
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let header = signature("secret-1", "abc123", "req", ts);

        assert!(provider.verify_webhook("ABC123", &header, "req").is_ok());
    }
}
