//! Plan catalog
//!
//! Static configuration for the three tiers. Prices are compiled in, so a
//! price change ships as a deployment; see DESIGN.md for the tradeoff.

use casaflow_shared::PlanTier;
use serde::Serialize;

/// Sentinel for "no limit" on a resource
pub const UNLIMITED: i32 = -1;

/// Resource limits attached to a plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanLimits {
    pub max_properties: i32,
    pub max_team_members: i32,
    pub max_conversations_per_month: i32,
}

/// A plan tier's full configuration
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub tier: PlanTier,
    pub name: &'static str,
    /// Monthly price in ARS minor units (centavos)
    pub price_ars_cents: i64,
    /// Monthly price in USD minor units (cents)
    pub price_usd_cents: i64,
    pub trial_days: i64,
    pub limits: PlanLimits,
}

impl Plan {
    /// Basic: solo agents. 50 properties, 2 seats, 100 conversations/month.
    pub fn basic() -> Self {
        Self {
            tier: PlanTier::Basic,
            name: "Basic",
            price_ars_cents: 2_999_000,
            price_usd_cents: 2_900,
            trial_days: 14,
            limits: PlanLimits {
                max_properties: 50,
                max_team_members: 2,
                max_conversations_per_month: 100,
            },
        }
    }

    /// Power: small agencies. 500 properties, 10 seats, 1000 conversations/month.
    pub fn power() -> Self {
        Self {
            tier: PlanTier::Power,
            name: "Power",
            price_ars_cents: 7_999_000,
            price_usd_cents: 7_900,
            trial_days: 14,
            limits: PlanLimits {
                max_properties: 500,
                max_team_members: 10,
                max_conversations_per_month: 1_000,
            },
        }
    }

    /// Omni: brokerages. Unlimited everything.
    pub fn omni() -> Self {
        Self {
            tier: PlanTier::Omni,
            name: "Omni",
            price_ars_cents: 19_999_000,
            price_usd_cents: 19_900,
            trial_days: 14,
            limits: PlanLimits {
                max_properties: UNLIMITED,
                max_team_members: UNLIMITED,
                max_conversations_per_month: UNLIMITED,
            },
        }
    }

    /// Price in minor units for a currency code; None for unsupported codes
    pub fn price_cents(&self, currency: &str) -> Option<i64> {
        match currency {
            "ARS" => Some(self.price_ars_cents),
            "USD" => Some(self.price_usd_cents),
            _ => None,
        }
    }
}

/// Look up a plan by tier
pub fn plan_for(tier: PlanTier) -> Plan {
    match tier {
        PlanTier::Basic => Plan::basic(),
        PlanTier::Power => Plan::power(),
        PlanTier::Omni => Plan::omni(),
    }
}

/// The full catalog in ascending tier order
pub fn catalog() -> Vec<Plan> {
    PlanTier::all().into_iter().map(plan_for).collect()
}

/// Format a minor-unit amount for display
///
/// ARS uses `.` as the thousands separator and no decimals (centavo
/// amounts are always whole pesos in the catalog); USD uses `$x.yy`.
pub fn format_price(amount_cents: i64, currency: &str) -> String {
    match currency {
        "ARS" => {
            let pesos = amount_cents / 100;
            let mut digits = pesos.to_string();
            let mut out = String::new();
            while digits.len() > 3 {
                let split = digits.len() - 3;
                out = format!(".{}{}", &digits[split..], out);
                digits.truncate(split);
            }
            format!("$ {}{}", digits, out)
        }
        _ => format!("${}.{:02}", amount_cents / 100, amount_cents % 100),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_three_ascending_tiers() {
        let plans = catalog();
        assert_eq!(plans.len(), 3);
        assert!(plans[0].price_usd_cents < plans[1].price_usd_cents);
        assert!(plans[1].price_usd_cents < plans[2].price_usd_cents);
    }

    #[test]
    fn omni_is_unlimited() {
        let omni = plan_for(PlanTier::Omni);
        assert_eq!(omni.limits.max_properties, UNLIMITED);
        assert_eq!(omni.limits.max_team_members, UNLIMITED);
        assert_eq!(omni.limits.max_conversations_per_month, UNLIMITED);
    }

    #[test]
    fn price_lookup_by_currency() {
        let basic = Plan::basic();
        assert_eq!(basic.price_cents("ARS"), Some(2_999_000));
        assert_eq!(basic.price_cents("USD"), Some(2_900));
        assert_eq!(basic.price_cents("EUR"), None);
    }

    #[test]
    fn ars_formatting_groups_thousands() {
        assert_eq!(format_price(2_999_000, "ARS"), "$ 29.990");
        assert_eq!(format_price(19_999_000, "ARS"), "$ 199.990");
        assert_eq!(format_price(50_000, "ARS"), "$ 500");
    }

    #[test]
    fn usd_formatting_keeps_cents() {
        assert_eq!(format_price(2_900, "USD"), "$29.00");
        assert_eq!(format_price(7_950, "USD"), "$79.50");
    }
}
