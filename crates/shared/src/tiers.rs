//! Plan tier and billing status enums
//!
//! These are stored as lowercase text in Postgres and serialized the same
//! way over the API, so both sides of the stack agree on the wire form.

use serde::{Deserialize, Serialize};

/// Error returned when parsing a tier or status from text fails
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value: {0}")]
pub struct TierParseError(pub String);

/// Pricing/feature bundle assigned to an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Basic,
    Power,
    Omni,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Basic => "basic",
            PlanTier::Power => "power",
            PlanTier::Omni => "omni",
        }
    }

    /// All tiers in ascending order
    pub fn all() -> [PlanTier; 3] {
        [PlanTier::Basic, PlanTier::Power, PlanTier::Omni]
    }
}

impl std::str::FromStr for PlanTier {
    type Err = TierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(PlanTier::Basic),
            "power" => Ok(PlanTier::Power),
            "omni" => Ok(PlanTier::Omni),
            other => Err(TierParseError(other.to_string())),
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Organization billing lifecycle state
///
/// Transitions are owned by the billing engine:
/// `trialing -> active -> past_due -> canceled`, with `active -> unpaid`
/// on repeated payment failure and `unpaid -> active` on a later
/// successful charge. Trial expiry (`trialing -> canceled`) is applied by
/// the reconciliation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Trialing => "trialing",
            PlanStatus::Active => "active",
            PlanStatus::PastDue => "past_due",
            PlanStatus::Canceled => "canceled",
            PlanStatus::Unpaid => "unpaid",
        }
    }

    /// Whether this status grants access to the product
    ///
    /// `past_due` keeps access during the provider's retry window;
    /// `canceled` and `unpaid` do not.
    pub fn has_access(&self) -> bool {
        matches!(
            self,
            PlanStatus::Trialing | PlanStatus::Active | PlanStatus::PastDue
        )
    }
}

impl std::str::FromStr for PlanStatus {
    type Err = TierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trialing" => Ok(PlanStatus::Trialing),
            "active" => Ok(PlanStatus::Active),
            "past_due" => Ok(PlanStatus::PastDue),
            "canceled" => Ok(PlanStatus::Canceled),
            "unpaid" => Ok(PlanStatus::Unpaid),
            other => Err(TierParseError(other.to_string())),
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Local mirror of the provider's subscription states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created remotely, checkout not completed
    Pending,
    /// Authorized for recurring charges
    Authorized,
    /// Collection paused by the provider after repeated failures
    Paused,
    /// Cancelled remotely or locally finalized
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Authorized => "authorized",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again; a fresh subscribe is
    /// required instead.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Cancelled)
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = TierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubscriptionStatus::Pending),
            "authorized" => Ok(SubscriptionStatus::Authorized),
            "paused" => Ok(SubscriptionStatus::Paused),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(TierParseError(other.to_string())),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn tier_round_trips_through_str() {
        for tier in PlanTier::all() {
            assert_eq!(PlanTier::from_str(tier.as_str()).unwrap(), tier);
        }
        assert!(PlanTier::from_str("enterprise").is_err());
    }

    #[test]
    fn tier_ordering_matches_pricing() {
        assert!(PlanTier::Basic < PlanTier::Power);
        assert!(PlanTier::Power < PlanTier::Omni);
    }

    #[test]
    fn plan_status_access() {
        assert!(PlanStatus::Trialing.has_access());
        assert!(PlanStatus::Active.has_access());
        assert!(PlanStatus::PastDue.has_access());
        assert!(!PlanStatus::Canceled.has_access());
        assert!(!PlanStatus::Unpaid.has_access());
    }

    #[test]
    fn plan_status_round_trips_through_str() {
        for status in [
            PlanStatus::Trialing,
            PlanStatus::Active,
            PlanStatus::PastDue,
            PlanStatus::Canceled,
            PlanStatus::Unpaid,
        ] {
            assert_eq!(PlanStatus::from_str(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn only_cancelled_subscription_is_terminal() {
        assert!(SubscriptionStatus::Cancelled.is_terminal());
        assert!(!SubscriptionStatus::Pending.is_terminal());
        assert!(!SubscriptionStatus::Authorized.is_terminal());
        assert!(!SubscriptionStatus::Paused.is_terminal());
    }
}
