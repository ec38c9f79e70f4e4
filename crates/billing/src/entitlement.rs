//! Feature gate
//!
//! Pure functions over `(tier, status, limits, usage)`. No IO: callers
//! pass data they already loaded, which is what lets the same checks run
//! server-side (rejecting writes) and client-side (rendering upgrade
//! prompts) with identical answers.

use casaflow_shared::{PlanStatus, PlanTier};
use serde::{Deserialize, Serialize};

use crate::plans::{PlanLimits, UNLIMITED};

/// Features gated by plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// AI chat agent answering property inquiries
    AiAgent,
    /// WhatsApp channel integration
    WhatsappChannel,
    /// Custom tenant branding (logo, colors, domain)
    CustomBranding,
    /// Lead analytics dashboard
    Analytics,
    /// CSV/portal bulk import of properties
    BulkImport,
}

/// Minimum tier required for each feature
fn minimum_tier(feature: Feature) -> PlanTier {
    match feature {
        Feature::AiAgent => PlanTier::Power,
        Feature::WhatsappChannel => PlanTier::Power,
        Feature::Analytics => PlanTier::Power,
        Feature::CustomBranding => PlanTier::Omni,
        Feature::BulkImport => PlanTier::Basic,
    }
}

/// Countable resources with per-plan limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Properties,
    TeamMembers,
    ConversationsPerMonth,
}

impl LimitType {
    fn label(&self) -> &'static str {
        match self {
            LimitType::Properties => "properties",
            LimitType::TeamMembers => "team members",
            LimitType::ConversationsPerMonth => "conversations this month",
        }
    }
}

/// Answer to a feature check
#[derive(Debug, Clone, Serialize)]
pub struct FeatureCheck {
    pub allowed: bool,
    pub message: Option<String>,
    /// Lowest tier that unlocks the feature, when blocked
    pub required_plan: Option<PlanTier>,
}

/// Answer to a limit check
#[derive(Debug, Clone, Serialize)]
pub struct LimitCheck {
    pub allowed: bool,
    pub current: i64,
    pub max: i32,
    /// Remaining headroom; `None` when unlimited
    pub remaining: Option<i64>,
    pub message: Option<String>,
}

/// Whether the plan status grants access to the product at all
pub fn plan_allows_access(status: PlanStatus) -> bool {
    status.has_access()
}

/// Is `feature` available on `tier`?
pub fn has_feature(tier: PlanTier, feature: Feature) -> FeatureCheck {
    let required = minimum_tier(feature);
    if tier >= required {
        FeatureCheck {
            allowed: true,
            message: None,
            required_plan: None,
        }
    } else {
        FeatureCheck {
            allowed: false,
            message: Some(format!(
                "This feature requires the {} plan or higher",
                required.as_str()
            )),
            required_plan: Some(required),
        }
    }
}

/// Would adding one more of `limit_type` exceed the plan limit?
///
/// `max == -1` means unlimited and always passes. The boundary is
/// exclusive at the max: `current == max` is already over.
pub fn check_limit(limits: &PlanLimits, limit_type: LimitType, current_count: i64) -> LimitCheck {
    let max = match limit_type {
        LimitType::Properties => limits.max_properties,
        LimitType::TeamMembers => limits.max_team_members,
        LimitType::ConversationsPerMonth => limits.max_conversations_per_month,
    };

    if max == UNLIMITED {
        return LimitCheck {
            allowed: true,
            current: current_count,
            max,
            remaining: None,
            message: None,
        };
    }

    let allowed = current_count < i64::from(max);
    LimitCheck {
        allowed,
        current: current_count,
        max,
        remaining: Some((i64::from(max) - current_count).max(0)),
        message: if allowed {
            None
        } else {
            Some(format!(
                "You have reached your plan's limit of {} {}",
                max,
                limit_type.label()
            ))
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::plans::plan_for;

    #[test]
    fn basic_tier_lacks_ai_agent() {
        let check = has_feature(PlanTier::Basic, Feature::AiAgent);
        assert!(!check.allowed);
        assert_eq!(check.required_plan, Some(PlanTier::Power));
        assert!(check.message.unwrap().contains("power"));
    }

    #[test]
    fn power_tier_has_ai_agent_but_not_branding() {
        assert!(has_feature(PlanTier::Power, Feature::AiAgent).allowed);
        assert!(has_feature(PlanTier::Power, Feature::WhatsappChannel).allowed);
        assert!(!has_feature(PlanTier::Power, Feature::CustomBranding).allowed);
    }

    #[test]
    fn omni_tier_has_everything() {
        for feature in [
            Feature::AiAgent,
            Feature::WhatsappChannel,
            Feature::CustomBranding,
            Feature::Analytics,
            Feature::BulkImport,
        ] {
            assert!(has_feature(PlanTier::Omni, feature).allowed);
        }
    }

    #[test]
    fn unlimited_always_passes() {
        let limits = plan_for(PlanTier::Omni).limits;
        let check = check_limit(&limits, LimitType::Properties, 10_000_000);
        assert!(check.allowed);
        assert_eq!(check.max, UNLIMITED);
        assert_eq!(check.remaining, None);

        assert!(check_limit(&limits, LimitType::Properties, 0).allowed);
    }

    #[test]
    fn limit_boundary_is_exclusive_at_max() {
        let limits = plan_for(PlanTier::Basic).limits;
        // Basic allows 50 properties
        assert!(check_limit(&limits, LimitType::Properties, 49).allowed);

        let at_max = check_limit(&limits, LimitType::Properties, 50);
        assert!(!at_max.allowed);
        assert_eq!(at_max.remaining, Some(0));
        assert!(at_max.message.unwrap().contains("limit of 50"));
    }

    #[test]
    fn remaining_never_goes_negative() {
        let limits = plan_for(PlanTier::Basic).limits;
        let check = check_limit(&limits, LimitType::TeamMembers, 99);
        assert!(!check.allowed);
        assert_eq!(check.remaining, Some(0));
    }

    #[test]
    fn access_follows_plan_status() {
        assert!(plan_allows_access(PlanStatus::Trialing));
        assert!(plan_allows_access(PlanStatus::Active));
        assert!(plan_allows_access(PlanStatus::PastDue));
        assert!(!plan_allows_access(PlanStatus::Canceled));
        assert!(!plan_allows_access(PlanStatus::Unpaid));
    }
}
