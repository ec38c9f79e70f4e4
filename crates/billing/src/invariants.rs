//! Billing invariants
//!
//! Runnable consistency checks over the billing tables. Checks only read;
//! violations carry enough context to debug. The worker runs the full set
//! daily and logs anything it finds.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// A single invariant violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Organization(s) affected
    pub org_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// System may be charging or gating incorrectly
    Critical,
    /// Data inconsistency that needs attention
    High,
    /// Potential issue, should investigate
    Medium,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
        }
    }
}

/// Summary of one full check run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct TierMismatchRow {
    org_id: Uuid,
    org_name: String,
    org_tier: String,
    subscription_tier: String,
}

#[derive(Debug, sqlx::FromRow)]
struct CancelledNoTimestampRow {
    sub_id: Uuid,
    org_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct ActiveWithoutSubscriptionRow {
    org_id: Uuid,
    org_name: String,
}

#[derive(Debug, sqlx::FromRow)]
struct StaleTrialRow {
    org_id: Uuid,
    trial_ends_at: OffsetDateTime,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all checks and return a summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_tier_matches_subscription().await?);
        violations.extend(self.check_cancelled_has_timestamp().await?);
        violations.extend(self.check_active_org_has_subscription().await?);
        violations.extend(self.check_no_stale_trials().await?);

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

    /// Invariant 1: an active organization's tier matches its subscription
    ///
    /// Tier and subscription row are always written together; a mismatch
    /// means a write path broke that contract and the tenant may have the
    /// wrong access or the wrong charge.
    async fn check_tier_matches_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<TierMismatchRow> = sqlx::query_as(
            r#"
            SELECT
                o.id as org_id,
                o.name as org_name,
                o.plan_tier as org_tier,
                s.plan_tier as subscription_tier
            FROM organizations o
            JOIN subscriptions s ON s.org_id = o.id
            WHERE o.plan_status = 'active'
              AND s.status = 'authorized'
              AND o.plan_tier <> s.plan_tier
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "tier_matches_subscription".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Organization '{}' has tier '{}' but its subscription is on '{}'",
                    row.org_name, row.org_tier, row.subscription_tier
                ),
                context: serde_json::json!({
                    "org_name": row.org_name,
                    "org_tier": row.org_tier,
                    "subscription_tier": row.subscription_tier,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: cancelled subscriptions carry a cancellation timestamp
    async fn check_cancelled_has_timestamp(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<CancelledNoTimestampRow> = sqlx::query_as(
            r#"
            SELECT s.id as sub_id, s.org_id
            FROM subscriptions s
            WHERE s.status = 'cancelled'
              AND s.canceled_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "cancelled_has_timestamp".to_string(),
                org_ids: vec![row.org_id],
                description: "Cancelled subscription has no cancellation timestamp".to_string(),
                context: serde_json::json!({ "subscription_id": row.sub_id }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: active organizations are backed by an authorized
    /// subscription
    async fn check_active_org_has_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ActiveWithoutSubscriptionRow> = sqlx::query_as(
            r#"
            SELECT o.id as org_id, o.name as org_name
            FROM organizations o
            WHERE o.plan_status = 'active'
              AND NOT EXISTS (
                  SELECT 1 FROM subscriptions s
                  WHERE s.org_id = o.id AND s.status = 'authorized'
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "active_org_has_subscription".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Organization '{}' is active with no authorized subscription",
                    row.org_name
                ),
                context: serde_json::json!({ "org_name": row.org_name }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 4: no organization sits in `trialing` long past its
    /// trial end (the sweep should have expired it)
    async fn check_no_stale_trials(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StaleTrialRow> = sqlx::query_as(
            r#"
            SELECT o.id as org_id, o.trial_ends_at
            FROM organizations o
            WHERE o.plan_status = 'trialing'
              AND o.trial_ends_at IS NOT NULL
              AND o.trial_ends_at < NOW() - INTERVAL '2 days'
              AND NOT EXISTS (
                  SELECT 1 FROM subscriptions s
                  WHERE s.org_id = o.id AND s.status = 'authorized'
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_stale_trials".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Organization is still trialing {} days after trial end; is the sweep running?",
                    (OffsetDateTime::now_utc() - row.trial_ends_at).whole_days()
                ),
                context: serde_json::json!({
                    "trial_ends_at": row.trial_ends_at.to_string(),
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "tier_matches_subscription" => self.check_tier_matches_subscription().await,
            "cancelled_has_timestamp" => self.check_cancelled_has_timestamp().await,
            "active_org_has_subscription" => self.check_active_org_has_subscription().await,
            "no_stale_trials" => self.check_no_stale_trials().await,
            _ => Ok(vec![]),
        }
    }

    /// All available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "tier_matches_subscription",
            "cancelled_has_timestamp",
            "active_org_has_subscription",
            "no_stale_trials",
        ]
    }
}
