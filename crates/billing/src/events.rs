//! Billing event audit log
//!
//! Append-only record of engine state transitions. Failures to write an
//! audit row are logged but never fail the operation that produced them.

use sqlx::PgPool;
use uuid::Uuid;

/// Event types recorded by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingEventType {
    SubscriptionCreated,
    PlanChanged,
    CancellationScheduled,
    CancellationFinalized,
    SubscriptionReactivated,
    PaymentRecorded,
    StatusSynced,
    TrialExpired,
}

impl BillingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventType::SubscriptionCreated => "subscription_created",
            BillingEventType::PlanChanged => "plan_changed",
            BillingEventType::CancellationScheduled => "cancellation_scheduled",
            BillingEventType::CancellationFinalized => "cancellation_finalized",
            BillingEventType::SubscriptionReactivated => "subscription_reactivated",
            BillingEventType::PaymentRecorded => "payment_recorded",
            BillingEventType::StatusSynced => "status_synced",
            BillingEventType::TrialExpired => "trial_expired",
        }
    }
}

/// Writes audit rows to `billing_events`
#[derive(Clone)]
pub struct BillingEventLogger {
    pool: PgPool,
}

impl BillingEventLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record an event; best-effort, never propagates failure
    pub async fn log(&self, org_id: Uuid, event_type: BillingEventType, detail: serde_json::Value) {
        let result = sqlx::query(
            r#"
            INSERT INTO billing_events (id, org_id, event_type, detail)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(event_type.as_str())
        .bind(detail)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                org_id = %org_id,
                event_type = event_type.as_str(),
                error = %e,
                "Failed to write billing event audit row"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_strings_are_stable() {
        assert_eq!(
            BillingEventType::SubscriptionCreated.as_str(),
            "subscription_created"
        );
        assert_eq!(BillingEventType::TrialExpired.as_str(), "trial_expired");
    }
}
