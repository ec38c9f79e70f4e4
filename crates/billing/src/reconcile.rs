//! Reconciliation sweep
//!
//! Periodic batch pass that applies the time-driven transitions no
//! webhook fires for (trial expiry, deferred cancellations, monthly
//! counter resets) and re-syncs subscription state against the provider
//! as the safety net for missed webhooks. Four independent passes; a
//! failure on one organization never aborts the rest.

use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingError;
use crate::events::{BillingEventLogger, BillingEventType};
use crate::provider::PaymentProvider;
use crate::subscriptions::SubscriptionService;

/// One organization-level failure inside a sweep pass
#[derive(Debug, Clone, Serialize)]
pub struct SweepError {
    pub org_id: Option<Uuid>,
    pub pass: &'static str,
    pub error: String,
}

/// Structured result of one sweep invocation
#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub canceled_at_period_end: u32,
    pub expired_trials: u32,
    pub status_synced: u32,
    pub conversations_reset: u32,
    pub errors: Vec<SweepError>,
}

impl SweepReport {
    fn record_error(&mut self, pass: &'static str, org_id: Option<Uuid>, error: &BillingError) {
        tracing::error!(
            pass = pass,
            org_id = ?org_id,
            error = %error,
            "Reconciliation pass error"
        );
        self.errors.push(SweepError {
            org_id,
            pass,
            error: error.to_string(),
        });
    }
}

pub struct ReconciliationService {
    pool: PgPool,
    engine: Arc<SubscriptionService>,
    events: BillingEventLogger,
}

impl ReconciliationService {
    pub fn new(pool: PgPool, engine: Arc<SubscriptionService>) -> Self {
        let events = BillingEventLogger::new(pool.clone());
        Self {
            pool,
            engine,
            events,
        }
    }

    /// Run all four passes and aggregate the outcome
    pub async fn run_sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        self.finalize_deferred_cancellations(&mut report).await;
        self.expire_stale_trials(&mut report).await;
        self.sync_subscription_statuses(&mut report).await;
        self.reset_monthly_usage(&mut report).await;

        tracing::info!(
            canceled_at_period_end = report.canceled_at_period_end,
            expired_trials = report.expired_trials,
            status_synced = report.status_synced,
            conversations_reset = report.conversations_reset,
            errors = report.errors.len(),
            "Reconciliation sweep complete"
        );

        report
    }

    /// Pass 1: deferred cancellations whose paid period has ended
    ///
    /// The remote side is cancelled first; if that fails the local rows
    /// are left alone so the next sweep retries.
    async fn finalize_deferred_cancellations(&self, report: &mut SweepReport) {
        let due: Vec<(Uuid, String)> = match sqlx::query_as(
            r#"
            SELECT org_id, provider_subscription_id
            FROM subscriptions
            WHERE cancel_at_period_end = TRUE
              AND status <> 'cancelled'
              AND current_period_end IS NOT NULL
              AND current_period_end < NOW()
            "#,
        )
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                report.record_error("canceled_at_period_end", None, &e.into());
                return;
            }
        };

        for (org_id, provider_subscription_id) in due {
            if let Err(e) = self
                .engine
                .provider()
                .cancel_subscription(&provider_subscription_id)
                .await
            {
                report.record_error("canceled_at_period_end", Some(org_id), &e);
                continue;
            }

            let result = async {
                let mut tx = self.pool.begin().await?;
                sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET status = 'cancelled', canceled_at = NOW(), updated_at = NOW()
                    WHERE org_id = $1
                    "#,
                )
                .bind(org_id)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "UPDATE organizations SET plan_status = 'canceled', updated_at = NOW() WHERE id = $1",
                )
                .bind(org_id)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok::<(), sqlx::Error>(())
            }
            .await;

            match result {
                Ok(()) => {
                    report.canceled_at_period_end += 1;
                    tracing::info!(org_id = %org_id, "Deferred cancellation finalized");
                    self.events
                        .log(
                            org_id,
                            BillingEventType::CancellationFinalized,
                            serde_json::json!({ "immediate": false }),
                        )
                        .await;
                }
                Err(e) => report.record_error("canceled_at_period_end", Some(org_id), &e.into()),
            }
        }
    }

    /// Pass 2: trials that ended with no authorized payment method
    ///
    /// No provider event fires for "nothing happened", so this is the
    /// only place the trialing -> canceled transition can come from.
    async fn expire_stale_trials(&self, report: &mut SweepReport) {
        let expired: Vec<(Uuid,)> = match sqlx::query_as(
            r#"
            UPDATE organizations o
            SET plan_status = 'canceled', updated_at = NOW()
            WHERE o.plan_status = 'trialing'
              AND o.trial_ends_at IS NOT NULL
              AND o.trial_ends_at < NOW()
              AND NOT EXISTS (
                  SELECT 1 FROM subscriptions s
                  WHERE s.org_id = o.id AND s.status = 'authorized'
              )
            RETURNING o.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                report.record_error("expired_trials", None, &e.into());
                return;
            }
        };

        for (org_id,) in &expired {
            tracing::info!(org_id = %org_id, "Trial expired with no payment method");
            self.events
                .log(*org_id, BillingEventType::TrialExpired, serde_json::json!({}))
                .await;
        }

        report.expired_trials = expired.len() as u32;
    }

    /// Pass 3: re-fetch every non-terminal subscription from the provider
    async fn sync_subscription_statuses(&self, report: &mut SweepReport) {
        let live: Vec<(Uuid, String)> = match sqlx::query_as(
            r#"
            SELECT org_id, provider_subscription_id
            FROM subscriptions
            WHERE status IN ('pending', 'authorized', 'paused')
            "#,
        )
        .fetch_all(&self.pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                report.record_error("status_synced", None, &e.into());
                return;
            }
        };

        for (org_id, provider_subscription_id) in live {
            match self.engine.sync_subscription(&provider_subscription_id).await {
                Ok(()) => report.status_synced += 1,
                Err(e) => report.record_error("status_synced", Some(org_id), &e),
            }
        }
    }

    /// Pass 4: monthly conversation counter reset
    ///
    /// Guarded on `usage_reset_at` being before the start of the current
    /// calendar month, so running the sweep any number of times within a
    /// cycle resets each organization at most once.
    async fn reset_monthly_usage(&self, report: &mut SweepReport) {
        let result = sqlx::query(
            r#"
            UPDATE organizations
            SET conversations_used = 0, usage_reset_at = NOW(), updated_at = NOW()
            WHERE usage_reset_at < date_trunc('month', NOW())
            "#,
        )
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => {
                report.conversations_reset = done.rows_affected() as u32;
                if report.conversations_reset > 0 {
                    tracing::info!(
                        count = report.conversations_reset,
                        "Monthly conversation counters reset"
                    );
                }
            }
            Err(e) => report.record_error("conversations_reset", None, &e.into()),
        }
    }
}
