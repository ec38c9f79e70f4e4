//! Subscription engine
//!
//! Owns every transition of an organization's plan tier and status. The
//! database is the source of truth for what a tenant is entitled to; the
//! provider is authoritative for payment state, which is why every
//! webhook-driven mutation re-fetches from the provider before writing.

use std::str::FromStr;
use std::sync::Arc;

use casaflow_shared::{PlanStatus, PlanTier, SubscriptionStatus};
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEventLogger, BillingEventType};
use crate::payment_methods::PaymentMethodService;
use crate::plans::{plan_for, Plan};
use crate::provider::{
    CreateSubscriptionRequest, PaymentProvider, PaymentStatus, RemoteSubscription,
};

/// Result of initiating a checkout
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutInfo {
    pub subscription_id: Uuid,
    pub provider_subscription_id: String,
    /// Hosted-checkout redirect URL
    pub init_point: String,
}

/// Result of a plan change
#[derive(Debug, Clone, Serialize)]
pub struct PlanChange {
    pub success: bool,
    pub plan_tier: PlanTier,
}

/// Result of a cancel request
#[derive(Debug, Clone, Serialize)]
pub struct CancelResult {
    pub success: bool,
    pub message: String,
}

/// Result of a reactivate request
#[derive(Debug, Clone, Serialize)]
pub struct ReactivateResult {
    pub success: bool,
    pub message: String,
}

/// Plan block of the status response
#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub tier: PlanTier,
    pub name: &'static str,
    pub status: PlanStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_ends_at: Option<OffsetDateTime>,
}

/// Subscription block of the status response
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionSummary {
    pub status: SubscriptionStatus,
    pub plan_tier: PlanTier,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

/// Full billing status for an organization
#[derive(Debug, Clone, Serialize)]
pub struct BillingStatus {
    pub plan: PlanSummary,
    pub subscription: Option<SubscriptionSummary>,
    pub has_payment_method: bool,
    pub provider: &'static str,
}

/// One invoice line for the billing history
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceRecord {
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
}

/// Billing-relevant slice of the organization record
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrganizationRow {
    pub id: Uuid,
    pub name: String,
    pub plan_tier: String,
    pub plan_status: String,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub conversations_used: i32,
    pub max_properties: i32,
    pub max_team_members: i32,
    pub max_conversations: i32,
}

impl OrganizationRow {
    pub fn tier(&self) -> BillingResult<PlanTier> {
        PlanTier::from_str(&self.plan_tier).map_err(|e| BillingError::InvalidTier(e.0))
    }

    pub fn status(&self) -> BillingResult<PlanStatus> {
        PlanStatus::from_str(&self.plan_status).map_err(|_| {
            BillingError::Provider(format!(
                "organization {} has undefined plan status '{}'",
                self.id, self.plan_status
            ))
        })
    }
}

/// Local subscription record
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub org_id: Uuid,
    pub provider: String,
    pub provider_subscription_id: String,
    pub plan_tier: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
}

impl SubscriptionRow {
    pub fn subscription_status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_str(&self.status).unwrap_or(SubscriptionStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        self.subscription_status().is_terminal()
    }
}

/// Map authoritative provider state onto the organization status machine
///
/// `last_payment` carries the outcome of the charge that triggered this
/// evaluation, when there is one (webhook payment path); the pure sync
/// path passes `None`. A `pending` remote subscription never moves the
/// organization: activation only happens on a confirmed payment.
pub fn map_provider_status(
    remote: SubscriptionStatus,
    last_payment: Option<PaymentStatus>,
    current: PlanStatus,
) -> PlanStatus {
    match remote {
        SubscriptionStatus::Cancelled => PlanStatus::Canceled,
        SubscriptionStatus::Paused => PlanStatus::Unpaid,
        SubscriptionStatus::Authorized => match last_payment {
            Some(PaymentStatus::Rejected) => PlanStatus::PastDue,
            Some(PaymentStatus::Pending) => current,
            _ => PlanStatus::Active,
        },
        SubscriptionStatus::Pending => current,
    }
}

/// Whole days of provider-side trial remaining, if any
fn trial_days_remaining(trial_ends_at: Option<OffsetDateTime>, now: OffsetDateTime) -> Option<i64> {
    trial_ends_at
        .map(|end| (end - now).whole_days())
        .filter(|days| *days > 0)
}

/// Subscription service: the engine's public surface
pub struct SubscriptionService {
    provider: Arc<dyn PaymentProvider>,
    pool: PgPool,
    /// Billing currency for new subscriptions (existing ones keep theirs)
    currency: String,
    payment_methods: PaymentMethodService,
    events: BillingEventLogger,
}

impl SubscriptionService {
    pub fn new(provider: Arc<dyn PaymentProvider>, pool: PgPool, currency: &str) -> Self {
        let payment_methods = PaymentMethodService::new(pool.clone());
        let events = BillingEventLogger::new(pool.clone());
        Self {
            provider,
            pool,
            currency: currency.to_string(),
            payment_methods,
            events,
        }
    }

    pub fn provider(&self) -> &Arc<dyn PaymentProvider> {
        &self.provider
    }

    async fn load_org(&self, org_id: Uuid) -> BillingResult<OrganizationRow> {
        let org: Option<OrganizationRow> = sqlx::query_as(
            r#"
            SELECT id, name, plan_tier, plan_status, trial_ends_at,
                   conversations_used, max_properties, max_team_members, max_conversations
            FROM organizations
            WHERE id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        org.ok_or(BillingError::OrganizationNotFound(org_id))
    }

    async fn load_subscription(&self, org_id: Uuid) -> BillingResult<Option<SubscriptionRow>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT id, org_id, provider, provider_subscription_id, plan_tier,
                   amount_cents, currency, status, current_period_start,
                   current_period_end, cancel_at_period_end, canceled_at
            FROM subscriptions
            WHERE org_id = $1
            "#,
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn load_subscription_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRow>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT id, org_id, provider, provider_subscription_id, plan_tier,
                   amount_cents, currency, status, current_period_start,
                   current_period_end, cancel_at_period_end, canceled_at
            FROM subscriptions
            WHERE provider_subscription_id = $1
            "#,
        )
        .bind(provider_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Start a checkout for an organization with no live subscription
    ///
    /// Creates a pending remote subscription and persists a local row in
    /// `pending` status. The organization's plan status is untouched:
    /// activation only happens once a payment webhook (or the sweep)
    /// confirms the charge.
    pub async fn subscribe(
        &self,
        org_id: Uuid,
        tier: PlanTier,
        payer_email: &str,
    ) -> BillingResult<CheckoutInfo> {
        if payer_email.trim().is_empty() {
            return Err(BillingError::MissingField("payer_email"));
        }

        let org = self.load_org(org_id).await?;

        if let Some(existing) = self.load_subscription(org_id).await? {
            if !existing.is_terminal() {
                return Err(BillingError::SubscriptionAlreadyActive(org_id));
            }
            // A cancelled row is superseded below via the org_id upsert
        }

        let plan = plan_for(tier);
        let amount_cents = plan.price_cents(&self.currency).ok_or_else(|| {
            BillingError::Config(format!("no {} price for tier {tier}", self.currency))
        })?;

        let request = CreateSubscriptionRequest {
            org_id,
            reason: format!("Casaflow {}", plan.name),
            payer_email: payer_email.to_string(),
            amount_cents,
            currency: self.currency.clone(),
            trial_days: trial_days_remaining(org.trial_ends_at, OffsetDateTime::now_utc()),
        };

        let remote = self.provider.create_subscription(&request).await?;
        let init_point = remote
            .init_point
            .clone()
            .ok_or_else(|| BillingError::Provider("provider returned no checkout URL".into()))?;

        let (subscription_id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO subscriptions (
                id, org_id, provider, provider_subscription_id, plan_tier,
                amount_cents, currency, status, cancel_at_period_end
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', FALSE)
            ON CONFLICT (org_id) DO UPDATE SET
                provider = EXCLUDED.provider,
                provider_subscription_id = EXCLUDED.provider_subscription_id,
                plan_tier = EXCLUDED.plan_tier,
                amount_cents = EXCLUDED.amount_cents,
                currency = EXCLUDED.currency,
                status = 'pending',
                current_period_start = NULL,
                current_period_end = NULL,
                cancel_at_period_end = FALSE,
                canceled_at = NULL,
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(self.provider.name())
        .bind(&remote.provider_subscription_id)
        .bind(tier.as_str())
        .bind(amount_cents)
        .bind(&self.currency)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            org_id = %org_id,
            tier = %tier,
            provider_subscription_id = %remote.provider_subscription_id,
            "Checkout initiated"
        );

        self.events
            .log(
                org_id,
                BillingEventType::SubscriptionCreated,
                serde_json::json!({
                    "tier": tier.as_str(),
                    "provider_subscription_id": remote.provider_subscription_id,
                    "amount_cents": amount_cents,
                    "currency": self.currency,
                }),
            )
            .await;

        Ok(CheckoutInfo {
            subscription_id,
            provider_subscription_id: remote.provider_subscription_id,
            init_point,
        })
    }

    /// Change an organization's plan in place
    ///
    /// Updates the remote amount first, then writes the local subscription
    /// row and `organizations.plan_tier` in one transaction. If the local
    /// write fails after the remote call succeeded, the write is retried
    /// with backoff; exhausting the retries surfaces the error rather than
    /// leaving tier and subscription divergent. No proration: the new
    /// amount applies from the next billing cycle.
    pub async fn change_plan(&self, org_id: Uuid, new_tier: PlanTier) -> BillingResult<PlanChange> {
        let subscription = self
            .load_subscription(org_id)
            .await?
            .filter(|s| !s.is_terminal())
            .ok_or(BillingError::SubscriptionNotFound(org_id))?;

        let old_tier = PlanTier::from_str(&subscription.plan_tier)
            .map_err(|e| BillingError::InvalidTier(e.0))?;
        if old_tier == new_tier {
            return Ok(PlanChange {
                success: true,
                plan_tier: new_tier,
            });
        }

        let plan = plan_for(new_tier);
        let amount_cents = plan.price_cents(&subscription.currency).ok_or_else(|| {
            BillingError::Config(format!(
                "no {} price for tier {new_tier}",
                subscription.currency
            ))
        })?;

        self.provider
            .update_subscription_amount(
                &subscription.provider_subscription_id,
                amount_cents,
                &subscription.currency,
            )
            .await?;

        // The remote side is already charging the new amount; the local
        // write must not be dropped on a transient database error.
        let strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        RetryIf::spawn(
            strategy,
            || self.apply_plan_change(org_id, old_tier, new_tier, amount_cents, &plan),
            |e: &BillingError| matches!(e, BillingError::Database(_)),
        )
        .await?;

        tracing::info!(
            org_id = %org_id,
            from_tier = %old_tier,
            to_tier = %new_tier,
            amount_cents = amount_cents,
            "Plan changed"
        );

        self.events
            .log(
                org_id,
                BillingEventType::PlanChanged,
                serde_json::json!({
                    "from_tier": old_tier.as_str(),
                    "to_tier": new_tier.as_str(),
                    "amount_cents": amount_cents,
                }),
            )
            .await;

        Ok(PlanChange {
            success: true,
            plan_tier: new_tier,
        })
    }

    /// One transactional write for the tier change: subscription row and
    /// organization row move together, so no reader observes a mismatch.
    async fn apply_plan_change(
        &self,
        org_id: Uuid,
        old_tier: PlanTier,
        new_tier: PlanTier,
        amount_cents: i64,
        plan: &Plan,
    ) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan_tier = $1, amount_cents = $2, updated_at = NOW()
            WHERE org_id = $3
            "#,
        )
        .bind(new_tier.as_str())
        .bind(amount_cents)
        .bind(org_id)
        .execute(&mut *tx)
        .await?;

        // Guarded on the tier we read: a concurrent writer that moved the
        // org elsewhere makes this a zero-row update instead of a silent
        // overwrite.
        let updated = sqlx::query(
            r#"
            UPDATE organizations
            SET plan_tier = $1,
                max_properties = $2,
                max_team_members = $3,
                max_conversations = $4,
                updated_at = NOW()
            WHERE id = $5 AND plan_tier = $6
            "#,
        )
        .bind(new_tier.as_str())
        .bind(plan.limits.max_properties)
        .bind(plan.limits.max_team_members)
        .bind(plan.limits.max_conversations_per_month)
        .bind(org_id)
        .bind(old_tier.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let current: Option<(String,)> =
                sqlx::query_as("SELECT plan_tier FROM organizations WHERE id = $1")
                    .bind(org_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            match current {
                Some((tier,)) if tier == new_tier.as_str() => {
                    tracing::info!(
                        org_id = %org_id,
                        tier = %tier,
                        "Concurrent plan change agreed on target"
                    );
                }
                Some((tier,)) => {
                    tracing::warn!(
                        org_id = %org_id,
                        expected = %old_tier,
                        found = %tier,
                        "Divergent concurrent plan change detected"
                    );
                    tx.rollback().await?;
                    return Err(BillingError::StaleWrite(org_id));
                }
                None => {
                    tx.rollback().await?;
                    return Err(BillingError::OrganizationNotFound(org_id));
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Request cancellation
    ///
    /// Inside the original provider-side trial (no paid invoice yet) the
    /// cancellation is immediate. Otherwise only the deferred flag is set;
    /// the provider keeps billing until period end and the reconciliation
    /// sweep finalizes. Idempotent.
    pub async fn cancel_subscription(&self, org_id: Uuid) -> BillingResult<CancelResult> {
        let org = self.load_org(org_id).await?;
        let subscription = self
            .load_subscription(org_id)
            .await?
            .ok_or(BillingError::SubscriptionNotFound(org_id))?;

        if subscription.is_terminal() {
            return Ok(CancelResult {
                success: true,
                message: "Subscription is already cancelled".to_string(),
            });
        }

        let has_paid_invoice: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM invoices WHERE org_id = $1 AND status = 'paid' LIMIT 1")
                .bind(org_id)
                .fetch_optional(&self.pool)
                .await?;

        let in_trial = org.status()? == PlanStatus::Trialing && has_paid_invoice.is_none();

        if in_trial {
            self.provider
                .cancel_subscription(&subscription.provider_subscription_id)
                .await?;

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

            tracing::info!(org_id = %org_id, "Subscription cancelled immediately (trial window)");

            self.events
                .log(
                    org_id,
                    BillingEventType::CancellationFinalized,
                    serde_json::json!({ "immediate": true }),
                )
                .await;

            return Ok(CancelResult {
                success: true,
                message: "Subscription cancelled".to_string(),
            });
        }

        let updated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET cancel_at_period_end = TRUE, updated_at = NOW()
            WHERE org_id = $1 AND cancel_at_period_end = FALSE
            "#,
        )
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            // Second call; nothing to do
            return Ok(CancelResult {
                success: true,
                message: "Cancellation already scheduled for period end".to_string(),
            });
        }

        tracing::info!(org_id = %org_id, "Cancellation scheduled for period end");

        self.events
            .log(
                org_id,
                BillingEventType::CancellationScheduled,
                serde_json::json!({ "immediate": false }),
            )
            .await;

        Ok(CancelResult {
            success: true,
            message: "Subscription will be cancelled at the end of the current period".to_string(),
        })
    }

    /// Clear a deferred cancellation before it takes effect
    pub async fn reactivate_subscription(&self, org_id: Uuid) -> BillingResult<ReactivateResult> {
        let subscription = self
            .load_subscription(org_id)
            .await?
            .ok_or(BillingError::SubscriptionNotFound(org_id))?;

        if subscription.is_terminal() {
            return Err(BillingError::SubscriptionAlreadyCanceled(org_id));
        }

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET cancel_at_period_end = FALSE, updated_at = NOW()
            WHERE org_id = $1
            "#,
        )
        .bind(org_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(org_id = %org_id, "Deferred cancellation cleared");

        self.events
            .log(
                org_id,
                BillingEventType::SubscriptionReactivated,
                serde_json::json!({}),
            )
            .await;

        Ok(ReactivateResult {
            success: true,
            message: "Subscription reactivated".to_string(),
        })
    }

    /// Reconciliation primitive for payment events
    ///
    /// Re-fetches the payment from the provider (the webhook payload's
    /// own status field is never trusted), records the invoice keyed by
    /// the provider payment id, then re-fetches the owning subscription
    /// and maps its state onto the organization. Safe to call any number
    /// of times with the same id.
    pub async fn handle_subscription_payment(&self, payment_id: &str) -> BillingResult<()> {
        let payment = self.provider.fetch_payment(payment_id).await?;

        let Some(provider_subscription_id) = payment.provider_subscription_id.clone() else {
            tracing::warn!(
                payment_id = %payment_id,
                "Payment is not linked to a subscription; skipping"
            );
            return Ok(());
        };

        let Some(subscription) = self
            .load_subscription_by_provider_id(&provider_subscription_id)
            .await?
        else {
            tracing::warn!(
                payment_id = %payment_id,
                provider_subscription_id = %provider_subscription_id,
                "Payment references an unknown subscription; skipping"
            );
            return Ok(());
        };

        let org_id = subscription.org_id;

        // Insert-if-new first so replays are visible as no-ops; the
        // follow-up update lets a pending invoice settle to paid/failed.
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO invoices (
                id, org_id, subscription_id, provider_payment_id,
                amount_cents, currency, status, paid_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (provider_payment_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(subscription.id)
        .bind(&payment.provider_payment_id)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(payment.status.as_invoice_status())
        .bind(payment.paid_at)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_some() {
            self.events
                .log(
                    org_id,
                    BillingEventType::PaymentRecorded,
                    serde_json::json!({
                        "provider_payment_id": payment.provider_payment_id,
                        "amount_cents": payment.amount_cents,
                        "status": payment.status.as_invoice_status(),
                    }),
                )
                .await;
        } else {
            sqlx::query(
                r#"
                UPDATE invoices
                SET status = $1, paid_at = COALESCE(paid_at, $2)
                WHERE provider_payment_id = $3
                "#,
            )
            .bind(payment.status.as_invoice_status())
            .bind(payment.paid_at)
            .bind(&payment.provider_payment_id)
            .execute(&self.pool)
            .await?;

            tracing::info!(
                payment_id = %payment.provider_payment_id,
                "Duplicate payment delivery; invoice already recorded"
            );
        }

        if payment.status == PaymentStatus::Approved {
            self.payment_methods
                .upsert_from_payment(
                    org_id,
                    self.provider.name(),
                    payment.card_brand.as_deref(),
                    payment.card_last_four.as_deref(),
                )
                .await?;
        }

        let remote = self
            .provider
            .fetch_subscription(&provider_subscription_id)
            .await?;

        self.apply_remote_state(&subscription, &remote, Some(payment.status))
            .await
    }

    /// Re-fetch one subscription from the provider and reconcile local
    /// state; used by the webhook subscription path and the sweep.
    pub async fn sync_subscription(&self, provider_subscription_id: &str) -> BillingResult<()> {
        let Some(subscription) = self
            .load_subscription_by_provider_id(provider_subscription_id)
            .await?
        else {
            tracing::warn!(
                provider_subscription_id = %provider_subscription_id,
                "Sync requested for unknown subscription; skipping"
            );
            return Ok(());
        };

        let remote = self
            .provider
            .fetch_subscription(provider_subscription_id)
            .await?;

        self.apply_remote_state(&subscription, &remote, None).await
    }

    /// Write provider state onto the local rows. Status transitions are
    /// absolute sets keyed by provider id, so replays converge on the
    /// same end state.
    async fn apply_remote_state(
        &self,
        subscription: &SubscriptionRow,
        remote: &RemoteSubscription,
        last_payment: Option<PaymentStatus>,
    ) -> BillingResult<()> {
        let org = self.load_org(subscription.org_id).await?;
        let current_status = org.status()?;
        let new_status = map_provider_status(remote.status, last_payment, current_status);

        let tier = PlanTier::from_str(&subscription.plan_tier)
            .map_err(|e| BillingError::InvalidTier(e.0))?;
        let plan = plan_for(tier);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $1,
                amount_cents = $2,
                current_period_start = COALESCE($3, current_period_start),
                current_period_end = COALESCE($4, current_period_end),
                canceled_at = CASE
                    WHEN $1 = 'cancelled' THEN COALESCE(canceled_at, NOW())
                    ELSE canceled_at
                END,
                updated_at = NOW()
            WHERE provider_subscription_id = $5
            "#,
        )
        .bind(remote.status.as_str())
        .bind(if remote.amount_cents > 0 {
            remote.amount_cents
        } else {
            subscription.amount_cents
        })
        .bind(remote.current_period_start)
        .bind(remote.current_period_end)
        .bind(&subscription.provider_subscription_id)
        .execute(&mut *tx)
        .await?;

        if new_status == PlanStatus::Active {
            // Activation writes tier, status and limits together so no
            // reader sees a tier without its subscription backing it
            sqlx::query(
                r#"
                UPDATE organizations
                SET plan_status = 'active',
                    plan_tier = $1,
                    max_properties = $2,
                    max_team_members = $3,
                    max_conversations = $4,
                    updated_at = NOW()
                WHERE id = $5
                "#,
            )
            .bind(tier.as_str())
            .bind(plan.limits.max_properties)
            .bind(plan.limits.max_team_members)
            .bind(plan.limits.max_conversations_per_month)
            .bind(subscription.org_id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "UPDATE organizations SET plan_status = $1, updated_at = NOW() WHERE id = $2",
            )
            .bind(new_status.as_str())
            .bind(subscription.org_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        if new_status != current_status {
            tracing::info!(
                org_id = %subscription.org_id,
                from = %current_status,
                to = %new_status,
                remote_status = %remote.status,
                "Plan status transition"
            );

            self.events
                .log(
                    subscription.org_id,
                    BillingEventType::StatusSynced,
                    serde_json::json!({
                        "from": current_status.as_str(),
                        "to": new_status.as_str(),
                        "remote_status": remote.status.as_str(),
                    }),
                )
                .await;
        }

        Ok(())
    }

    /// Billing status for the settings page
    pub async fn subscription_status(&self, org_id: Uuid) -> BillingResult<BillingStatus> {
        let org = self.load_org(org_id).await?;
        let tier = org.tier()?;
        let plan = plan_for(tier);

        let subscription = self.load_subscription(org_id).await?.map(|row| {
            let plan_tier = PlanTier::from_str(&row.plan_tier).unwrap_or(tier);
            SubscriptionSummary {
                status: row.subscription_status(),
                plan_tier,
                amount_cents: row.amount_cents,
                currency: row.currency,
                current_period_end: row.current_period_end,
                cancel_at_period_end: row.cancel_at_period_end,
            }
        });

        let has_payment_method = self.payment_methods.has_active(org_id).await?;

        Ok(BillingStatus {
            plan: PlanSummary {
                tier,
                name: plan.name,
                status: org.status()?,
                trial_ends_at: org.trial_ends_at,
            },
            subscription,
            has_payment_method,
            provider: self.provider.name(),
        })
    }

    /// Invoice history, newest first
    pub async fn list_invoices(&self, org_id: Uuid) -> BillingResult<Vec<InvoiceRecord>> {
        let rows: Vec<(i64, String, String, OffsetDateTime)> = sqlx::query_as(
            r#"
            SELECT amount_cents, currency, status, created_at
            FROM invoices
            WHERE org_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(amount_cents, currency, status, date)| InvoiceRecord {
                amount_cents,
                currency,
                status,
                date,
            })
            .collect())
    }
}
