// Billing crate clippy configuration
#![allow(clippy::field_reassign_with_default)] // Used for conditional struct field setting
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Casaflow Billing Engine
//!
//! Tracks each organization's paid-plan lifecycle against an external
//! recurring-billing provider.
//!
//! ## Features
//!
//! - **Subscription Management**: Subscribe via hosted checkout, change
//!   plan in place, deferred cancellation, reactivation
//! - **Webhook Reconciliation**: Signature-verified ingestion that
//!   re-fetches authoritative provider state before every write
//! - **Reconciliation Sweep**: Time-driven transitions (trial expiry,
//!   deferred cancellations, monthly usage resets) plus status re-sync
//! - **Feature Gating**: Pure plan/limit checks shared by server and UI
//! - **Invariants**: Runnable consistency checks over the billing tables

pub mod entitlement;
pub mod error;
pub mod events;
pub mod invariants;
pub mod payment_methods;
pub mod plans;
pub mod provider;
pub mod reconcile;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Entitlement
pub use entitlement::{
    check_limit, has_feature, plan_allows_access, Feature, FeatureCheck, LimitCheck, LimitType,
};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{BillingEventLogger, BillingEventType};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Payment methods
pub use payment_methods::{PaymentMethodRecord, PaymentMethodService};

// Plans
pub use plans::{catalog, format_price, plan_for, Plan, PlanLimits, UNLIMITED};

// Provider
pub use provider::{
    create_provider, CreateSubscriptionRequest, MercadoPagoProvider, PaymentProvider,
    PaymentStatus, ProviderConfig, RemotePayment, RemoteSubscription, StripeProvider, WebhookEvent,
};

// Reconciliation
pub use reconcile::{ReconciliationService, SweepError, SweepReport};

// Subscriptions
pub use subscriptions::{
    map_provider_status, BillingStatus, CancelResult, CheckoutInfo, InvoiceRecord, PlanChange,
    PlanSummary, ReactivateResult, SubscriptionService, SubscriptionSummary,
};

// Webhooks
pub use webhooks::WebhookHandler;

use std::sync::Arc;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub subscriptions: Arc<SubscriptionService>,
    pub webhooks: WebhookHandler,
    pub reconciliation: ReconciliationService,
    pub payment_methods: PaymentMethodService,
    pub invariants: InvariantChecker,
}

impl BillingService {
    /// Create a billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = ProviderConfig::from_env()?;
        let currency = std::env::var("BILLING_CURRENCY").unwrap_or_else(|_| "ARS".to_string());
        Self::new(config, &currency, pool)
    }

    /// Create a billing service with explicit config
    pub fn new(config: ProviderConfig, currency: &str, pool: PgPool) -> BillingResult<Self> {
        let provider = create_provider(config)?;
        let subscriptions = Arc::new(SubscriptionService::new(provider, pool.clone(), currency));

        Ok(Self {
            webhooks: WebhookHandler::new(subscriptions.clone()),
            reconciliation: ReconciliationService::new(pool.clone(), subscriptions.clone()),
            payment_methods: PaymentMethodService::new(pool.clone()),
            invariants: InvariantChecker::new(pool),
            subscriptions,
        })
    }
}
