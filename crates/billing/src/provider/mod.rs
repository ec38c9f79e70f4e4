//! Payment provider abstraction
//!
//! The engine depends only on [`PaymentProvider`]; concrete adapters
//! translate intents into one provider's recurring-billing API and
//! normalize inbound webhooks. Adding a provider means adding an adapter,
//! never touching the engine.

pub mod mercadopago;
pub mod stripe;

use std::sync::Arc;

use async_trait::async_trait;
use casaflow_shared::SubscriptionStatus;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

pub use mercadopago::MercadoPagoProvider;
pub use stripe::StripeProvider;

/// Request to create a remote recurring subscription
#[derive(Debug, Clone)]
pub struct CreateSubscriptionRequest {
    pub org_id: Uuid,
    /// Human-readable charge description shown at checkout
    pub reason: String,
    pub payer_email: String,
    pub amount_cents: i64,
    pub currency: String,
    /// Provider-side free trial, in days
    pub trial_days: Option<i64>,
}

/// Normalized view of a provider-side subscription
#[derive(Debug, Clone)]
pub struct RemoteSubscription {
    pub provider_subscription_id: String,
    pub status: SubscriptionStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    /// Hosted-checkout redirect URL, present on freshly created subscriptions
    pub init_point: Option<String>,
    /// Our organization id, echoed back by the provider
    pub external_reference: Option<String>,
}

/// Outcome of a single charge attempt at the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Approved,
    Rejected,
    Pending,
}

impl PaymentStatus {
    pub fn as_invoice_status(&self) -> &'static str {
        match self {
            PaymentStatus::Approved => "paid",
            PaymentStatus::Rejected => "failed",
            PaymentStatus::Pending => "pending",
        }
    }
}

/// Normalized view of a provider-side payment
#[derive(Debug, Clone)]
pub struct RemotePayment {
    pub provider_payment_id: String,
    /// The subscription this payment belongs to, when the provider links it
    pub provider_subscription_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub paid_at: Option<OffsetDateTime>,
    /// Display metadata only; nothing sensitive crosses this boundary
    pub card_brand: Option<String>,
    pub card_last_four: Option<String>,
}

/// Normalized webhook event: type plus the provider's resource identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// A charge attempt happened; the id refers to a payment resource
    SubscriptionPayment { payment_id: String },
    /// The subscription itself changed; the id refers to the subscription
    SubscriptionUpdated { provider_subscription_id: String },
    /// Event types we do not handle; acknowledged without processing
    Unknown { kind: String, resource_id: String },
}

impl WebhookEvent {
    /// The provider resource id the signature is computed over
    pub fn resource_id(&self) -> &str {
        match self {
            WebhookEvent::SubscriptionPayment { payment_id } => payment_id,
            WebhookEvent::SubscriptionUpdated {
                provider_subscription_id,
            } => provider_subscription_id,
            WebhookEvent::Unknown { resource_id, .. } => resource_id,
        }
    }
}

/// Capability interface for payment providers
///
/// `verify_webhook` and `parse_webhook` are synchronous and side-effect
/// free: verification is an HMAC over the provider-specified manifest and
/// parsing never trusts payload state (the engine re-fetches before
/// acting).
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create a pending remote subscription and obtain the checkout URL
    async fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> BillingResult<RemoteSubscription>;

    /// Change the recurring amount on an existing subscription
    async fn update_subscription_amount(
        &self,
        provider_subscription_id: &str,
        amount_cents: i64,
        currency: &str,
    ) -> BillingResult<RemoteSubscription>;

    /// Cancel the remote subscription immediately
    async fn cancel_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> BillingResult<RemoteSubscription>;

    /// Fetch the authoritative state of a subscription
    async fn fetch_subscription(
        &self,
        provider_subscription_id: &str,
    ) -> BillingResult<RemoteSubscription>;

    /// Fetch the authoritative state of a payment
    async fn fetch_payment(&self, provider_payment_id: &str) -> BillingResult<RemotePayment>;

    /// Verify a webhook's authenticity
    ///
    /// Computes the provider-specified HMAC over `(data_id, request_id,
    /// timestamp)` and compares in constant time. A mismatch is
    /// [`BillingError::WebhookSignatureInvalid`], which the HTTP layer
    /// answers with 401 instead of acknowledging.
    fn verify_webhook(
        &self,
        data_id: &str,
        signature_header: &str,
        request_id: &str,
    ) -> BillingResult<()>;

    /// Parse a webhook body into a normalized event
    fn parse_webhook(&self, body: &str) -> BillingResult<WebhookEvent>;
}

/// Provider selection and credentials, loaded from the environment
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// `mercadopago` (default) or `stripe`
    pub provider: String,
    pub access_token: String,
    pub webhook_secret: String,
    /// API base URL; overridden in tests
    pub base_url: String,
    /// Hosted-checkout return URL
    pub checkout_back_url: String,
}

impl ProviderConfig {
    pub fn from_env() -> BillingResult<Self> {
        let provider =
            std::env::var("BILLING_PROVIDER").unwrap_or_else(|_| "mercadopago".to_string());
        let access_token = std::env::var("MP_ACCESS_TOKEN")
            .map_err(|_| BillingError::Config("MP_ACCESS_TOKEN must be set".to_string()))?;
        let webhook_secret = std::env::var("MP_WEBHOOK_SECRET")
            .map_err(|_| BillingError::Config("MP_WEBHOOK_SECRET must be set".to_string()))?;
        let base_url = std::env::var("MP_BASE_URL")
            .unwrap_or_else(|_| "https://api.mercadopago.com".to_string());
        let checkout_back_url = std::env::var("CHECKOUT_BACK_URL")
            .unwrap_or_else(|_| "https://app.casaflow.com/settings/billing".to_string());

        Ok(Self {
            provider,
            access_token,
            webhook_secret,
            base_url,
            checkout_back_url,
        })
    }
}

/// Build the configured provider adapter
///
/// Selection happens once at startup; the engine holds the trait object
/// and never branches on the provider name again.
pub fn create_provider(config: ProviderConfig) -> BillingResult<Arc<dyn PaymentProvider>> {
    match config.provider.as_str() {
        "mercadopago" => Ok(Arc::new(MercadoPagoProvider::new(config))),
        "stripe" => Ok(Arc::new(StripeProvider::new())),
        other => Err(BillingError::Config(format!(
            "unknown billing provider: {other}"
        ))),
    }
}
