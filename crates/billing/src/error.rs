//! Billing error taxonomy
//!
//! Four classes per the propagation policy: validation and consistency
//! errors are rejected before any side effect; authentication errors are
//! distinct from processing errors so the webhook route can answer 401
//! without acknowledging; provider errors are surfaced on synchronous
//! operations and swallowed-and-logged on the async paths.

use std::time::Duration;

use uuid::Uuid;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    // Validation
    #[error("Invalid plan tier: {0}")]
    InvalidTier(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    // Authentication
    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    // Provider
    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Payment provider request timed out after {0:?}")]
    ProviderTimeout(Duration),

    #[error("Operation not supported by provider '{0}'")]
    ProviderUnsupported(&'static str),

    // Consistency
    #[error("Organization {0} not found")]
    OrganizationNotFound(Uuid),

    #[error("No subscription found for organization {0}")]
    SubscriptionNotFound(Uuid),

    #[error("Organization {0} already has an active subscription; change plan instead")]
    SubscriptionAlreadyActive(Uuid),

    #[error("Subscription for organization {0} is already cancelled; subscribe again instead")]
    SubscriptionAlreadyCanceled(Uuid),

    #[error("Payment method {0} not found or inactive")]
    PaymentMethodNotFound(Uuid),

    #[error("Concurrent update detected for organization {0}; no rows matched the guard")]
    StaleWrite(Uuid),

    // Infrastructure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BillingError {
    /// Whether this error means the request was not authenticated.
    ///
    /// The webhook route must answer these with 401 instead of the
    /// acknowledge-anyway 200 used for processing failures.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            BillingError::WebhookSignatureInvalid | BillingError::Unauthorized(_)
        )
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BillingError::ProviderTimeout(Duration::from_secs(15))
        } else {
            BillingError::Provider(err.to_string())
        }
    }
}
