//! Stripe adapter stub
//!
//! Proves the provider boundary is provider-agnostic: the engine compiles
//! and runs against this adapter, every operation fails with
//! `ProviderUnsupported` until the integration is built.

use async_trait::async_trait;

use crate::error::{BillingError, BillingResult};
use crate::provider::{
    CreateSubscriptionRequest, PaymentProvider, RemotePayment, RemoteSubscription, WebhookEvent,
};

#[derive(Default)]
pub struct StripeProvider;

impl StripeProvider {
    pub fn new() -> Self {
        Self
    }

    fn unsupported<T>() -> BillingResult<T> {
        Err(BillingError::ProviderUnsupported("stripe"))
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_subscription(
        &self,
        _request: &CreateSubscriptionRequest,
    ) -> BillingResult<RemoteSubscription> {
        Self::unsupported()
    }

    async fn update_subscription_amount(
        &self,
        _provider_subscription_id: &str,
        _amount_cents: i64,
        _currency: &str,
    ) -> BillingResult<RemoteSubscription> {
        Self::unsupported()
    }

    async fn cancel_subscription(
        &self,
        _provider_subscription_id: &str,
    ) -> BillingResult<RemoteSubscription> {
        Self::unsupported()
    }

    async fn fetch_subscription(
        &self,
        _provider_subscription_id: &str,
    ) -> BillingResult<RemoteSubscription> {
        Self::unsupported()
    }

    async fn fetch_payment(&self, _provider_payment_id: &str) -> BillingResult<RemotePayment> {
        Self::unsupported()
    }

    fn verify_webhook(
        &self,
        _data_id: &str,
        _signature_header: &str,
        _request_id: &str,
    ) -> BillingResult<()> {
        Self::unsupported()
    }

    fn parse_webhook(&self, _body: &str) -> BillingResult<WebhookEvent> {
        Self::unsupported()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn every_operation_fails_until_implemented() {
        let provider = StripeProvider::new();
        assert_eq!(provider.name(), "stripe");

        let request = CreateSubscriptionRequest {
            org_id: Uuid::new_v4(),
            reason: "Casaflow Basic".to_string(),
            payer_email: "a@b.com".to_string(),
            amount_cents: 2_900,
            currency: "USD".to_string(),
            trial_days: None,
        };

        assert!(matches!(
            provider.create_subscription(&request).await,
            Err(BillingError::ProviderUnsupported("stripe"))
        ));
        assert!(provider.fetch_subscription("sub_1").await.is_err());
        assert!(provider.fetch_payment("pi_1").await.is_err());
        assert!(provider.cancel_subscription("sub_1").await.is_err());
        assert!(provider
            .update_subscription_amount("sub_1", 7_900, "USD")
            .await
            .is_err());
        assert!(provider.verify_webhook("id", "sig", "req").is_err());
        assert!(provider.parse_webhook("{}").is_err());
    }
}
