//! Webhook ingestion
//!
//! Verification gates everything: an unauthenticated request is rejected
//! outright with zero writes. Once authenticity is confirmed, processing
//! failures are swallowed and logged so the provider stops redelivering;
//! the reconciliation sweep is the correctness backstop for anything
//! dropped here.

use std::sync::Arc;

use crate::error::{BillingError, BillingResult};
use crate::provider::{PaymentProvider, WebhookEvent};
use crate::subscriptions::SubscriptionService;

pub struct WebhookHandler {
    engine: Arc<SubscriptionService>,
}

impl WebhookHandler {
    pub fn new(engine: Arc<SubscriptionService>) -> Self {
        Self { engine }
    }

    /// Verify and process one webhook delivery
    ///
    /// `data_id` is the resource id from the request query string when the
    /// provider sends one; otherwise it is recovered from the body. An
    /// `Err` return means the request was not authenticated (HTTP 401);
    /// `Ok(())` means acknowledged (HTTP 200), whatever happened
    /// downstream.
    pub async fn handle(
        &self,
        body: &str,
        data_id: Option<&str>,
        signature: Option<&str>,
        request_id: Option<&str>,
    ) -> BillingResult<()> {
        let signature = signature.ok_or(BillingError::WebhookSignatureInvalid)?;
        let request_id = request_id.ok_or(BillingError::WebhookSignatureInvalid)?;

        let provider = self.engine.provider();

        // Parsing is pure; nothing in the payload is trusted until the
        // engine re-fetches from the provider.
        let event = provider.parse_webhook(body);

        let resource_id = match (data_id, &event) {
            (Some(id), _) => id.to_string(),
            (None, Ok(parsed)) => parsed.resource_id().to_string(),
            // No resource id anywhere means the signature cannot be
            // checked; treat as unauthenticated
            (None, Err(_)) => return Err(BillingError::WebhookSignatureInvalid),
        };

        provider.verify_webhook(&resource_id, signature, request_id)?;

        // Authenticated from here on; errors are logged, never returned
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "Verified webhook body failed to parse");
                return Ok(());
            }
        };

        if let Err(e) = self.dispatch(&event).await {
            tracing::error!(
                error = %e,
                resource_id = %event.resource_id(),
                "Webhook processing failed; acknowledged anyway, sweep will reconcile"
            );
        }

        Ok(())
    }

    async fn dispatch(&self, event: &WebhookEvent) -> BillingResult<()> {
        match event {
            WebhookEvent::SubscriptionPayment { payment_id } => {
                tracing::info!(payment_id = %payment_id, "Processing payment webhook");
                self.engine.handle_subscription_payment(payment_id).await
            }
            WebhookEvent::SubscriptionUpdated {
                provider_subscription_id,
            } => {
                tracing::info!(
                    provider_subscription_id = %provider_subscription_id,
                    "Processing subscription webhook"
                );
                self.engine
                    .sync_subscription(provider_subscription_id)
                    .await
            }
            WebhookEvent::Unknown { kind, resource_id } => {
                tracing::info!(
                    kind = %kind,
                    resource_id = %resource_id,
                    "Ignoring unhandled webhook event type"
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::provider::{MercadoPagoProvider, ProviderConfig};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use sqlx::postgres::PgPoolOptions;
    use time::OffsetDateTime;

    const SECRET: &str = "whsec-test";

    fn handler() -> WebhookHandler {
        let config = ProviderConfig {
            provider: "mercadopago".to_string(),
            access_token: "TEST-token".to_string(),
            webhook_secret: SECRET.to_string(),
            // Nothing listens here: any provider fetch fails fast, which
            // is exactly what the swallow-and-acknowledge tests need
            base_url: "http://127.0.0.1:9".to_string(),
            checkout_back_url: "http://127.0.0.1:9/back".to_string(),
        };
        let provider = std::sync::Arc::new(MercadoPagoProvider::new(config));

        // Lazy pool: no database behind it, connections fail on first use
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();

        let engine = Arc::new(SubscriptionService::new(provider, pool, "ARS"));
        WebhookHandler::new(engine)
    }

    fn sign(data_id: &str, request_id: &str) -> String {
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let manifest = format!("id:{};request-id:{};ts:{};", data_id, request_id, ts);
        let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(manifest.as_bytes());
        format!("ts={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected_before_any_processing() {
        let handler = handler();
        let body = r#"{"type": "payment", "data": {"id": 1}}"#;

        let err = handler
            .handle(body, Some("1"), Some("ts=1,v1=deadbeef"), Some("req"))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[tokio::test]
    async fn missing_signature_header_is_rejected() {
        let handler = handler();
        let body = r#"{"type": "payment", "data": {"id": 1}}"#;

        let err = handler
            .handle(body, Some("1"), None, Some("req"))
            .await
            .unwrap_err();
        assert!(err.is_authentication());
    }

    #[tokio::test]
    async fn unverifiable_body_without_data_id_is_rejected() {
        let handler = handler();

        let err = handler
            .handle("not json", None, Some("ts=1,v1=aa"), Some("req"))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[tokio::test]
    async fn unknown_event_type_is_acknowledged() {
        let handler = handler();
        let body = r#"{"type": "plan", "data": {"id": "plan_1"}}"#;
        let signature = sign("plan_1", "req-7");

        handler
            .handle(body, Some("plan_1"), Some(&signature), Some("req-7"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn processing_failure_after_verification_is_still_acknowledged() {
        // The payment fetch fails (nothing listens on the base URL), but a
        // verified delivery must be acknowledged so the provider stops
        // retrying; the sweep picks up the dropped state.
        let handler = handler();
        let body = r#"{"type": "payment", "data": {"id": 555001}}"#;
        let signature = sign("555001", "req-9");

        handler
            .handle(body, Some("555001"), Some(&signature), Some("req-9"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn resource_id_can_come_from_the_body() {
        let handler = handler();
        let body = r#"{"type": "plan", "data": {"id": "plan_2"}}"#;
        let signature = sign("plan_2", "req-3");

        handler
            .handle(body, None, Some(&signature), Some("req-3"))
            .await
            .unwrap();
    }
}
